use serde::{Deserialize, Serialize};

/// エンジンが宣言する設定項目の型
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OptionKind {
    Check {
        #[serde(default)]
        default: bool,
    },
    Spin {
        default: i64,
        min: i64,
        max: i64,
    },
    Combo {
        default: String,
        choices: Vec<String>,
    },
    Button,
    String {
        #[serde(default)]
        default: String,
    },
    /// ファイル / ディレクトリパス
    #[serde(alias = "path")]
    File {
        #[serde(default)]
        default: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOption {
    pub name: String,
    #[serde(flatten)]
    pub kind: OptionKind,
}

const UCI_KEYWORDS: [&str; 6] = ["name", "type", "default", "min", "max", "var"];

impl EngineOption {
    pub fn new(name: impl Into<String>, kind: OptionKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// UCI の `option name ... type ...` 行（先頭の `option` は除いたもの）を解釈する。
    pub fn parse_uci(rest: &str) -> Option<Self> {
        let mut name: Vec<&str> = Vec::new();
        let mut kind = "";
        let mut default: Option<Vec<&str>> = None;
        let mut min = None;
        let mut max = None;
        let mut vars: Vec<Vec<&str>> = Vec::new();

        let mut current = "";
        for tok in rest.split_whitespace() {
            if UCI_KEYWORDS.contains(&tok) {
                current = tok;
                match tok {
                    "default" => default = Some(Vec::new()),
                    "var" => vars.push(Vec::new()),
                    _ => {}
                }
                continue;
            }
            match current {
                "name" => name.push(tok),
                "type" => kind = tok,
                "default" => {
                    if let Some(d) = default.as_mut() {
                        d.push(tok);
                    }
                }
                "min" => min = tok.parse::<i64>().ok(),
                "max" => max = tok.parse::<i64>().ok(),
                "var" => {
                    if let Some(v) = vars.last_mut() {
                        v.push(tok);
                    }
                }
                _ => return None,
            }
        }
        if name.is_empty() {
            return None;
        }
        let default = default.map(|d| d.join(" ")).unwrap_or_default();
        let default = if default == "<empty>" {
            String::new()
        } else {
            default
        };

        let kind = match kind {
            "check" => OptionKind::Check {
                default: default == "true",
            },
            "spin" => {
                let min = min?;
                let max = max?;
                OptionKind::Spin {
                    default: default.parse().ok().unwrap_or(min),
                    min,
                    max,
                }
            }
            "combo" => OptionKind::Combo {
                default,
                choices: vars.into_iter().map(|v| v.join(" ")).collect(),
            },
            "button" => OptionKind::Button,
            "string" => {
                if is_path_like(&name) {
                    OptionKind::File { default }
                } else {
                    OptionKind::String { default }
                }
            }
            _ => return None,
        };
        Some(Self::new(name.join(" "), kind))
    }

    /// xboard の `feature option="Name -type ..."` の中身を解釈する。
    pub fn parse_xboard(spec: &str) -> Option<Self> {
        let (name, rest) = spec.split_once(" -")?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let (kind, args) = match rest.split_once(' ') {
            Some((k, a)) => (k, a.trim()),
            None => (rest.trim(), ""),
        };
        let kind = match kind {
            "check" => OptionKind::Check {
                default: args == "1",
            },
            "spin" | "slider" => {
                let nums: Vec<i64> = args
                    .split_whitespace()
                    .map(str::parse)
                    .collect::<Result<_, _>>()
                    .ok()?;
                let [default, min, max] = nums[..] else {
                    return None;
                };
                OptionKind::Spin { default, min, max }
            }
            "combo" => {
                let mut default = String::new();
                let mut choices = Vec::new();
                for choice in args.split("///") {
                    let choice = choice.trim();
                    let choice = match choice.strip_prefix('*') {
                        Some(c) => {
                            default = c.to_string();
                            c
                        }
                        None => choice,
                    };
                    if !choice.is_empty() {
                        choices.push(choice.to_string());
                    }
                }
                if default.is_empty() {
                    default = choices.first().cloned().unwrap_or_default();
                }
                OptionKind::Combo { default, choices }
            }
            "button" | "save" | "reset" => OptionKind::Button,
            "string" => OptionKind::String {
                default: args.to_string(),
            },
            "file" | "path" => OptionKind::File {
                default: args.to_string(),
            },
            _ => return None,
        };
        Some(Self::new(name, kind))
    }

    /// 値が宣言された型・範囲に収まるか検査する。
    pub fn validate(&self, value: &str) -> Result<(), String> {
        match &self.kind {
            OptionKind::Check { .. } => match value {
                "true" | "false" => Ok(()),
                _ => Err(format!("{}: expected true/false, got `{value}`", self.name)),
            },
            OptionKind::Spin { min, max, .. } => {
                let v: i64 = value
                    .parse()
                    .map_err(|_| format!("{}: `{value}` is not an integer", self.name))?;
                if v < *min || v > *max {
                    return Err(format!("{}: {v} is outside {min}..={max}", self.name));
                }
                Ok(())
            }
            OptionKind::Combo { choices, .. } => {
                if choices.iter().any(|c| c.eq_ignore_ascii_case(value)) {
                    Ok(())
                } else {
                    Err(format!("{}: `{value}` is not one of {choices:?}", self.name))
                }
            }
            OptionKind::Button | OptionKind::String { .. } | OptionKind::File { .. } => Ok(()),
        }
    }

    pub fn default_value(&self) -> Option<String> {
        match &self.kind {
            OptionKind::Check { default } => Some(default.to_string()),
            OptionKind::Spin { default, .. } => Some(default.to_string()),
            OptionKind::Combo { default, .. }
            | OptionKind::String { default }
            | OptionKind::File { default } => Some(default.clone()),
            OptionKind::Button => None,
        }
    }
}

fn is_path_like(name: &[&str]) -> bool {
    name.iter().any(|w| {
        let w = w.to_ascii_lowercase();
        w.ends_with("file") || w.ends_with("path") || w.ends_with("dir")
    })
}

/// 設定名で検索する（UCI / xboard ともに大文字小文字を区別しない）。
pub fn find_option<'a>(schema: &'a [EngineOption], name: &str) -> Option<&'a EngineOption> {
    schema.iter().find(|o| o.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uci_option_lines() {
        let opt = EngineOption::parse_uci("name Hash type spin default 16 min 1 max 33554432").unwrap();
        assert_eq!(opt.name, "Hash");
        assert_eq!(
            opt.kind,
            OptionKind::Spin {
                default: 16,
                min: 1,
                max: 33554432
            }
        );

        let opt = EngineOption::parse_uci(
            "name Analysis Contempt type combo default Both var Off var White var Black var Both",
        )
        .unwrap();
        assert_eq!(opt.name, "Analysis Contempt");
        assert!(matches!(&opt.kind, OptionKind::Combo { choices, default } if choices.len() == 4 && default == "Both"));

        let opt = EngineOption::parse_uci("name SyzygyPath type string default <empty>").unwrap();
        assert_eq!(
            opt.kind,
            OptionKind::File {
                default: String::new()
            }
        );

        let opt = EngineOption::parse_uci("name Clear Hash type button").unwrap();
        assert_eq!(opt.kind, OptionKind::Button);
        assert!(EngineOption::parse_uci("type spin default 1").is_none());
    }

    #[test]
    fn parses_xboard_option_features() {
        let opt = EngineOption::parse_xboard("Threads -spin 1 1 64").unwrap();
        assert_eq!(opt.name, "Threads");
        assert_eq!(
            opt.kind,
            OptionKind::Spin {
                default: 1,
                min: 1,
                max: 64
            }
        );
        let opt = EngineOption::parse_xboard("Style -combo Solid /// *Normal /// Risky").unwrap();
        assert_eq!(opt.default_value().as_deref(), Some("Normal"));
        let opt = EngineOption::parse_xboard("Ponder Off -check 1").unwrap();
        assert_eq!(opt.kind, OptionKind::Check { default: true });
        assert!(EngineOption::parse_xboard("NoType").is_none());
    }

    #[test]
    fn validates_values_against_schema() {
        let spin = EngineOption::new(
            "Threads",
            OptionKind::Spin {
                default: 1,
                min: 1,
                max: 8,
            },
        );
        assert!(spin.validate("4").is_ok());
        assert!(spin.validate("9").is_err());
        assert!(spin.validate("four").is_err());

        let check = EngineOption::new("Ponder", OptionKind::Check { default: false });
        assert!(check.validate("true").is_ok());
        assert!(check.validate("yes").is_err());
    }

    #[test]
    fn schema_is_deserialized_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            option: Vec<EngineOption>,
        }
        let w: Wrapper = toml::from_str(
            r#"
            [[option]]
            name = "Hash"
            type = "spin"
            default = 16
            min = 1
            max = 1024

            [[option]]
            name = "BookFile"
            type = "path"
            "#,
        )
        .unwrap();
        assert_eq!(w.option.len(), 2);
        assert_eq!(find_option(&w.option, "hash").map(|o| o.name.as_str()), Some("Hash"));
        assert_eq!(
            w.option[1].kind,
            OptionKind::File {
                default: String::new()
            }
        );
    }
}

//! TOML で書かれたトーナメント設定。
//!
//! ```toml
//! [tournament]
//! format = "round-robin"
//! rounds = 2
//! games_per_encounter = 2
//! concurrency = 4
//! tc = "40/60+0.5"
//!
//! [[engine]]
//! name = "alpha"
//! command = "./alpha"
//! protocol = "uci"
//! options = { Hash = 64, Threads = 1 }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::adjudication::AdjudicationConfig;
use crate::error::ConfigError;
use crate::opening::OpeningsConfig;
use crate::options::{EngineOption, find_option};
use crate::pairing::{Format, SeedingPolicy, TiebreakPolicy};
use crate::protocol::ProtocolKind;
use crate::sprt::SprtConfig;
use crate::time_control::TimeControl;

/// クラッシュ後に対局をどう再開するか
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryMode {
    /// 最後に受理された局面から続ける
    Resume,
    /// 最初から指し直す
    #[default]
    Replay,
}

/// エンジンプロセスを対局ごとに作り直すか
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartMode {
    /// エンジンが再利用を拒否しない限り使い回す
    #[default]
    Auto,
    On,
    Off,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TournamentSection {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub format: Format,
    #[serde(default = "one")]
    pub rounds: u32,
    #[serde(default = "one")]
    pub games_per_encounter: u32,
    #[serde(default = "one_usize")]
    pub concurrency: usize,
    /// gauntlet の挑戦者数（先頭から）
    #[serde(default = "one_usize")]
    pub seeds: usize,
    #[serde(default)]
    pub recover: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub recovery_mode: RecoveryMode,
    #[serde(default)]
    pub wait_between_games_ms: u64,
    #[serde(default)]
    pub seeding: SeedingPolicy,
    #[serde(default)]
    pub tiebreak: TiebreakPolicy,
    /// knockout の同点時に追加できる延長戦の対局数
    #[serde(default = "default_tiebreak_games")]
    pub tiebreak_games: u32,
    pub seed: Option<u64>,
    #[serde(default = "default_variant")]
    pub variant: String,
    /// 全エンジン共通の持ち時間（エンジン側の `tc` が優先）
    pub tc: Option<String>,
    pub event: Option<String>,
    pub site: Option<String>,
}

impl Default for TournamentSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            format: Format::default(),
            rounds: 1,
            games_per_encounter: 1,
            concurrency: 1,
            seeds: 1,
            recover: false,
            max_retries: default_max_retries(),
            recovery_mode: RecoveryMode::default(),
            wait_between_games_ms: 0,
            seeding: SeedingPolicy::default(),
            tiebreak: TiebreakPolicy::default(),
            tiebreak_games: default_tiebreak_games(),
            seed: None,
            variant: default_variant(),
            tc: None,
            event: None,
            site: None,
        }
    }
}

fn default_name() -> String {
    "rchess-arena tournament".to_string()
}

fn default_variant() -> String {
    "standard".to_string()
}

fn one() -> u32 {
    1
}

fn one_usize() -> usize {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_tiebreak_games() -> u32 {
    2
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// `.gz` で終わる場合は gzip 圧縮
    pub jsonl: Option<PathBuf>,
    pub pgn: Option<PathBuf>,
}

/// 1エンジン分の設定。対局開始後は変更しない。
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfiguration {
    pub name: String,
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub protocol: ProtocolKind,
    /// 初期化時にそのまま送る文字列
    #[serde(default)]
    pub init_strings: Vec<String>,
    #[serde(default = "default_variants")]
    pub variants: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, toml::Value>,
    #[serde(default)]
    pub option_schema: Vec<EngineOption>,
    pub tc: Option<String>,
    #[serde(default)]
    pub timemargin_ms: u64,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    #[serde(default)]
    pub ponder: bool,
    #[serde(default)]
    pub restart: RestartMode,
    /// xboard エンジンが評価値を常に白視点で出力する
    #[serde(default)]
    pub white_pov: bool,
}

fn default_variants() -> Vec<String> {
    vec!["standard".to_string()]
}

impl EngineConfiguration {
    pub fn new(name: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            workdir: None,
            protocol: ProtocolKind::default(),
            init_strings: Vec::new(),
            variants: default_variants(),
            options: BTreeMap::new(),
            option_schema: Vec::new(),
            tc: None,
            timemargin_ms: 0,
            depth: None,
            nodes: None,
            ponder: false,
            restart: RestartMode::default(),
            white_pov: false,
        }
    }

    /// 設定値を `(name, value)` の文字列組に変換する。
    pub fn option_values(&self) -> Vec<(String, String)> {
        self.options
            .iter()
            .map(|(name, value)| (name.clone(), option_value_string(value)))
            .collect()
    }

    pub fn supports_variant(&self, variant: &str) -> bool {
        self.variants.iter().any(|v| v.eq_ignore_ascii_case(variant))
    }

    /// `tc` / 深さ / ノード / マージンをまとめた TimeControl。`fallback` はトーナメント共通設定。
    pub fn time_control(&self, fallback: Option<&str>) -> Result<TimeControl, ConfigError> {
        let tc = match self.tc.as_deref().or(fallback) {
            Some(s) => TimeControl::parse(s)?,
            None if self.depth.is_some() || self.nodes.is_some() => TimeControl::infinite(),
            None => {
                return Err(ConfigError::Invalid(format!(
                    "engine `{}` has no time control (set `tc`, `depth` or `nodes`)",
                    self.name
                )));
            }
        };
        Ok(tc
            .with_margin(Duration::from_millis(self.timemargin_ms))
            .with_limits(self.depth, self.nodes))
    }

    /// 宣言済みスキーマに照らして設定値を検査する。不一致は警告のみ。
    pub fn check_options(&self, schema: &[EngineOption]) {
        for (name, value) in self.option_values() {
            match find_option(schema, &name) {
                Some(opt) => {
                    if let Err(reason) = opt.validate(&value) {
                        log::warn!("{}: {reason} (sending anyway)", self.name);
                    }
                }
                None if !schema.is_empty() => {
                    log::warn!("{}: option `{name}` is not declared by the engine", self.name);
                }
                None => {}
            }
        }
    }
}

fn option_value_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// 設定ファイル全体
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArenaConfig {
    #[serde(default)]
    pub tournament: TournamentSection,
    #[serde(default)]
    pub adjudication: AdjudicationConfig,
    pub openings: Option<OpeningsConfig>,
    #[serde(default)]
    pub output: OutputConfig,
    pub sprt: Option<SprtConfig>,
    #[serde(rename = "engine", default)]
    pub engines: Vec<EngineConfiguration>,
}

impl ArenaConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.resolve_relative_paths(path.parent().unwrap_or(Path::new(".")));
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ArenaConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.tournament;
        if self.engines.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "at least 2 engines are required (got {})",
                self.engines.len()
            )));
        }
        if t.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if t.rounds == 0 || t.games_per_encounter == 0 {
            return Err(ConfigError::Invalid(
                "rounds and games_per_encounter must be at least 1".into(),
            ));
        }
        if t.format == Format::Gauntlet && (t.seeds == 0 || t.seeds >= self.engines.len()) {
            return Err(ConfigError::Invalid(format!(
                "gauntlet needs 1..{} seeds (got {})",
                self.engines.len(),
                t.seeds
            )));
        }
        if let Some(tc) = &t.tc {
            TimeControl::parse(tc)?;
        }
        let mut seen = HashSet::new();
        for engine in &self.engines {
            if !seen.insert(engine.name.as_str()) {
                return Err(ConfigError::DuplicateEngine(engine.name.clone()));
            }
            if engine.command.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "engine `{}` has an empty command",
                    engine.name
                )));
            }
            engine.time_control(t.tc.as_deref())?;
            if !engine.supports_variant(&t.variant) {
                return Err(ConfigError::Invalid(format!(
                    "engine `{}` does not play variant `{}`",
                    engine.name, t.variant
                )));
            }
            engine.check_options(&engine.option_schema);
        }
        if let Some(sprt) = &self.sprt {
            sprt.validate().map_err(ConfigError::Invalid)?;
            if self.engines.len() != 2 {
                return Err(ConfigError::Invalid(
                    "SPRT requires exactly two engines".into(),
                ));
            }
        }
        self.adjudication.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// 設定ファイルからの相対パスを解決する。
    fn resolve_relative_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(openings) = self.openings.as_mut() {
            resolve(&mut openings.file);
        }
        if let Some(p) = self.output.jsonl.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.output.pgn.as_mut() {
            resolve(p);
        }
        for engine in &mut self.engines {
            if let Some(dir) = engine.workdir.as_mut() {
                resolve(dir);
            }
            // 裸のコマンド名は PATH 検索に任せる
            if engine.command.components().count() > 1 {
                resolve(&mut engine.command);
            }
        }
    }

    pub fn engine_store(&self) -> Result<EngineStore, ConfigError> {
        EngineStore::new(self.engines.clone(), self.tournament.tc.as_deref())
    }
}

/// 参加エンジンの明示的な登録簿。スケジューラに渡され、以後は読み取り専用。
#[derive(Clone, Debug)]
pub struct EngineStore {
    entries: Vec<EngineEntry>,
}

#[derive(Clone, Debug)]
pub struct EngineEntry {
    pub config: Arc<EngineConfiguration>,
    pub time_control: TimeControl,
}

impl EngineStore {
    pub fn new(
        engines: Vec<EngineConfiguration>,
        default_tc: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(engines.len());
        for engine in engines {
            if !seen.insert(engine.name.clone()) {
                return Err(ConfigError::DuplicateEngine(engine.name));
            }
            let time_control = engine.time_control(default_tc)?;
            entries.push(EngineEntry {
                config: Arc::new(engine),
                time_control,
            });
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&EngineEntry> {
        self.entries.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Result<usize, ConfigError> {
        self.entries
            .iter()
            .position(|e| e.config.name == name)
            .ok_or_else(|| ConfigError::UnknownEngine(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.config.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_control::TimeBudget;

    const SAMPLE: &str = r#"
        [tournament]
        format = "knockout"
        concurrency = 2
        seeding = "standard"
        tiebreak = "extra-games"
        tc = "40/300"

        [adjudication]
        min_move_number = 20
        draw = { move_number = 40, move_count = 10, score = 10 }
        resign = { move_count = 3, score = 900 }

        [output]
        jsonl = "out/games.jsonl.gz"

        [[engine]]
        name = "alpha"
        command = "./alpha"
        options = { Hash = 64, Ponder = false, Style = "Solid" }

        [[engine]]
        name = "beta"
        command = "beta"
        protocol = "xboard"
        tc = "60+1"
        timemargin_ms = 50
    "#;

    #[test]
    fn parses_full_configuration() {
        let config = ArenaConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.tournament.format, Format::Knockout);
        assert_eq!(config.tournament.seeding, SeedingPolicy::Standard);
        assert_eq!(config.tournament.tiebreak, TiebreakPolicy::ExtraGames);
        assert_eq!(config.engines.len(), 2);
        assert_eq!(config.engines[1].protocol, ProtocolKind::Xboard);

        let mut values = config.engines[0].option_values();
        values.sort();
        assert_eq!(
            values,
            vec![
                ("Hash".to_string(), "64".to_string()),
                ("Ponder".to_string(), "false".to_string()),
                ("Style".to_string(), "Solid".to_string()),
            ]
        );

        let store = config.engine_store().unwrap();
        let alpha = store.get(store.index_of("alpha").unwrap()).unwrap();
        assert_eq!(alpha.time_control.moves_per_period(), Some(40));
        let beta = store.get(1).unwrap();
        assert_eq!(beta.time_control.margin, Duration::from_millis(50));
        assert!(matches!(beta.time_control.budget, TimeBudget::Conventional { moves: None, .. }));
        assert!(matches!(store.index_of("gamma"), Err(ConfigError::UnknownEngine(_))));
    }

    #[test]
    fn rejects_invalid_configurations() {
        let one_engine = r#"
            [[engine]]
            name = "a"
            command = "a"
            tc = "10"
        "#;
        assert!(matches!(
            ArenaConfig::from_toml_str(one_engine),
            Err(ConfigError::Invalid(_))
        ));

        let duplicate = r#"
            [tournament]
            tc = "10"
            [[engine]]
            name = "a"
            command = "a"
            [[engine]]
            name = "a"
            command = "b"
        "#;
        assert!(matches!(
            ArenaConfig::from_toml_str(duplicate),
            Err(ConfigError::DuplicateEngine(_))
        ));

        let bad_tc = r#"
            [[engine]]
            name = "a"
            command = "a"
            tc = "forty/300"
            [[engine]]
            name = "b"
            command = "b"
            tc = "10"
        "#;
        assert!(matches!(
            ArenaConfig::from_toml_str(bad_tc),
            Err(ConfigError::TimeControl(_))
        ));

        let no_tc = r#"
            [[engine]]
            name = "a"
            command = "a"
            [[engine]]
            name = "b"
            command = "b"
            depth = 5
        "#;
        assert!(ArenaConfig::from_toml_str(no_tc).is_err());
    }

    #[test]
    fn depth_only_engine_gets_infinite_budget() {
        let mut engine = EngineConfiguration::new("d", "d");
        engine.depth = Some(6);
        let tc = engine.time_control(None).unwrap();
        assert!(tc.is_infinite());
        assert_eq!(tc.ply_limit, Some(6));
    }
}

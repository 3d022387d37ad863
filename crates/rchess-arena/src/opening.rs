use std::io::BufRead;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::board::BoardProvider;
use crate::error::{ArenaError, OpeningError};
use crate::sink::io::open_reader;

/// 開始局面と強制手順
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Opening {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// None なら初期局面
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fen: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub moves: Vec<String>,
}

impl Opening {
    pub fn startpos() -> Self {
        Self::default()
    }

    /// ログ用の短い表記
    pub fn describe(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let mut s = match &self.fen {
            Some(fen) => format!("fen {fen}"),
            None => "startpos".to_string(),
        };
        if !self.moves.is_empty() {
            s.push_str(" moves ");
            s.push_str(&self.moves.join(" "));
        }
        s
    }
}

/// 対局ごとに開始局面を供給する外部コラボレータ（読み取り専用）
pub trait OpeningSource: Send {
    fn next_opening(&mut self) -> Opening;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpeningFormat {
    #[default]
    Epd,
    Fen,
    /// `position startpos moves ...` / `position fen ... moves ...`
    Position,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpeningOrder {
    #[default]
    Sequential,
    Random,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpeningsConfig {
    pub file: PathBuf,
    #[serde(default)]
    pub format: OpeningFormat,
    #[serde(default)]
    pub order: OpeningOrder,
    /// 強制手順をこの半手数で打ち切る
    pub plies: Option<u32>,
    /// 同じ開始局面を先後入れ替えて 2 回使う
    #[serde(default = "default_repeat")]
    pub repeat: bool,
    pub seed: Option<u64>,
}

fn default_repeat() -> bool {
    true
}

/// ファイルから読み込んだ開始局面の集合
pub struct OpeningSuite {
    openings: Vec<Opening>,
    cursor: usize,
}

impl OpeningSuite {
    pub fn load(config: &OpeningsConfig) -> Result<Self, OpeningError> {
        let reader = open_reader(&config.file)?;
        let mut suite = Self::from_reader(reader, config.format, &config.file)?;
        if let Some(plies) = config.plies {
            for opening in &mut suite.openings {
                opening.moves.truncate(plies as usize);
            }
        }
        if config.order == OpeningOrder::Random {
            let mut rng = match config.seed {
                Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
                None => Xoshiro256PlusPlus::from_rng(&mut rand::rng()),
            };
            suite.openings.shuffle(&mut rng);
        }
        log::info!(
            "loaded {} openings from {}",
            suite.openings.len(),
            config.file.display()
        );
        Ok(suite)
    }

    pub fn from_reader(
        reader: impl BufRead,
        format: OpeningFormat,
        origin: &Path,
    ) -> Result<Self, OpeningError> {
        let origin_str = origin.display().to_string();
        let mut openings = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let parsed = match format {
                OpeningFormat::Epd => parse_epd_line(trimmed),
                OpeningFormat::Fen => parse_fen_line(trimmed),
                OpeningFormat::Position => parse_position_line(trimmed),
            };
            let opening = parsed.map_err(|reason| OpeningError::Parse {
                path: origin_str.clone(),
                line: idx + 1,
                reason,
            })?;
            openings.push(opening);
        }
        if openings.is_empty() {
            return Err(OpeningError::Empty(origin_str));
        }
        Ok(Self {
            openings,
            cursor: 0,
        })
    }

    pub fn from_openings(openings: Vec<Opening>) -> Self {
        Self {
            openings,
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.openings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.openings.is_empty()
    }

    /// 全開始局面が盤面サービスで再現できるか確認する。
    pub fn validate(&self, provider: &dyn BoardProvider, variant: &str) -> Result<(), ArenaError> {
        for opening in &self.openings {
            provider.replay(variant, opening.fen.as_deref(), &opening.moves)?;
        }
        Ok(())
    }
}

impl OpeningSource for OpeningSuite {
    fn next_opening(&mut self) -> Opening {
        if self.openings.is_empty() {
            return Opening::startpos();
        }
        let opening = self.openings[self.cursor % self.openings.len()].clone();
        self.cursor += 1;
        opening
    }
}

/// 常に初期局面を返す
#[derive(Clone, Copy, Debug, Default)]
pub struct StartPosition;

impl OpeningSource for StartPosition {
    fn next_opening(&mut self) -> Opening {
        Opening::startpos()
    }
}

/// EPD: 4 フィールドの局面 + `opcode operand;` 列。`id` を名前に使う。
pub fn parse_epd_line(line: &str) -> Result<Opening, String> {
    let mut fields = line.split_whitespace();
    let position: Vec<&str> = fields.by_ref().take(4).collect();
    if position.len() < 4 {
        return Err(format!("EPD needs 4 position fields: `{line}`"));
    }
    let rest: Vec<&str> = fields.collect();
    let rest = rest.join(" ");

    // 後ろに halfmove / fullmove が付いた FEN もそのまま受け付ける
    let mut counters = "0 1".to_string();
    let mut ops = rest.as_str();
    let mut nums = rest.split_whitespace();
    if let (Some(h), Some(f)) = (nums.next(), nums.next()) {
        if h.parse::<u32>().is_ok() && f.parse::<u32>().is_ok() {
            counters = format!("{h} {f}");
            ops = rest
                .splitn(3, char::is_whitespace)
                .nth(2)
                .unwrap_or_default();
        }
    }

    let mut name = None;
    for op in ops.split(';') {
        let op = op.trim();
        if let Some(value) = op.strip_prefix("id ") {
            name = Some(value.trim().trim_matches('"').to_string());
        }
    }
    Ok(Opening {
        name,
        fen: Some(format!("{} {counters}", position.join(" "))),
        moves: Vec::new(),
    })
}

pub fn parse_fen_line(line: &str) -> Result<Opening, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.len() {
        4 => Ok(Opening {
            fen: Some(format!("{} 0 1", fields.join(" "))),
            ..Default::default()
        }),
        6 => Ok(Opening {
            fen: Some(fields.join(" ")),
            ..Default::default()
        }),
        n => Err(format!("FEN needs 4 or 6 fields, got {n}")),
    }
}

/// `position ...` 形式（先頭の `position` は省略可）
pub fn parse_position_line(line: &str) -> Result<Opening, String> {
    let mut tokens = line.split_whitespace().peekable();
    if tokens.peek().is_some_and(|tok| *tok == "position") {
        tokens.next();
    }
    let fen = match tokens.next() {
        Some("startpos") => None,
        Some("fen") => {
            let mut fen_tokens = Vec::new();
            while let Some(&token) = tokens.peek() {
                if token == "moves" {
                    break;
                }
                fen_tokens.push(token);
                tokens.next();
            }
            if fen_tokens.is_empty() {
                return Err("missing FEN payload".to_string());
            }
            Some(fen_tokens.join(" "))
        }
        other => return Err(format!("expected 'startpos' or 'fen', got {other:?}")),
    };
    let moves = match tokens.next() {
        None => Vec::new(),
        Some("moves") => tokens.map(str::to_string).collect(),
        Some(other) => return Err(format!("expected 'moves', got `{other}`")),
    };
    Ok(Opening {
        name: None,
        fen,
        moves,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_epd_with_id() {
        let o = parse_epd_line(
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - id \"King pawn\";",
        )
        .unwrap();
        assert_eq!(o.name.as_deref(), Some("King pawn"));
        assert_eq!(
            o.fen.as_deref(),
            Some("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1")
        );
        let o = parse_epd_line("8/8/8/4k3/8/8/8/4K2R w K - 3 40").unwrap();
        assert_eq!(o.fen.as_deref(), Some("8/8/8/4k3/8/8/8/4K2R w K - 3 40"));
        assert!(parse_epd_line("8/8/8 w").is_err());
    }

    #[test]
    fn parses_position_lines() {
        let o = parse_position_line("position startpos moves e2e4 e7e5").unwrap();
        assert_eq!(o.fen, None);
        assert_eq!(o.moves, vec!["e2e4", "e7e5"]);
        let o = parse_position_line("fen 8/8/8/4k3/8/8/8/4K2R w K - 0 1 moves h1h8").unwrap();
        assert_eq!(o.fen.as_deref(), Some("8/8/8/4k3/8/8/8/4K2R w K - 0 1"));
        assert_eq!(o.moves, vec!["h1h8"]);
        assert!(parse_position_line("sfen lnsgkgsnl/9 b - 1").is_err());
    }

    #[test]
    fn suite_cycles_sequentially_and_reports_bad_lines() {
        let text = "# comment\nstartpos moves e2e4\n\nstartpos moves d2d4\n";
        let mut suite =
            OpeningSuite::from_reader(Cursor::new(text), OpeningFormat::Position, Path::new("t"))
                .unwrap();
        assert_eq!(suite.len(), 2);
        let first = suite.next_opening();
        let second = suite.next_opening();
        let third = suite.next_opening();
        assert_eq!(first.moves, vec!["e2e4"]);
        assert_eq!(second.moves, vec!["d2d4"]);
        assert_eq!(third, first);

        let err = OpeningSuite::from_reader(
            Cursor::new("startpos\nbogus line\n"),
            OpeningFormat::Position,
            Path::new("book.txt"),
        )
        .err()
        .unwrap();
        assert!(matches!(err, OpeningError::Parse { line: 2, .. }));

        let err = OpeningSuite::from_reader(Cursor::new("# only\n"), OpeningFormat::Fen, Path::new("x"))
            .err()
            .unwrap();
        assert!(matches!(err, OpeningError::Empty(_)));
    }

    #[test]
    fn loads_file_with_ply_limit_and_seeded_shuffle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.pos");
        let lines: Vec<String> = (0..8)
            .map(|i| format!("startpos moves {} e7e5 g1f3", ["a2a3", "b2b3", "c2c3", "d2d3", "e2e3", "f2f3", "g2g3", "h2h3"][i]))
            .collect();
        std::fs::write(&path, lines.join("\n")).unwrap();
        let config = OpeningsConfig {
            file: path,
            format: OpeningFormat::Position,
            order: OpeningOrder::Random,
            plies: Some(2),
            repeat: true,
            seed: Some(42),
        };
        let mut a = OpeningSuite::load(&config).unwrap();
        let mut b = OpeningSuite::load(&config).unwrap();
        for _ in 0..8 {
            let (x, y) = (a.next_opening(), b.next_opening());
            assert_eq!(x, y);
            assert_eq!(x.moves.len(), 2);
        }
    }

    #[cfg(feature = "standard-board")]
    #[test]
    fn validate_rejects_illegal_opening_moves() {
        use crate::board::StandardBoardProvider;
        let good = OpeningSuite::from_openings(vec![Opening {
            moves: vec!["e2e4".into()],
            ..Default::default()
        }]);
        assert!(good.validate(&StandardBoardProvider, "standard").is_ok());
        let bad = OpeningSuite::from_openings(vec![Opening {
            moves: vec!["e2e5".into()],
            ..Default::default()
        }]);
        assert!(bad.validate(&StandardBoardProvider, "standard").is_err());
    }
}

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use super::ResultSink;
use super::io::{Writer, open_writer};
use crate::error::SinkError;
use crate::game::GameRecord;
use crate::types::{EvalLog, MoveRecord, Side, Termination};

const LINE_WIDTH: usize = 80;

/// PGN 形式。指し手ごとに `{score/depth time}` コメントを付ける。
pub struct PgnSink {
    writer: Option<Writer>,
    event: String,
    site: String,
}

impl PgnSink {
    pub fn create<P: AsRef<Path>>(
        path: P,
        append: bool,
        event: impl Into<String>,
        site: impl Into<String>,
    ) -> Result<Self, SinkError> {
        Ok(Self::from_writer(open_writer(path, append)?, event, site))
    }

    pub fn from_writer(writer: Writer, event: impl Into<String>, site: impl Into<String>) -> Self {
        Self {
            writer: Some(writer),
            event: event.into(),
            site: site.into(),
        }
    }
}

impl ResultSink for PgnSink {
    fn write_game(&mut self, record: &GameRecord) -> Result<(), SinkError> {
        let text = render_game(record, &self.event, &self.site);
        if let Some(w) = self.writer.as_mut() {
            w.write_all(text.as_bytes())?;
            w.flush()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(w) = self.writer.take() {
            w.close()?;
        }
        Ok(())
    }
}

fn termination_tag(t: Termination) -> &'static str {
    match t {
        Termination::Timeout => "time forfeit",
        Termination::AdjudicationDraw | Termination::AdjudicationWin => "adjudication",
        Termination::IllegalMove => "rules infraction",
        Termination::Disconnection => "abandoned",
        Termination::NoResult => "unterminated",
        _ => "normal",
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// `+0.35/12 1.500s`、詰みは `+M5/20 0.120s`
fn move_comment(m: &MoveRecord) -> String {
    if m.book {
        return "book".to_string();
    }
    let secs = format!("{:.3}s", m.elapsed_ms as f64 / 1000.0);
    let Some(eval) = m.eval.as_ref().filter(|e| e.score_cp.is_some() || e.score_mate.is_some())
    else {
        return secs;
    };
    let depth = eval.depth.unwrap_or(0);
    format!("{}/{depth} {secs}", score_text(eval))
}

fn score_text(eval: &EvalLog) -> String {
    match (eval.score_mate, eval.score_cp) {
        (Some(n), _) if n > 0 => format!("+M{n}"),
        (Some(n), _) => format!("-M{}", n.unsigned_abs()),
        (None, Some(cp)) => format!("{:+.2}", cp as f64 / 100.0),
        (None, None) => "0.00".to_string(),
    }
}

/// FEN の手数フィールド（無ければ 1）
fn first_move_number(fen: Option<&str>) -> u32 {
    fen.and_then(|f| f.split_whitespace().nth(5))
        .and_then(|n| n.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1)
}

pub(crate) fn render_game(record: &GameRecord, event: &str, site: &str) -> String {
    let result = &record.result;
    let mut tags: Vec<(&str, String)> = vec![
        ("Event", event.to_string()),
        ("Site", site.to_string()),
        ("Date", record.started_at.format("%Y.%m.%d").to_string()),
        ("Round", record.round.to_string()),
        ("White", record.white.clone()),
        ("Black", record.black.clone()),
        ("Result", result.outcome.pgn_token().to_string()),
    ];
    if let Some(fen) = &record.start_fen {
        tags.push(("SetUp", "1".to_string()));
        tags.push(("FEN", fen.clone()));
    }
    if record.variant != "standard" {
        tags.push(("Variant", record.variant.clone()));
    }
    if let Some(opening) = &record.opening {
        tags.push(("Opening", opening.clone()));
    }
    if record.white_tc == record.black_tc {
        tags.push(("TimeControl", record.white_tc.clone()));
    } else {
        tags.push(("WhiteTimeControl", record.white_tc.clone()));
        tags.push(("BlackTimeControl", record.black_tc.clone()));
    }
    tags.push(("PlyCount", record.plies().to_string()));
    tags.push(("Termination", termination_tag(result.termination).to_string()));

    let mut out = String::new();
    for (name, value) in &tags {
        let _ = writeln!(out, "[{name} \"{}\"]", escape(value));
    }
    out.push('\n');

    // 手順を語単位に分けてから 80 桁で折り返す
    let mut tokens: Vec<String> = Vec::new();
    let mut number = first_move_number(record.start_fen.as_deref());
    for (i, m) in record.moves.iter().enumerate() {
        match m.side {
            Side::White => tokens.push(format!("{number}.")),
            Side::Black if i == 0 => tokens.push(format!("{number}...")),
            Side::Black => {}
        }
        tokens.push(m.san.clone().unwrap_or_else(|| m.mv.clone()));
        tokens.push(format!("{{{}}}", move_comment(m)));
        if m.side == Side::Black {
            number += 1;
        }
    }
    tokens.push(format!("{{{}}}", result.description()));
    tokens.push(result.outcome.pgn_token().to_string());

    let mut line = String::new();
    for token in tokens {
        if !line.is_empty() && line.len() + 1 + token.len() > LINE_WIDTH {
            out.push_str(&line);
            out.push('\n');
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&token);
    }
    out.push_str(&line);
    out.push_str("\n\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::scholars_mate;
    use crate::types::{GameResult, Outcome};

    #[test]
    fn renders_tags_and_commented_moves() {
        let pgn = render_game(&scholars_mate(), "Test Cup", "local");
        assert!(pgn.starts_with("[Event \"Test Cup\"]\n[Site \"local\"]\n[Date \"2026.03.14\"]\n"));
        assert!(pgn.contains("[Result \"1-0\"]"));
        assert!(pgn.contains("[TimeControl \"40/300\"]"));
        assert!(pgn.contains("[Termination \"normal\"]"));
        assert!(!pgn.contains("[FEN"));
        assert!(pgn.contains("1. e4 {book} e5 {book} 2. Qh5 {+0.35/12 1.500s}"));
        assert!(pgn.contains("Qxf7# {+0.35/12 1.500s}"));
        assert!(pgn.trim_end().ends_with("{white wins by checkmate} 1-0"));
        assert!(pgn.lines().all(|l| l.len() <= LINE_WIDTH));
    }

    #[test]
    fn black_to_move_start_uses_ellipsis_numbering() {
        let mut record = scholars_mate();
        record.start_fen =
            Some("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 12".to_string());
        record.moves.truncate(2);
        record.moves[0].side = Side::Black;
        record.moves[1].side = Side::White;
        record.moves[1].eval = Some(EvalLog {
            score_mate: Some(-3),
            depth: Some(20),
            ..Default::default()
        });
        record.moves[1].book = false;
        record.result = GameResult::new(Outcome::Unresolved, Termination::NoResult);
        let pgn = render_game(&record, "?", "?");
        assert!(pgn.contains("[SetUp \"1\"]"));
        assert!(pgn.contains("12... e4 {book} 13. e5 {-M3/20 1.500s}"), "{pgn}");
        assert!(pgn.contains("[Termination \"unterminated\"]"));
        assert!(pgn.trim_end().ends_with('*'));
    }

    #[test]
    fn sink_appends_games_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("games.pgn");
        let mut sink = PgnSink::create(&path, false, "E", "S").unwrap();
        sink.write_game(&scholars_mate()).unwrap();
        sink.write_game(&scholars_mate()).unwrap();
        sink.finish().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("[Event \"E\"]").count(), 2);
    }
}

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use super::io::{Writer, open_writer};
use super::{ResultSink, TournamentMeta};
use crate::error::SinkError;
use crate::game::GameRecord;
use crate::types::{EvalLog, Side};

#[derive(Serialize)]
struct MetaLine<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    meta: &'a TournamentMeta,
}

#[derive(Serialize)]
struct MoveLine<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    game_id: u64,
    ply: u32,
    side: Side,
    engine: &'a str,
    #[serde(rename = "move")]
    mv: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    san: Option<&'a str>,
    elapsed_ms: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    book: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    eval: Option<&'a EvalLog>,
}

#[derive(Serialize)]
struct ResultLine<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    game_id: u64,
    round: u32,
    white: &'a str,
    black: &'a str,
    variant: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_fen: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    opening: Option<&'a str>,
    white_tc: &'a str,
    black_tc: &'a str,
    outcome: &'static str,
    reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    winner: Option<&'a str>,
    plies: usize,
    final_fen: &'a str,
    started_at: String,
    finished_at: String,
}

/// 1 行 1 JSON（`meta` → 対局ごとに `move`… → `result`）
pub struct JsonlSink {
    writer: Option<Writer>,
}

impl JsonlSink {
    pub fn create<P: AsRef<Path>>(path: P, append: bool) -> Result<Self, SinkError> {
        Ok(Self::from_writer(open_writer(path, append)?))
    }

    pub fn from_writer(writer: Writer) -> Self {
        Self {
            writer: Some(writer),
        }
    }

    fn write_json(&mut self, value: &impl Serialize) -> Result<(), SinkError> {
        let Some(w) = self.writer.as_mut() else {
            return Ok(());
        };
        serde_json::to_writer(&mut *w, value)?;
        w.write_all(b"\n")?;
        Ok(())
    }
}

impl ResultSink for JsonlSink {
    fn tournament_started(&mut self, meta: &TournamentMeta) -> Result<(), SinkError> {
        self.write_json(&MetaLine { kind: "meta", meta })?;
        if let Some(w) = self.writer.as_mut() {
            w.flush()?;
        }
        Ok(())
    }

    fn write_game(&mut self, record: &GameRecord) -> Result<(), SinkError> {
        for m in &record.moves {
            self.write_json(&MoveLine {
                kind: "move",
                game_id: record.game_id,
                ply: m.ply,
                side: m.side,
                engine: record.player(m.side),
                mv: &m.mv,
                san: m.san.as_deref(),
                elapsed_ms: m.elapsed_ms,
                book: m.book,
                eval: m.eval.as_ref().filter(|e| !e.is_empty()),
            })?;
        }
        let result = &record.result;
        self.write_json(&ResultLine {
            kind: "result",
            game_id: record.game_id,
            round: record.round,
            white: &record.white,
            black: &record.black,
            variant: &record.variant,
            start_fen: record.start_fen.as_deref(),
            opening: record.opening.as_deref(),
            white_tc: &record.white_tc,
            black_tc: &record.black_tc,
            outcome: result.outcome.label(),
            reason: result.termination.label(),
            detail: result.detail.as_deref(),
            winner: result.winner().map(|s| record.player(s)),
            plies: record.plies(),
            final_fen: &record.final_fen,
            started_at: record.started_at.to_rfc3339(),
            finished_at: record.finished_at.to_rfc3339(),
        })?;
        if let Some(w) = self.writer.as_mut() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::io::open_reader;
    use crate::sink::testing::scholars_mate;
    use std::io::BufRead;

    fn meta() -> TournamentMeta {
        TournamentMeta {
            name: "t".into(),
            format: "round-robin".into(),
            engines: vec!["alpha".into(), "beta".into()],
            rounds: 1,
            games_per_encounter: 2,
            concurrency: 1,
            timestamp: "2026-03-14T09:30:00+00:00".into(),
            openings: None,
        }
    }

    #[test]
    fn writes_meta_move_and_result_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("games.jsonl.gz");
        let mut sink = JsonlSink::create(&path, false).unwrap();
        sink.tournament_started(&meta()).unwrap();
        sink.write_game(&scholars_mate()).unwrap();
        sink.finish().unwrap();

        let lines: Vec<serde_json::Value> = open_reader(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
            .collect();
        assert_eq!(lines.len(), 1 + 7 + 1);
        assert_eq!(lines[0]["type"], "meta");
        assert_eq!(lines[0]["engines"][1], "beta");
        assert_eq!(lines[1]["type"], "move");
        assert_eq!(lines[1]["book"], true);
        assert_eq!(lines[1]["engine"], "alpha");
        assert_eq!(lines[4]["engine"], "beta");
        assert_eq!(lines[7]["move"], "h5f7");
        assert_eq!(lines[7]["eval"]["depth"], 12);
        let result = &lines[8];
        assert_eq!(result["type"], "result");
        assert_eq!(result["outcome"], "white_win");
        assert_eq!(result["reason"], "checkmate");
        assert_eq!(result["winner"], "alpha");
        assert_eq!(result["plies"], 7);
    }
}

//! 終局した対局の書き出し先

pub mod io;
mod jsonl;
mod pgn;

use serde::Serialize;

pub use jsonl::JsonlSink;
pub use pgn::PgnSink;

use crate::error::SinkError;
use crate::game::GameRecord;

/// トーナメント開始時に 1 度だけ渡す情報
#[derive(Clone, Debug, Serialize)]
pub struct TournamentMeta {
    pub name: String,
    pub format: String,
    pub engines: Vec<String>,
    pub rounds: u32,
    pub games_per_encounter: u32,
    pub concurrency: usize,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openings: Option<String>,
}

/// 1 局ごとに `GameRecord` を受け取る。呼ぶのはスケジューラのメインループだけ。
pub trait ResultSink: Send {
    fn tournament_started(&mut self, _meta: &TournamentMeta) -> Result<(), SinkError> {
        Ok(())
    }

    fn write_game(&mut self, record: &GameRecord) -> Result<(), SinkError>;

    /// 出力を確定させる。以後の書き込みは無視してよい。
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// 複数の書き出し先へ順に配る
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn ResultSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn ResultSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ResultSink for MultiSink {
    fn tournament_started(&mut self, meta: &TournamentMeta) -> Result<(), SinkError> {
        for sink in &mut self.sinks {
            sink.tournament_started(meta)?;
        }
        Ok(())
    }

    fn write_game(&mut self, record: &GameRecord) -> Result<(), SinkError> {
        for sink in &mut self.sinks {
            sink.write_game(record)?;
        }
        Ok(())
    }

    /// 1 つが失敗しても残りは確定させ、最初のエラーを返す
    fn finish(&mut self) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.finish() {
                log::error!("failed to finish result sink: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// 受け取った記録をメモリに溜める（テスト・組み込み用）
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub meta: Option<TournamentMeta>,
    pub games: Vec<GameRecord>,
}

impl ResultSink for MemorySink {
    fn tournament_started(&mut self, meta: &TournamentMeta) -> Result<(), SinkError> {
        self.meta = Some(meta.clone());
        Ok(())
    }

    fn write_game(&mut self, record: &GameRecord) -> Result<(), SinkError> {
        self.games.push(record.clone());
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Failing;

    impl ResultSink for Failing {
        fn write_game(&mut self, _record: &GameRecord) -> Result<(), SinkError> {
            Ok(())
        }

        fn finish(&mut self) -> Result<(), SinkError> {
            Err(std::io::Error::other("disk full").into())
        }
    }

    #[test]
    fn multi_sink_fans_out_and_finishes_everything() {
        let mut multi = MultiSink::new();
        multi.push(Box::new(MemorySink::default()));
        multi.push(Box::new(Failing));
        multi.push(Box::new(MemorySink::default()));
        multi.write_game(&testing::scholars_mate()).unwrap();
        assert_eq!(multi.len(), 3);
        let err = multi.finish().unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }
}

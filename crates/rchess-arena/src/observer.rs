use crossbeam_channel as chan;
use serde::Serialize;

use crate::game::GameRecord;
use crate::types::MoveRecord;

/// 対局開始時点の見出し
#[derive(Clone, Debug, Serialize)]
pub struct GameHeader {
    pub game_id: u64,
    pub round: u32,
    pub white: String,
    pub black: String,
    pub variant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_fen: Option<String>,
}

/// 進行中の対局を外部（UI・棋譜ライタ）に知らせる。
///
/// `move_played` は受理された手ごとにその場で呼ばれる。
pub trait GameObserver: Send + Sync {
    fn game_started(&self, _header: &GameHeader) {}
    fn move_played(&self, _header: &GameHeader, _mv: &MoveRecord, _fen: &str) {}
    fn game_finished(&self, _record: &GameRecord) {}
}

/// 何もしない
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl GameObserver for NullObserver {}

/// log に流す
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl GameObserver for LogObserver {
    fn game_started(&self, header: &GameHeader) {
        log::info!(
            "game {} (round {}) started: {} vs {}",
            header.game_id,
            header.round,
            header.white,
            header.black
        );
    }

    fn move_played(&self, header: &GameHeader, mv: &MoveRecord, _fen: &str) {
        let score = mv
            .eval
            .as_ref()
            .and_then(|e| e.score())
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        log::debug!(
            "game {} ply {} {} {} ({} ms, score {score})",
            header.game_id,
            mv.ply,
            mv.side,
            mv.san.as_deref().unwrap_or(&mv.mv),
            mv.elapsed_ms
        );
    }

    fn game_finished(&self, record: &GameRecord) {
        log::info!(
            "game {} finished: {} vs {} {}",
            record.game_id,
            record.white,
            record.black,
            record.result
        );
    }
}

#[derive(Clone, Debug)]
pub enum ObserverEvent {
    Started(GameHeader),
    Move {
        game_id: u64,
        mv: MoveRecord,
        fen: String,
    },
    Finished(Box<GameRecord>),
}

/// crossbeam チャネルへ転送する（UI スレッド向け）。受信側がいなくなっても対局は止めない。
#[derive(Clone, Debug)]
pub struct ChannelObserver {
    tx: chan::Sender<ObserverEvent>,
}

impl ChannelObserver {
    pub fn new(tx: chan::Sender<ObserverEvent>) -> Self {
        Self { tx }
    }

    pub fn unbounded() -> (Self, chan::Receiver<ObserverEvent>) {
        let (tx, rx) = chan::unbounded();
        (Self { tx }, rx)
    }
}

impl GameObserver for ChannelObserver {
    fn game_started(&self, header: &GameHeader) {
        let _ = self.tx.send(ObserverEvent::Started(header.clone()));
    }

    fn move_played(&self, header: &GameHeader, mv: &MoveRecord, fen: &str) {
        let _ = self.tx.send(ObserverEvent::Move {
            game_id: header.game_id,
            mv: mv.clone(),
            fen: fen.to_string(),
        });
    }

    fn game_finished(&self, record: &GameRecord) {
        let _ = self.tx.send(ObserverEvent::Finished(Box::new(record.clone())));
    }
}

/// 複数の observer へ配る
#[derive(Default)]
pub struct ObserverSet {
    observers: Vec<Box<dyn GameObserver>>,
}

impl ObserverSet {
    pub fn push(&mut self, observer: impl GameObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl GameObserver for ObserverSet {
    fn game_started(&self, header: &GameHeader) {
        for o in &self.observers {
            o.game_started(header);
        }
    }

    fn move_played(&self, header: &GameHeader, mv: &MoveRecord, fen: &str) {
        for o in &self.observers {
            o.move_played(header, mv, fen);
        }
    }

    fn game_finished(&self, record: &GameRecord) {
        for o in &self.observers {
            o.game_finished(record);
        }
    }
}

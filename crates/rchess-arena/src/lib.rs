//! チェスエンジン同士の対局・トーナメント運営ライブラリ
//!
//! UCI / Xboard の両プロトコルでエンジンを動かし、持ち時間の管理・裁定・組み合わせ生成・
//! 並列実行までを受け持つ。盤面の合法手判定は [`board::BoardService`] の向こう側に委ねる。

pub mod adjudication;
pub mod board;
pub mod clock;
pub mod config;
pub mod error;
pub mod game;
pub mod observer;
pub mod opening;
pub mod options;
pub mod pairing;
pub mod process;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod sprt;
pub mod standings;
pub mod time_control;
pub mod types;

pub use config::{ArenaConfig, EngineConfiguration, EngineStore};
pub use error::{ArenaError, BoardError, ConfigError, OpeningError, ProtocolError, SinkError, SpawnError};
pub use game::{CancelToken, GameCoordinator, GameEnv, GameRecord, GameSpec};
pub use scheduler::{
    AbortHandle, GameExecutor, GameServices, MatchExecutor, RecoveryPolicy, Scheduler,
    SchedulerSettings, TournamentReport,
};
pub use session::{EngineSession, Player};
pub use time_control::TimeControl;
pub use types::{GameResult, MoveRecord, Outcome, Side, Termination};

use std::path::PathBuf;
use std::time::Duration;

/// エンジンの起動に失敗した。設定ミスとして扱い、自動リトライしない。
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    #[error("engine executable not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to spawn {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command}: child process has no {pipe} pipe")]
    MissingPipe { command: String, pipe: &'static str },
}

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("{engine}: no reply to `{waiting_for}` within {timeout:?}")]
    HandshakeTimeout {
        engine: String,
        waiting_for: String,
        timeout: Duration,
    },
    #[error("{engine}: malformed reply `{line}`")]
    Malformed { engine: String, line: String },
    #[error("{engine}: {request} is not supported by this engine")]
    Unsupported { engine: String, request: String },
    #[error("{engine}: process exited during handshake (code {code:?})")]
    Exited { engine: String, code: Option<i32> },
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

#[derive(thiserror::Error, Debug)]
pub enum BoardError {
    #[error("invalid FEN `{fen}`: {reason}")]
    InvalidFen { fen: String, reason: String },
    #[error("unsupported variant `{0}`")]
    UnsupportedVariant(String),
    #[error("illegal move `{mv}` in position {fen}")]
    IllegalMove { mv: String, fen: String },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error("invalid time control `{0}`")]
    TimeControl(String),
    #[error("unknown engine `{0}`")]
    UnknownEngine(String),
    #[error("duplicate engine name `{0}`")]
    DuplicateEngine(String),
    #[error("{0}")]
    Invalid(String),
}

#[derive(thiserror::Error, Debug)]
pub enum OpeningError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{path}:{line}: {reason}")]
    Parse {
        path: String,
        line: usize,
        reason: String,
    },
    #[error("opening suite {0} contains no usable positions")]
    Empty(String),
}

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// トーナメント全体に伝播するエラー。
///
/// 対局中の異常はここには来ない（GameResult に変換される）。
#[derive(thiserror::Error, Debug)]
pub enum ArenaError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Opening(#[from] OpeningError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("pairing {pairing}: {engine} crashed {attempts} times, giving up")]
    RetryExhausted {
        pairing: usize,
        engine: String,
        attempts: u32,
    },
    #[error("pairing generation failed: {0}")]
    PairingGeneration(String),
    #[error("pairing {pairing}: worker panicked: {message}")]
    WorkerPanicked { pairing: usize, message: String },
    #[error("all workers exited before the tournament finished")]
    WorkersExited,
    #[error("tournament aborted")]
    Aborted,
}

pub type Result<T, E = ArenaError> = std::result::Result<T, E>;

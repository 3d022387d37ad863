//! スクリプトエンジンを使う結合テストの共通部品

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use rchess_arena::adjudication::AdjudicationConfig;
use rchess_arena::board::StandardBoardProvider;
use rchess_arena::observer::NullObserver;
use rchess_arena::protocol::ProtocolKind;
use rchess_arena::{EngineConfiguration, EngineStore, GameServices};

pub const TC: &str = "30+1";

pub fn script(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("engines").join(name)
}

/// `sh <script> [args...]` で起動するエンジン設定
pub fn scripted(name: &str, protocol: ProtocolKind, args: &[String]) -> EngineConfiguration {
    let file = match protocol {
        ProtocolKind::Uci => "fools_mate_uci.sh",
        ProtocolKind::Xboard => "fools_mate_xboard.sh",
    };
    let mut config = EngineConfiguration::new(name, "sh");
    config.args = std::iter::once(script(file).display().to_string())
        .chain(args.iter().cloned())
        .collect();
    config.protocol = protocol;
    config
}

pub fn uci(name: &str) -> EngineConfiguration {
    scripted(name, ProtocolKind::Uci, &[])
}

pub fn xboard(name: &str) -> EngineConfiguration {
    scripted(name, ProtocolKind::Xboard, &[])
}

pub fn store(engines: Vec<EngineConfiguration>) -> Arc<EngineStore> {
    Arc::new(EngineStore::new(engines, Some(TC)).expect("engine store"))
}

pub fn services() -> Arc<GameServices> {
    Arc::new(GameServices {
        boards: Box::new(StandardBoardProvider),
        adjudication: AdjudicationConfig::default(),
        oracle: None,
        observer: Box::new(NullObserver),
        tap: None,
    })
}

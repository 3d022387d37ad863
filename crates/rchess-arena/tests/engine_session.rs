//! 実プロセスを起動してハンドシェイクと終了処理を確認する

#![cfg(unix)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rchess_arena::EngineSession;
use rchess_arena::options::OptionKind;
use rchess_arena::process::WireDirection;

#[test]
fn uci_handshake_reports_identity_and_options() {
    let session = EngineSession::start(Arc::new(common::uci("alpha")), None).unwrap();
    let caps = session.capabilities();
    assert_eq!(caps.name.as_deref(), Some("Fools Mate"));
    assert_eq!(caps.author.as_deref(), Some("arena tests"));
    assert_eq!(caps.options.len(), 2);
    assert_eq!(
        caps.options[0].kind,
        OptionKind::Spin {
            default: 16,
            min: 1,
            max: 1024
        }
    );
    match &caps.options[1].kind {
        OptionKind::Combo { default, choices } => {
            assert_eq!(default, "Normal");
            assert_eq!(choices, &["Solid", "Normal", "Risky"]);
        }
        other => panic!("unexpected option kind {other:?}"),
    }
    assert!(!session.needs_restart());
    session.quit(Duration::from_millis(500));
}

#[test]
fn xboard_handshake_reads_features() {
    let session = EngineSession::start(Arc::new(common::xboard("beta")), None).unwrap();
    let caps = session.capabilities();
    assert_eq!(caps.name.as_deref(), Some("Fools Mate XB"));
    assert!(caps.usermove);
    assert!(caps.ping);
    assert!(caps.setboard);
    session.quit(Duration::from_millis(500));
}

#[test]
fn wire_tap_sees_both_directions() {
    let lines: Arc<Mutex<Vec<(WireDirection, String)>>> = Arc::default();
    let sink = Arc::clone(&lines);
    let tap = move |_engine: &str, dir: WireDirection, line: &str| {
        sink.lock().unwrap().push((dir, line.to_string()));
    };
    let mut session = EngineSession::start(Arc::new(common::uci("alpha")), Some(Arc::new(tap))).unwrap();
    session.sync().unwrap();
    session.quit(Duration::from_millis(500));

    let lines = lines.lock().unwrap();
    assert!(lines.contains(&(WireDirection::ToEngine, "uci".to_string())));
    assert!(lines.contains(&(WireDirection::FromEngine, "uciok".to_string())));
    assert!(lines.contains(&(WireDirection::ToEngine, "isready".to_string())));
    assert!(lines.contains(&(WireDirection::FromEngine, "readyok".to_string())));
}

#[test]
fn missing_binary_is_a_spawn_error() {
    let config = rchess_arena::EngineConfiguration::new("ghost", "/nonexistent/rchess-arena-engine");
    let err = EngineSession::start(Arc::new(config), None).err().unwrap();
    assert!(matches!(err, rchess_arena::ProtocolError::Spawn(_)), "{err}");
}

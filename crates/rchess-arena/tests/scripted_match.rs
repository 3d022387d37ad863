//! スクリプトエンジン同士で対局・トーナメントを通しで回す

#![cfg(unix)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rchess_arena::adjudication::AdjudicationConfig;
use rchess_arena::board::StandardBoardProvider;
use rchess_arena::config::{RecoveryMode, TournamentSection};
use rchess_arena::observer::NullObserver;
use rchess_arena::opening::{Opening, StartPosition};
use rchess_arena::pairing::{Format, Pairing, create_generator};
use rchess_arena::process::{WireDirection, WireTap};
use rchess_arena::protocol::ProtocolKind;
use rchess_arena::scheduler::MatchTicket;
use rchess_arena::sink::MemorySink;
use rchess_arena::{
    CancelToken, EngineSession, GameCoordinator, GameEnv, GameExecutor, GameSpec, MatchExecutor,
    Outcome, RecoveryPolicy, Scheduler, SchedulerSettings, Side, Termination, TimeControl,
};

fn spec(game_id: u64) -> GameSpec {
    let tc = TimeControl::parse(common::TC).unwrap();
    GameSpec::new(game_id, "standard", Opening::startpos(), tc, tc)
}

fn ticket(spec: GameSpec) -> MatchTicket {
    MatchTicket {
        pairing: Pairing {
            id: 0,
            round: 1,
            white: 0,
            black: 1,
            encounter: 0,
            game_in_encounter: 0,
        },
        spec,
    }
}

fn play_once(white: &mut EngineSession, black: &mut EngineSession) -> rchess_arena::GameRecord {
    let adjudication = AdjudicationConfig::default();
    let cancel = CancelToken::new();
    let env = GameEnv {
        boards: &StandardBoardProvider,
        adjudication: &adjudication,
        oracle: None,
        observer: &NullObserver,
        cancel: &cancel,
    };
    GameCoordinator::new(spec(1), white, black, env)
        .and_then(GameCoordinator::run)
        .unwrap()
}

#[test]
fn uci_pair_plays_fools_mate() {
    let mut white = EngineSession::start(Arc::new(common::uci("alpha")), None).unwrap();
    let mut black = EngineSession::start(Arc::new(common::uci("beta")), None).unwrap();
    let record = play_once(&mut white, &mut black);

    let moves: Vec<&str> = record.moves.iter().map(|m| m.mv.as_str()).collect();
    assert_eq!(moves, ["f2f3", "e7e5", "g2g4", "d8h4"]);
    assert_eq!(record.moves[3].san.as_deref(), Some("Qh4#"));
    assert_eq!(record.result.outcome, Outcome::BlackWins);
    assert_eq!(record.result.termination, Termination::Checkmate);
    assert_eq!(record.white, "alpha");
    assert_eq!(record.black, "beta");
    let eval = record.moves[0].eval.as_ref().expect("eval from info line");
    assert_eq!(eval.score_cp, Some(20));
    assert_eq!(eval.depth, Some(5));
    assert!(record.crashed.is_none());

    // 同じセッションで 2 局目も指せる
    let again = play_once(&mut white, &mut black);
    assert_eq!(again.plies(), 4);
    white.quit(Duration::from_millis(500));
    black.quit(Duration::from_millis(500));
}

#[test]
fn uci_against_xboard() {
    let mut white = EngineSession::start(Arc::new(common::uci("uci")), None).unwrap();
    let mut black = EngineSession::start(Arc::new(common::xboard("xb")), None).unwrap();
    let record = play_once(&mut white, &mut black);
    assert_eq!(record.result.winner(), Some(Side::Black));
    assert_eq!(record.result.termination, Termination::Checkmate);
    assert_eq!(record.plies(), 4);
    white.quit(Duration::from_millis(500));
    black.quit(Duration::from_millis(500));
}

#[test]
fn round_robin_swaps_colors_between_games() {
    let store = common::store(vec![common::uci("alpha"), common::xboard("beta")]);
    let section = TournamentSection {
        format: Format::RoundRobin,
        games_per_encounter: 2,
        ..TournamentSection::default()
    };
    let generator = create_generator(&section, store.len()).unwrap();
    let settings = SchedulerSettings {
        name: "scripted".to_string(),
        variant: "standard".to_string(),
        rounds: 1,
        games_per_encounter: 2,
        concurrency: 2,
        wait_between_games: Duration::ZERO,
        repeat_openings: false,
        openings: None,
        sprt: None,
    };
    let scheduler = Scheduler::new(settings, Arc::clone(&store), generator, Box::new(StartPosition));
    let services = common::services();

    let mut sink = MemorySink::default();
    let mut seen = 0;
    let report = scheduler
        .run(
            |_| -> Box<dyn MatchExecutor> {
                Box::new(GameExecutor::new(
                    Arc::clone(&store),
                    Arc::clone(&services),
                    RecoveryPolicy::disabled(),
                ))
            },
            &mut sink,
            &mut |_, _| seen += 1,
        )
        .unwrap();

    assert_eq!(seen, 2);
    assert_eq!(report.games, 2);
    assert!(report.errors.is_empty());
    assert!(!report.aborted);
    assert_eq!(sink.games.len(), 2);
    assert_eq!(sink.meta.as_ref().map(|m| m.engines.len()), Some(2));
    // 台本どおりなら常に黒が勝つので 1 勝 1 敗
    let score = report.standings.pair(0, 1);
    assert_eq!((score.wins, score.losses, score.draws), (1, 1, 0));
    let whites: Vec<&str> = sink.games.iter().map(|g| g.white.as_str()).collect();
    assert!(whites.contains(&"alpha") && whites.contains(&"beta"));
}

fn crash_once_ticket(mode: RecoveryMode) -> (tempfile::TempDir, rchess_arena::GameRecord) {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("crashed").display().to_string();
    let store = common::store(vec![
        common::scripted("fragile", ProtocolKind::Uci, &[marker]),
        common::uci("steady"),
    ]);
    let recovery = RecoveryPolicy {
        enabled: true,
        max_retries: 2,
        mode,
    };
    let mut executor = GameExecutor::new(store, common::services(), recovery);
    let record = match executor.play(&ticket(spec(1)), &CancelToken::new()) {
        Ok(record) => record,
        Err(_) => panic!("recovery should finish the game"),
    };
    executor.shutdown();
    (dir, record)
}

#[test]
fn crashed_engine_is_restarted_and_game_replayed() {
    let (dir, record) = crash_once_ticket(RecoveryMode::Replay);
    assert!(dir.path().join("crashed").exists());
    assert_eq!(record.result.termination, Termination::Checkmate);
    assert_eq!(record.result.outcome, Outcome::BlackWins);
    assert_eq!(record.plies(), 4);
    assert!(record.crashed.is_none());
}

#[test]
fn crashed_engine_resumes_from_recorded_moves() {
    let (_dir, record) = crash_once_ticket(RecoveryMode::Resume);
    let moves: Vec<&str> = record.moves.iter().map(|m| m.mv.as_str()).collect();
    assert_eq!(moves, ["f2f3", "e7e5", "g2g4", "d8h4"]);
    assert_eq!(record.result.termination, Termination::Checkmate);
}

#[test]
fn fen_opening_without_setboard_ends_without_result() {
    let store = common::store(vec![
        common::scripted("plain", ProtocolKind::Xboard, &["0".to_string()]),
        common::uci("steady"),
    ]);
    let mut executor = GameExecutor::new(store, common::services(), RecoveryPolicy::disabled());
    let mut fen_spec = spec(1);
    fen_spec.opening = Opening {
        fen: Some("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1".to_string()),
        ..Opening::startpos()
    };
    let record = match executor.play(&ticket(fen_spec), &CancelToken::new()) {
        Ok(record) => record,
        Err(e) => panic!("setup failure should not stop the tournament: {e:?}"),
    };
    assert_eq!(record.result.outcome, Outcome::Unresolved);
    assert_eq!(record.result.termination, Termination::NoResult);
    assert!(record.result.detail.as_deref().unwrap().contains("setboard"));
    assert_eq!(record.plies(), 0);

    // 同じ実行器で通常の対局は続けられる
    let record = match executor.play(&ticket(spec(2)), &CancelToken::new()) {
        Ok(record) => record,
        Err(e) => panic!("second game failed: {e:?}"),
    };
    assert_eq!(record.result.termination, Termination::Checkmate);
    executor.shutdown();
}

#[test]
fn ponder_setting_decides_hard_or_easy() {
    let sent: Arc<Mutex<Vec<(String, String)>>> = Arc::default();
    let seen = Arc::clone(&sent);
    let tap: Arc<dyn WireTap> = Arc::new(move |engine: &str, dir: WireDirection, line: &str| {
        if dir == WireDirection::ToEngine {
            seen.lock().unwrap().push((engine.to_string(), line.to_string()));
        }
    });
    let calm = common::xboard("calm");
    let mut busy = common::xboard("busy");
    busy.ponder = true;
    let mut white = EngineSession::start(Arc::new(calm), Some(Arc::clone(&tap))).unwrap();
    let mut black = EngineSession::start(Arc::new(busy), Some(tap)).unwrap();
    let record = play_once(&mut white, &mut black);
    assert_eq!(record.result.termination, Termination::Checkmate);
    white.quit(Duration::from_millis(500));
    black.quit(Duration::from_millis(500));

    let sent = sent.lock().unwrap();
    let lines = |engine: &str| -> Vec<&str> {
        sent.iter()
            .filter(|(e, _)| e == engine)
            .map(|(_, l)| l.as_str())
            .collect()
    };
    assert!(lines("calm").contains(&"easy"), "{:?}", lines("calm"));
    assert!(!lines("calm").contains(&"hard"));
    assert!(lines("busy").contains(&"hard"), "{:?}", lines("busy"));
}

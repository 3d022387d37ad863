//! トーナメントの進行。
//!
//! メインループだけが [`TournamentState`] を書き換える。ワーカーとはランデブーチャネルでつながり、
//! 「次のチケットを渡す」と「結果を受け取る」を `select!` で多重化する。ワーカーは
//! `concurrency` 本だけ立てるので、同時に進む対局数もそれで頭打ちになる。

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam_channel as chan;
use serde::Serialize;

use crate::adjudication::{AdjudicationConfig, TablebaseOracle};
use crate::board::BoardProvider;
use crate::config::{ArenaConfig, EngineStore, RecoveryMode, TournamentSection};
use crate::error::{ArenaError, ProtocolError};
use crate::game::{CancelToken, GameCoordinator, GameEnv, GameRecord, GameSpec};
use crate::observer::GameObserver;
use crate::opening::{Opening, OpeningSource};
use crate::pairing::{Format, NextPairing, Pairing, PairingGenerator, PairingOutcome};
use crate::process::{DEFAULT_GRACE, WireTap};
use crate::session::EngineSession;
use crate::sink::{ResultSink, TournamentMeta};
use crate::sprt::{SprtConfig, SprtStatus, sprt_status};
use crate::standings::Standings;
use crate::types::Side;

/// 中断フラグと結果待ちの確認間隔
const ABORT_POLL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// 設定
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    pub name: String,
    pub variant: String,
    pub rounds: u32,
    pub games_per_encounter: u32,
    pub concurrency: usize,
    pub wait_between_games: Duration,
    /// エンカウンター内で同じ開始局面を先後入れ替えて使う
    pub repeat_openings: bool,
    pub openings: Option<String>,
    pub sprt: Option<SprtConfig>,
}

impl SchedulerSettings {
    pub fn from_config(config: &ArenaConfig) -> Self {
        let t = &config.tournament;
        Self {
            name: t.name.clone(),
            variant: t.variant.clone(),
            rounds: t.rounds,
            games_per_encounter: t.games_per_encounter,
            concurrency: t.concurrency,
            wait_between_games: Duration::from_millis(t.wait_between_games_ms),
            repeat_openings: config.openings.as_ref().is_some_and(|o| o.repeat),
            openings: config.openings.as_ref().map(|o| o.file.display().to_string()),
            sprt: config.sprt.clone(),
        }
    }
}

/// クラッシュ時の再起動方針
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub mode: RecoveryMode,
}

impl RecoveryPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            mode: RecoveryMode::Replay,
        }
    }

    pub fn from_section(section: &TournamentSection) -> Self {
        Self {
            enabled: section.recover,
            max_retries: section.max_retries,
            mode: section.recovery_mode,
        }
    }
}

/// トーナメントを外から止めるためのハンドル。進行中の対局は結果を捨てて終わる。
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(CancelToken);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.0.is_cancelled()
    }

    pub fn token(&self) -> &CancelToken {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// ワーカーとの受け渡し
// ---------------------------------------------------------------------------

/// 1 局分の作業単位
#[derive(Clone, Debug)]
pub struct MatchTicket {
    pub pairing: Pairing,
    pub spec: GameSpec,
}

/// 対局が結果を残せなかった理由
#[derive(Debug)]
pub enum MatchFailure {
    /// 中断された。結果は捨てる。
    Cancelled,
    /// このカードだけ打ち切る（再試行上限など）
    Abandoned {
        error: ArenaError,
        loser: Option<Side>,
    },
    /// 設定の誤り。トーナメント全体を止める。
    Fatal(ArenaError),
}

/// ワーカー 1 本が持つ対局実行器
pub trait MatchExecutor: Send {
    fn play(&mut self, ticket: &MatchTicket, cancel: &CancelToken)
    -> Result<GameRecord, MatchFailure>;

    /// ワーカー終了時に呼ばれる
    fn shutdown(&mut self) {}
}

struct WorkerReport {
    ticket: MatchTicket,
    outcome: Result<GameRecord, MatchFailure>,
}

fn worker_main(
    mut executor: Box<dyn MatchExecutor>,
    rx: chan::Receiver<Option<MatchTicket>>,
    tx: chan::Sender<WorkerReport>,
    cancel: CancelToken,
    wait: Duration,
) {
    while let Ok(Some(ticket)) = rx.recv() {
        let outcome = if cancel.is_cancelled() {
            Err(MatchFailure::Cancelled)
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| executor.play(&ticket, &cancel))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!("worker panicked in pairing {}: {message}", ticket.pairing.id);
                    // パニックした実行器は使い回さない（drop でエンジンも止まる）
                    let error = ArenaError::WorkerPanicked {
                        pairing: ticket.pairing.id,
                        message,
                    };
                    let outcome = Err(MatchFailure::Abandoned { error, loser: None });
                    let _ = tx.send(WorkerReport { ticket, outcome });
                    return;
                }
            }
        };
        if tx.send(WorkerReport { ticket, outcome }).is_err() {
            break;
        }
        if !wait.is_zero() && !cancel.is_cancelled() {
            thread::sleep(wait);
        }
    }
    executor.shutdown();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// 状態と結果
// ---------------------------------------------------------------------------

/// 打ち切られたカードの記録。トーナメント自体は続く。
#[derive(Clone, Debug, Serialize)]
pub struct TournamentError {
    pub pairing: usize,
    pub round: u32,
    pub white: String,
    pub black: String,
    pub message: String,
}

#[derive(Debug)]
pub struct TournamentState {
    pub expected_games: Option<usize>,
    /// 対局中のカード（id → カード）
    pub in_progress: BTreeMap<usize, Pairing>,
    pub completed: usize,
    pub standings: Standings,
    pub errors: Vec<TournamentError>,
    pub sprt: Option<SprtStatus>,
    pub started: Instant,
}

#[derive(Debug)]
pub struct TournamentReport {
    pub name: String,
    pub format: Format,
    pub games: usize,
    pub standings: Standings,
    pub errors: Vec<TournamentError>,
    pub sprt: Option<SprtStatus>,
    pub champion: Option<String>,
    pub aborted: bool,
    pub elapsed: Duration,
}

enum LoopEvent {
    Dispatched,
    Report(WorkerReport),
    WorkersGone,
    Idle,
}

// ---------------------------------------------------------------------------
// スケジューラ
// ---------------------------------------------------------------------------

pub struct Scheduler {
    settings: SchedulerSettings,
    store: Arc<EngineStore>,
    generator: Box<dyn PairingGenerator>,
    openings: Box<dyn OpeningSource>,
    /// repeat 時にエンカウンターの 2 局目へ渡す開始局面
    encounter_openings: HashMap<usize, Opening>,
    abort: AbortHandle,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        store: Arc<EngineStore>,
        generator: Box<dyn PairingGenerator>,
        openings: Box<dyn OpeningSource>,
    ) -> Self {
        Self {
            settings,
            store,
            generator,
            openings,
            encounter_openings: HashMap::new(),
            abort: AbortHandle::default(),
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    fn meta(&self) -> TournamentMeta {
        TournamentMeta {
            name: self.settings.name.clone(),
            format: self.generator.format().label().to_string(),
            engines: self.store.names(),
            rounds: self.settings.rounds,
            games_per_encounter: self.settings.games_per_encounter,
            concurrency: self.settings.concurrency,
            timestamp: Local::now().to_rfc3339(),
            openings: self.settings.openings.clone(),
        }
    }

    fn opening_for(&mut self, pairing: &Pairing) -> Opening {
        if self.settings.repeat_openings && pairing.game_in_encounter % 2 == 1 {
            if let Some(opening) = self.encounter_openings.remove(&pairing.encounter) {
                return opening;
            }
        }
        let opening = self.openings.next_opening();
        if self.settings.repeat_openings {
            self.encounter_openings
                .insert(pairing.encounter, opening.clone());
        }
        opening
    }

    fn ticket_for(&mut self, pairing: Pairing) -> Result<MatchTicket, ArenaError> {
        let tc = |idx: usize| {
            self.store.get(idx).map(|e| e.time_control).ok_or_else(|| {
                ArenaError::PairingGeneration(format!("pairing refers to unknown engine #{idx}"))
            })
        };
        let (white_tc, black_tc) = (tc(pairing.white)?, tc(pairing.black)?);
        let opening = self.opening_for(&pairing);
        let mut spec = GameSpec::new(
            pairing.id as u64 + 1,
            self.settings.variant.clone(),
            opening,
            white_tc,
            black_tc,
        );
        spec.round = pairing.round;
        Ok(MatchTicket { pairing, spec })
    }

    fn engine_name(&self, idx: usize) -> String {
        self.store
            .get(idx)
            .map_or_else(|| format!("#{idx}"), |e| e.config.name.clone())
    }

    /// 結果 1 件を反映する。SPRT が決着したら true。
    fn process_report(
        &mut self,
        report: WorkerReport,
        state: &mut TournamentState,
        sink: &mut dyn ResultSink,
        on_result: &mut dyn FnMut(&TournamentState, &GameRecord),
    ) -> Result<bool, ArenaError> {
        let pairing = report.ticket.pairing;
        state.in_progress.remove(&pairing.id);
        match report.outcome {
            Ok(record) => {
                sink.write_game(&record)?;
                let outcome = record.result.outcome;
                state.standings.record(pairing.white, pairing.black, outcome);
                self.generator
                    .record_result(&pairing, PairingOutcome::Played(outcome));
                state.completed += 1;
                let mut decided = false;
                // 一度決着したら以後の結果で判定を動かさない
                let settled = state.sprt.is_some_and(|s| s.decision.is_final());
                if let Some(config) = self.settings.sprt.as_ref().filter(|_| !settled) {
                    let status = sprt_status(config, &state.standings.pair(0, 1));
                    decided = status.decision.is_final();
                    state.sprt = Some(status);
                }
                on_result(state, &record);
                Ok(decided)
            }
            Err(MatchFailure::Cancelled) => {
                log::debug!("pairing {}: cancelled, result discarded", pairing.id);
                Ok(false)
            }
            Err(MatchFailure::Abandoned { error, loser }) => {
                log::error!("pairing {} abandoned: {error}", pairing.id);
                state.errors.push(TournamentError {
                    pairing: pairing.id,
                    round: pairing.round,
                    white: self.engine_name(pairing.white),
                    black: self.engine_name(pairing.black),
                    message: error.to_string(),
                });
                self.generator
                    .record_result(&pairing, PairingOutcome::Aborted { loser });
                Ok(false)
            }
            Err(MatchFailure::Fatal(error)) => Err(error),
        }
    }

    /// 全カードを消化するか中断されるまで回す。
    ///
    /// `make_executor` はワーカーごとに 1 回呼ばれる。`on_result` は結果を反映するたびに呼ばれる。
    pub fn run<F>(
        mut self,
        mut make_executor: F,
        sink: &mut dyn ResultSink,
        on_result: &mut dyn FnMut(&TournamentState, &GameRecord),
    ) -> Result<TournamentReport, ArenaError>
    where
        F: FnMut(usize) -> Box<dyn MatchExecutor>,
    {
        let concurrency = self.settings.concurrency.max(1);
        sink.tournament_started(&self.meta())?;
        log::info!(
            "{}: {} with {} engines, concurrency={concurrency}",
            self.settings.name,
            self.generator.format().label(),
            self.store.len()
        );

        // チャネルの作成（ランデブー）
        let (ticket_tx, ticket_rx) = chan::bounded::<Option<MatchTicket>>(0);
        let (report_tx, report_rx) = chan::bounded::<WorkerReport>(0);

        // ワーカースレッドの起動
        let mut handles = Vec::with_capacity(concurrency);
        for worker in 0..concurrency {
            let executor = make_executor(worker);
            let rx = ticket_rx.clone();
            let tx = report_tx.clone();
            let cancel = self.abort.token().clone();
            let wait = self.settings.wait_between_games;
            handles.push(thread::spawn(move || {
                worker_main(executor, rx, tx, cancel, wait);
            }));
        }
        // メインスレッドは受信側・送信側の片割れを持たない
        drop(ticket_rx);
        drop(report_tx);

        let mut state = TournamentState {
            expected_games: self.generator.expected_games(),
            in_progress: BTreeMap::new(),
            completed: 0,
            standings: Standings::new(self.store.names()),
            errors: Vec::new(),
            sprt: None,
            started: Instant::now(),
        };
        let mut next: Option<MatchTicket> = None;
        let mut exhausted = false;
        let mut stopping = false;
        let mut fatal: Option<ArenaError> = None;

        // メインイベントループ
        loop {
            if self.abort.is_aborted() && !stopping {
                log::warn!(
                    "tournament aborted, waiting for {} running game(s)",
                    state.in_progress.len()
                );
                stopping = true;
            }
            if stopping {
                next = None;
            } else if next.is_none() && !exhausted {
                match self.generator.next_pairing() {
                    NextPairing::Ready(pairing) => match self.ticket_for(pairing) {
                        Ok(ticket) => next = Some(ticket),
                        Err(e) => {
                            fatal.get_or_insert(e);
                            self.abort.abort();
                            stopping = true;
                        }
                    },
                    NextPairing::Wait => {}
                    NextPairing::Finished => exhausted = true,
                }
            }
            if next.is_none() && state.in_progress.is_empty() {
                if !exhausted && !stopping {
                    log::error!("pairing generator is waiting but no game is running");
                }
                break;
            }

            let event = match next.take() {
                Some(ticket) => {
                    chan::select! {
                        send(ticket_tx, Some(ticket.clone())) -> res => match res {
                            Ok(()) => {
                                log::debug!(
                                    "pairing {} dispatched: {} vs {}",
                                    ticket.pairing.id,
                                    self.engine_name(ticket.pairing.white),
                                    self.engine_name(ticket.pairing.black)
                                );
                                state.in_progress.insert(ticket.pairing.id, ticket.pairing);
                                LoopEvent::Dispatched
                            }
                            Err(_) => LoopEvent::WorkersGone,
                        },
                        recv(report_rx) -> report => {
                            next = Some(ticket);
                            report.map_or(LoopEvent::WorkersGone, LoopEvent::Report)
                        },
                        default(ABORT_POLL) => {
                            next = Some(ticket);
                            LoopEvent::Idle
                        },
                    }
                }
                None => {
                    chan::select! {
                        recv(report_rx) -> report => {
                            report.map_or(LoopEvent::WorkersGone, LoopEvent::Report)
                        },
                        default(ABORT_POLL) => LoopEvent::Idle,
                    }
                }
            };

            match event {
                LoopEvent::Report(report) => {
                    match self.process_report(report, &mut state, sink, on_result) {
                        Ok(true) if !stopping => {
                            if let Some(status) = &state.sprt {
                                log::info!(
                                    "SPRT {} (llr {:.2}, bounds [{:.2}, {:.2}]), no new games",
                                    status.decision.label(),
                                    status.llr,
                                    status.lower,
                                    status.upper
                                );
                            }
                            stopping = true;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::error!("stopping tournament: {e}");
                            fatal.get_or_insert(e);
                            self.abort.abort();
                            stopping = true;
                        }
                    }
                }
                LoopEvent::WorkersGone => {
                    log::error!(
                        "all workers exited unexpectedly ({} game(s) still in progress)",
                        state.in_progress.len()
                    );
                    fatal.get_or_insert(ArenaError::WorkersExited);
                    break;
                }
                LoopEvent::Dispatched | LoopEvent::Idle => {}
            }
        }

        // ワーカーを停止
        for _ in 0..handles.len() {
            if ticket_tx.send(None).is_err() {
                break;
            }
        }
        drop(ticket_tx);
        for (worker, h) in handles.into_iter().enumerate() {
            if let Err(payload) = h.join() {
                log::error!("worker {worker} panicked: {}", panic_message(payload.as_ref()));
            }
        }

        let finish = sink.finish();
        if let Some(e) = fatal {
            return Err(e);
        }
        finish?;

        Ok(TournamentReport {
            name: self.settings.name.clone(),
            format: self.generator.format(),
            games: state.completed,
            champion: self.generator.champion().map(|i| self.engine_name(i)),
            standings: state.standings,
            errors: state.errors,
            sprt: state.sprt,
            aborted: self.abort.is_aborted(),
            elapsed: state.started.elapsed(),
        })
    }
}

// ---------------------------------------------------------------------------
// 実エンジンでの対局
// ---------------------------------------------------------------------------

/// 全ワーカーで共有する外部コラボレータ
pub struct GameServices {
    pub boards: Box<dyn BoardProvider>,
    pub adjudication: AdjudicationConfig,
    pub oracle: Option<Box<dyn TablebaseOracle>>,
    pub observer: Box<dyn GameObserver>,
    pub tap: Option<Arc<dyn WireTap>>,
}

impl GameServices {
    fn env<'a>(&'a self, cancel: &'a CancelToken) -> GameEnv<'a> {
        GameEnv {
            boards: self.boards.as_ref(),
            adjudication: &self.adjudication,
            oracle: self.oracle.as_deref(),
            observer: self.observer.as_ref(),
            cancel,
        }
    }
}

enum Attempt {
    Finished(GameRecord),
    /// エンジンの起動・ハンドシェイクに失敗した側
    StartFailed(Side, ProtocolError),
    Failed(ArenaError),
}

/// エンジンプロセスを抱えて対局を実行する。セッションはこのワーカー専用で、
/// 再起動方針に従って対局をまたいで使い回す。
pub struct GameExecutor {
    store: Arc<EngineStore>,
    services: Arc<GameServices>,
    recovery: RecoveryPolicy,
    sessions: Vec<Option<EngineSession>>,
}

impl GameExecutor {
    pub fn new(store: Arc<EngineStore>, services: Arc<GameServices>, recovery: RecoveryPolicy) -> Self {
        let sessions = (0..store.len()).map(|_| None).collect();
        Self {
            store,
            services,
            recovery,
            sessions,
        }
    }

    fn checkout(&mut self, idx: usize) -> Result<EngineSession, ProtocolError> {
        match self.sessions[idx].take() {
            Some(session) if !session.needs_restart() => Ok(session),
            stale => {
                if let Some(session) = stale {
                    log::debug!(
                        "{}: restarting engine after {} games",
                        session.config().name,
                        session.games_played()
                    );
                    session.quit(DEFAULT_GRACE);
                }
                let Some(entry) = self.store.get(idx) else {
                    return Err(ProtocolError::Unsupported {
                        engine: format!("#{idx}"),
                        request: "engine lookup".to_string(),
                    });
                };
                EngineSession::start(entry.config.clone(), self.services.tap.clone())
            }
        }
    }

    fn checkin(&mut self, idx: usize, session: EngineSession) {
        if session.needs_restart() {
            session.quit(DEFAULT_GRACE);
        } else {
            self.sessions[idx] = Some(session);
        }
    }

    fn attempt(&mut self, pairing: &Pairing, spec: GameSpec, cancel: &CancelToken) -> Attempt {
        let mut white = match self.checkout(pairing.white) {
            Ok(s) => s,
            Err(e) => return Attempt::StartFailed(Side::White, e),
        };
        let mut black = match self.checkout(pairing.black) {
            Ok(s) => s,
            Err(e) => {
                self.checkin(pairing.white, white);
                return Attempt::StartFailed(Side::Black, e);
            }
        };

        let services = Arc::clone(&self.services);
        let result = GameCoordinator::new(spec, &mut white, &mut black, services.env(cancel))
            .and_then(GameCoordinator::run);
        match result {
            Err(ArenaError::Aborted) => {
                // 中断時は両方とも止める
                white.quit(DEFAULT_GRACE);
                black.quit(DEFAULT_GRACE);
                Attempt::Failed(ArenaError::Aborted)
            }
            other => {
                self.checkin(pairing.white, white);
                self.checkin(pairing.black, black);
                match other {
                    Ok(record) => Attempt::Finished(record),
                    Err(e) => Attempt::Failed(e),
                }
            }
        }
    }
}

impl MatchExecutor for GameExecutor {
    fn play(
        &mut self,
        ticket: &MatchTicket,
        cancel: &CancelToken,
    ) -> Result<GameRecord, MatchFailure> {
        let pairing = &ticket.pairing;
        let mut spec = ticket.spec.clone();
        let mut crashes = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(MatchFailure::Cancelled);
            }
            let (side, record) = match self.attempt(pairing, spec.clone(), cancel) {
                Attempt::Finished(record) => match record.crashed {
                    Some(side) if self.recovery.enabled => (side, Some(record)),
                    _ => return Ok(record),
                },
                Attempt::StartFailed(_, ProtocolError::Spawn(e)) => {
                    return Err(MatchFailure::Fatal(e.into()));
                }
                Attempt::StartFailed(side, e) if !self.recovery.enabled => {
                    return Err(MatchFailure::Abandoned {
                        error: e.into(),
                        loser: Some(side),
                    });
                }
                Attempt::StartFailed(side, e) => {
                    log::warn!("pairing {}: {e}", pairing.id);
                    (side, None)
                }
                Attempt::Failed(ArenaError::Aborted) => return Err(MatchFailure::Cancelled),
                Attempt::Failed(e) => return Err(MatchFailure::Fatal(e)),
            };

            crashes += 1;
            let engine = self
                .store
                .get(pairing.player(side))
                .map_or_else(|| side.to_string(), |e| e.config.name.clone());
            if crashes > self.recovery.max_retries {
                return Err(MatchFailure::Abandoned {
                    error: ArenaError::RetryExhausted {
                        pairing: pairing.id,
                        engine,
                        attempts: crashes,
                    },
                    loser: Some(side),
                });
            }
            log::warn!(
                "pairing {}: {engine} crashed, restarting (retry {crashes}/{})",
                pairing.id,
                self.recovery.max_retries
            );
            match (self.recovery.mode, record) {
                (RecoveryMode::Resume, Some(record)) => spec.resume = record.moves,
                (RecoveryMode::Resume, None) => {}
                (RecoveryMode::Replay, _) => spec.resume.clear(),
            }
        }
    }

    fn shutdown(&mut self) {
        for session in self.sessions.iter_mut().filter_map(Option::take) {
            session.quit(DEFAULT_GRACE);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::EngineConfiguration;
    use crate::opening::{OpeningSuite, StartPosition};
    use crate::pairing::{Knockout, SeedingPolicy, TiebreakPolicy, round_robin};
    use crate::sink::MemorySink;
    use crate::sprt::SprtDecision;
    use crate::types::{GameResult, Outcome, Termination};

    fn store(n: usize) -> Arc<EngineStore> {
        let engines = (0..n)
            .map(|i| EngineConfiguration::new(format!("e{i}"), "/bin/true"))
            .collect();
        Arc::new(EngineStore::new(engines, Some("10+0.1")).unwrap())
    }

    fn settings(concurrency: usize) -> SchedulerSettings {
        SchedulerSettings {
            name: "test".into(),
            variant: "standard".into(),
            rounds: 1,
            games_per_encounter: 1,
            concurrency,
            wait_between_games: Duration::ZERO,
            repeat_openings: false,
            openings: None,
            sprt: None,
        }
    }

    fn record(ticket: &MatchTicket, outcome: Outcome) -> GameRecord {
        let now = Local::now();
        GameRecord {
            game_id: ticket.spec.game_id,
            round: ticket.pairing.round,
            white: format!("e{}", ticket.pairing.white),
            black: format!("e{}", ticket.pairing.black),
            variant: "standard".into(),
            start_fen: None,
            opening: ticket.spec.opening.name.clone(),
            white_tc: "10+0.1".into(),
            black_tc: "10+0.1".into(),
            moves: Vec::new(),
            result: match outcome {
                Outcome::Draw => GameResult::draw(Termination::AdjudicationDraw),
                o => GameResult::new(o, Termination::Checkmate),
            },
            final_fen: String::new(),
            started_at: now,
            finished_at: now,
            crashed: None,
        }
    }

    #[derive(Clone, Default)]
    struct Tracker {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        openings: Arc<Mutex<Vec<(usize, Option<String>)>>>,
    }

    struct FakeExecutor {
        tracker: Tracker,
        hold: Duration,
        decide: fn(&Pairing) -> Outcome,
        abandon: Option<usize>,
        panic_on: Option<usize>,
        block_until_cancel: bool,
    }

    impl FakeExecutor {
        fn new(tracker: &Tracker, decide: fn(&Pairing) -> Outcome) -> Self {
            Self {
                tracker: tracker.clone(),
                hold: Duration::ZERO,
                decide,
                abandon: None,
                panic_on: None,
                block_until_cancel: false,
            }
        }
    }

    impl MatchExecutor for FakeExecutor {
        fn play(
            &mut self,
            ticket: &MatchTicket,
            cancel: &CancelToken,
        ) -> Result<GameRecord, MatchFailure> {
            let now = self.tracker.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.tracker.peak.fetch_max(now, Ordering::SeqCst);
            self.tracker
                .openings
                .lock()
                .unwrap()
                .push((ticket.pairing.encounter, ticket.spec.opening.name.clone()));
            thread::sleep(self.hold);
            while self.block_until_cancel && !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            self.tracker.running.fetch_sub(1, Ordering::SeqCst);
            if cancel.is_cancelled() {
                return Err(MatchFailure::Cancelled);
            }
            if self.panic_on == Some(ticket.pairing.id) {
                panic!("executor blew up on pairing {}", ticket.pairing.id);
            }
            if self.abandon == Some(ticket.pairing.id) {
                return Err(MatchFailure::Abandoned {
                    error: ArenaError::RetryExhausted {
                        pairing: ticket.pairing.id,
                        engine: "e1".into(),
                        attempts: 3,
                    },
                    loser: Some(Side::Black),
                });
            }
            Ok(record(ticket, (self.decide)(&ticket.pairing)))
        }
    }

    fn white_wins(_: &Pairing) -> Outcome {
        Outcome::WhiteWins
    }

    fn lower_index_wins(p: &Pairing) -> Outcome {
        if p.white < p.black {
            Outcome::WhiteWins
        } else {
            Outcome::BlackWins
        }
    }

    #[test]
    fn never_runs_more_games_than_the_concurrency_limit() {
        let tracker = Tracker::default();
        // 5 人総当たりの 1 周目から 5 局だけ取る
        let pairings: Vec<Pairing> = round_robin(5, 1, 1).pairings().take(5).cloned().collect();
        let schedule = crate::pairing::FixedSchedule::new(Format::RoundRobin, pairings);
        let scheduler = Scheduler::new(
            settings(2),
            store(5),
            Box::new(schedule),
            Box::new(StartPosition),
        );
        let mut sink = MemorySink::default();
        let mut seen = 0;
        let report = scheduler
            .run(
                |_| {
                    let mut ex = FakeExecutor::new(&tracker, white_wins);
                    ex.hold = Duration::from_millis(30);
                    Box::new(ex)
                },
                &mut sink,
                &mut |state, _| {
                    assert!(state.in_progress.len() <= 2);
                    seen += 1;
                },
            )
            .unwrap();
        assert_eq!(report.games, 5);
        assert_eq!(seen, 5);
        assert_eq!(sink.games.len(), 5);
        assert!(sink.meta.is_some());
        assert_eq!(tracker.peak.load(Ordering::SeqCst), 2);
        assert!(!report.aborted);
        assert_eq!(report.standings.games(), 5);
    }

    #[test]
    fn abandoned_pairing_is_reported_without_stopping_the_tournament() {
        let tracker = Tracker::default();
        let scheduler = Scheduler::new(
            settings(1),
            store(3),
            Box::new(round_robin(3, 1, 1)),
            Box::new(StartPosition),
        );
        let mut sink = MemorySink::default();
        let report = scheduler
            .run(
                |_| {
                    let mut ex = FakeExecutor::new(&tracker, white_wins);
                    ex.abandon = Some(1);
                    Box::new(ex)
                },
                &mut sink,
                &mut |_, _| {},
            )
            .unwrap();
        assert_eq!(report.games, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].pairing, 1);
        assert!(report.errors[0].message.contains("giving up"));
        assert_eq!(sink.games.len(), 2);
    }

    #[test]
    fn worker_panic_abandons_only_its_pairing() {
        let tracker = Tracker::default();
        let scheduler = Scheduler::new(
            settings(2),
            store(3),
            Box::new(round_robin(3, 1, 1)),
            Box::new(StartPosition),
        );
        let mut sink = MemorySink::default();
        let report = scheduler
            .run(
                |_| {
                    let mut ex = FakeExecutor::new(&tracker, white_wins);
                    ex.panic_on = Some(1);
                    Box::new(ex)
                },
                &mut sink,
                &mut |_, _| {},
            )
            .unwrap();
        assert_eq!(report.games, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].pairing, 1);
        assert!(report.errors[0].message.contains("executor blew up"), "{}", report.errors[0].message);
        assert!(!report.aborted);
    }

    #[test]
    fn losing_every_worker_is_an_error() {
        let tracker = Tracker::default();
        let scheduler = Scheduler::new(
            settings(1),
            store(3),
            Box::new(round_robin(3, 1, 1)),
            Box::new(StartPosition),
        );
        let mut sink = MemorySink::default();
        let err = scheduler
            .run(
                |_| {
                    let mut ex = FakeExecutor::new(&tracker, white_wins);
                    ex.panic_on = Some(0);
                    Box::new(ex)
                },
                &mut sink,
                &mut |_, _| {},
            )
            .unwrap_err();
        assert!(matches!(err, ArenaError::WorkersExited), "{err}");
    }

    #[test]
    fn knockout_waits_for_results_and_crowns_a_champion() {
        let tracker = Tracker::default();
        let ko = Knockout::new(4, SeedingPolicy::AsListed, TiebreakPolicy::HigherSeed, 1, 0, None);
        let scheduler = Scheduler::new(settings(2), store(4), Box::new(ko), Box::new(StartPosition));
        let mut sink = MemorySink::default();
        let report = scheduler
            .run(
                |_| Box::new(FakeExecutor::new(&tracker, lower_index_wins)),
                &mut sink,
                &mut |_, _| {},
            )
            .unwrap();
        assert_eq!(report.games, 3);
        assert_eq!(report.champion.as_deref(), Some("e0"));
        assert_eq!(report.format, Format::Knockout);
    }

    #[test]
    fn repeated_openings_are_shared_within_an_encounter() {
        let tracker = Tracker::default();
        let suite = OpeningSuite::from_openings(
            ["a", "b", "c"]
                .iter()
                .map(|n| Opening {
                    name: Some(n.to_string()),
                    ..Opening::startpos()
                })
                .collect(),
        );
        let mut s = settings(1);
        s.repeat_openings = true;
        let scheduler = Scheduler::new(s, store(3), Box::new(round_robin(3, 1, 2)), Box::new(suite));
        let mut sink = MemorySink::default();
        scheduler
            .run(
                |_| Box::new(FakeExecutor::new(&tracker, white_wins)),
                &mut sink,
                &mut |_, _| {},
            )
            .unwrap();
        let used = tracker.openings.lock().unwrap().clone();
        assert_eq!(used.len(), 6);
        for pair in used.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
        let names: Vec<_> = used.iter().map(|(_, n)| n.clone().unwrap()).collect();
        assert_eq!(names, vec!["a", "a", "b", "b", "c", "c"]);
    }

    #[test]
    fn sprt_decision_stops_handing_out_games() {
        fn biased(p: &Pairing) -> Outcome {
            // e0 から見て 勝ち・勝ち・引き分け・負け を繰り返す
            let e0 = if p.white == 0 { Side::White } else { Side::Black };
            match p.id % 4 {
                0 | 1 => Outcome::win_for(e0),
                2 => Outcome::Draw,
                _ => Outcome::win_for(e0.opposite()),
            }
        }

        let tracker = Tracker::default();
        let mut s = settings(2);
        s.sprt = Some(SprtConfig {
            elo0: 0.0,
            elo1: 10.0,
            alpha: 0.05,
            beta: 0.05,
        });
        let scheduler = Scheduler::new(s, store(2), Box::new(round_robin(2, 1, 2000)), Box::new(StartPosition));
        let mut sink = MemorySink::default();
        let report = scheduler
            .run(|_| Box::new(FakeExecutor::new(&tracker, biased)), &mut sink, &mut |_, _| {})
            .unwrap();
        let status = report.sprt.unwrap();
        assert_eq!(status.decision, SprtDecision::AcceptH1);
        assert!(report.games < 2000, "{}", report.games);
        assert!(!report.aborted);
    }

    #[test]
    fn abort_discards_running_games() {
        let tracker = Tracker::default();
        let scheduler = Scheduler::new(
            settings(2),
            store(4),
            Box::new(round_robin(4, 1, 1)),
            Box::new(StartPosition),
        );
        let abort = scheduler.abort_handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            abort.abort();
        });
        let mut sink = MemorySink::default();
        let report = scheduler
            .run(
                |_| {
                    let mut ex = FakeExecutor::new(&tracker, white_wins);
                    ex.block_until_cancel = true;
                    Box::new(ex)
                },
                &mut sink,
                &mut |_, _| {},
            )
            .unwrap();
        stopper.join().unwrap();
        assert!(report.aborted);
        assert_eq!(report.games, 0);
        assert!(sink.games.is_empty());
        assert_eq!(tracker.running.load(Ordering::SeqCst), 0);
    }
}

//! 1局を進行させる状態機械。
//!
//! 状態は `AwaitingMove(side)` → `ApplyingMove` → `AdjudicationCheck` → `AwaitingMove(other)`
//! と巡り、どこからでも `Finished` に落ちる。エンジン側の異常（時間切れ・不正手・クラッシュ・
//! プロトコル違反）はすべて [`GameResult`] に変換され、`Err` にはならない。
//! エンジンが対局条件（バリアント・開始局面）に非対応なら結果なし (NoResult) で終わる。
//! `Err` になるのは開始局面の不正手と中断だけ。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::adjudication::{AdjudicationConfig, AdjudicationInput, ScoreHistory, TablebaseOracle, adjudicate};
use crate::board::{AcceptedMove, BoardProvider, BoardService, MoveVerdict};
use crate::clock::{Clock, TimeSource};
use crate::error::{ArenaError, BoardError, ProtocolError};
use crate::observer::{GameHeader, GameObserver};
use crate::opening::Opening;
use crate::protocol::{Claim, EngineEvent, GameSetup, PositionView};
use crate::session::Player;
use crate::time_control::TimeControl;
use crate::types::{
    EvalLog, GameResult, MoveRecord, Outcome, ResultSlot, Side, Termination, duration_to_millis,
};

/// エンジンからの応答を待つ 1 回あたりの上限。中断・相手側イベントの確認間隔でもある。
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 中断フラグ。clone したハンドル同士で共有する。
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 1局分の指定
#[derive(Clone, Debug)]
pub struct GameSpec {
    pub game_id: u64,
    pub round: u32,
    pub variant: String,
    pub opening: Opening,
    /// 白・黒の順
    pub time_controls: [TimeControl; 2],
    /// 中断した対局の棋譜。空でなければ開始局面の強制手順の代わりに並べ直して続行する。
    pub resume: Vec<MoveRecord>,
}

impl GameSpec {
    pub fn new(game_id: u64, variant: impl Into<String>, opening: Opening, white: TimeControl, black: TimeControl) -> Self {
        Self {
            game_id,
            round: 1,
            variant: variant.into(),
            opening,
            time_controls: [white, black],
            resume: Vec::new(),
        }
    }
}

/// コーディネータが参照する外部コラボレータ
#[derive(Clone, Copy)]
pub struct GameEnv<'a> {
    pub boards: &'a dyn BoardProvider,
    pub adjudication: &'a AdjudicationConfig,
    pub oracle: Option<&'a dyn TablebaseOracle>,
    pub observer: &'a dyn GameObserver,
    pub cancel: &'a CancelToken,
}

/// 終局した 1 局の記録。ResultSink に渡される。
#[derive(Clone, Debug, Serialize)]
pub struct GameRecord {
    pub game_id: u64,
    pub round: u32,
    pub white: String,
    pub black: String,
    pub variant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_fen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening: Option<String>,
    pub white_tc: String,
    pub black_tc: String,
    pub moves: Vec<MoveRecord>,
    pub result: GameResult,
    pub final_fen: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    /// 対局中にプロセスが落ちた側（再起動・再開の判断用）
    #[serde(skip)]
    pub crashed: Option<Side>,
}

impl GameRecord {
    pub fn player(&self, side: Side) -> &str {
        match side {
            Side::White => &self.white,
            Side::Black => &self.black,
        }
    }

    pub fn side_of(&self, name: &str) -> Option<Side> {
        Side::BOTH.into_iter().find(|&s| self.player(s) == name)
    }

    pub fn plies(&self) -> usize {
        self.moves.len()
    }
}

struct PendingMove {
    side: Side,
    mv: String,
    ponder: Option<String>,
    eval: EvalLog,
}

enum GameState {
    AwaitingMove(Side),
    ApplyingMove(PendingMove),
    AdjudicationCheck(Side),
    Finished,
}

pub struct GameCoordinator<'a> {
    header: GameHeader,
    opening: Opening,
    resume: Vec<MoveRecord>,
    time_controls: [TimeControl; 2],
    players: [&'a mut dyn Player; 2],
    board: Box<dyn BoardService>,
    clock: Clock,
    env: GameEnv<'a>,
    history: ScoreHistory,
    records: Vec<MoveRecord>,
    result: ResultSlot,
    /// 各側が最後に引き分けを提案した時点の半手数
    draw_offers: [Option<usize>; 2],
    crashed: Option<Side>,
}

impl<'a> GameCoordinator<'a> {
    pub fn new(
        spec: GameSpec,
        white: &'a mut dyn Player,
        black: &'a mut dyn Player,
        env: GameEnv<'a>,
    ) -> Result<Self, ArenaError> {
        let board = env.boards.create(&spec.variant, spec.opening.fen.as_deref())?;
        let header = GameHeader {
            game_id: spec.game_id,
            round: spec.round,
            white: white.name().to_string(),
            black: black.name().to_string(),
            variant: spec.variant,
            start_fen: spec.opening.fen.clone(),
        };
        let [wtc, btc] = spec.time_controls;
        Ok(Self {
            header,
            opening: spec.opening,
            resume: spec.resume,
            time_controls: spec.time_controls,
            players: [white, black],
            board,
            clock: Clock::new(wtc, btc),
            env,
            history: ScoreHistory::default(),
            records: Vec::new(),
            result: ResultSlot::default(),
            draw_offers: [None, None],
            crashed: None,
        })
    }

    /// 時計の時刻源を差し替える
    pub fn with_time_source(mut self, source: Box<dyn TimeSource>) -> Self {
        let [wtc, btc] = self.time_controls;
        self.clock = Clock::with_source(wtc, btc, source);
        self
    }

    pub fn run(mut self) -> Result<GameRecord, ArenaError> {
        let started_at = Local::now();
        self.env.observer.game_started(&self.header);

        let mut state = self.start()?;
        loop {
            state = match state {
                GameState::AwaitingMove(side) => self.await_move(side)?,
                GameState::ApplyingMove(pending) => self.apply_move(pending),
                GameState::AdjudicationCheck(side) => self.check_adjudication(side),
                GameState::Finished => break,
            };
        }

        let result = std::mem::take(&mut self.result)
            .take()
            .unwrap_or_else(|| GameResult::new(Outcome::Unresolved, Termination::NoResult));
        let comment = result.description();
        for player in self.players.iter_mut() {
            player.end_game(result.outcome, &comment);
        }
        log::debug!(
            "game {}: {} vs {} finished after {} plies: {result}",
            self.header.game_id,
            self.header.white,
            self.header.black,
            self.records.len()
        );

        let record = GameRecord {
            game_id: self.header.game_id,
            round: self.header.round,
            white: self.header.white.clone(),
            black: self.header.black.clone(),
            variant: self.header.variant.clone(),
            start_fen: self.header.start_fen.clone(),
            opening: (self.opening != Opening::startpos()).then(|| self.opening.describe()),
            white_tc: self.time_controls[0].to_string(),
            black_tc: self.time_controls[1].to_string(),
            moves: std::mem::take(&mut self.records),
            result,
            final_fen: self.board.fen(),
            started_at,
            finished_at: Local::now(),
            crashed: self.crashed,
        };
        self.env.observer.game_finished(&record);
        Ok(record)
    }

    fn finish(&mut self, result: GameResult) -> GameState {
        self.result.set(result);
        GameState::Finished
    }

    fn lose(&mut self, side: Side, termination: Termination, detail: impl Into<String>) -> GameState {
        self.finish(GameResult::loss_for(side, termination).with_detail(detail))
    }

    // -----------------------------------------------------------------------
    // 開始
    // -----------------------------------------------------------------------

    fn start(&mut self) -> Result<GameState, ArenaError> {
        for side in Side::BOTH {
            let opponent = match side {
                Side::White => self.header.black.clone(),
                Side::Black => self.header.white.clone(),
            };
            let setup = GameSetup {
                variant: &self.header.variant,
                start_fen: self.header.start_fen.as_deref(),
                own_side: side,
                time_control: &self.time_controls[side.index()],
                opponent_name: &opponent,
                ponder: true,
            };
            match self.players[side.index()].new_game(&setup) {
                Ok(()) => {}
                Err(err @ ProtocolError::Unsupported { .. }) => {
                    log::warn!("game {}: {side} cannot play this game: {err}", self.header.game_id);
                    let result = GameResult::new(Outcome::Unresolved, Termination::NoResult)
                        .with_detail(err.to_string());
                    return Ok(self.finish(result));
                }
                Err(err) => {
                    log::warn!("game {}: {side} failed to start: {err}", self.header.game_id);
                    self.crashed = Some(side);
                    return Ok(self.lose(side, Termination::Disconnection, err.to_string()));
                }
            }
        }

        let prior = std::mem::take(&mut self.resume);
        if prior.is_empty() {
            for mv in self.opening.moves.clone() {
                self.play_book_move(&mv)?;
            }
        } else {
            log::info!(
                "game {}: resuming after {} plies",
                self.header.game_id,
                prior.len()
            );
            for record in prior {
                self.replay_record(record)?;
            }
        }

        if let Some(terminal) = self.board.terminal() {
            return Ok(self.finish(terminal.to_result()));
        }
        Ok(GameState::AwaitingMove(self.board.side_to_move()))
    }

    fn apply_forced(&mut self, mv: &str) -> Result<(Side, AcceptedMove), BoardError> {
        let side = self.board.side_to_move();
        match self.board.apply(mv) {
            MoveVerdict::Accepted { mv, .. } => Ok((side, mv)),
            MoveVerdict::Rejected { .. } => Err(BoardError::IllegalMove {
                mv: mv.to_string(),
                fen: self.board.fen(),
            }),
        }
    }

    fn play_book_move(&mut self, mv: &str) -> Result<(), BoardError> {
        let (side, accepted) = self.apply_forced(mv)?;
        self.history.push_reset(side);
        let record = MoveRecord {
            ply: self.records.len() as u32 + 1,
            side,
            mv: accepted.mv,
            san: Some(accepted.san),
            elapsed_ms: 0,
            book: true,
            eval: None,
        };
        self.env.observer.move_played(&self.header, &record, &self.board.fen());
        self.records.push(record);
        Ok(())
    }

    /// 中断前の手を並べ直す。持ち時間は記録された消費時間で精算する。
    fn replay_record(&mut self, record: MoveRecord) -> Result<(), BoardError> {
        let (side, _) = self.apply_forced(&record.mv)?;
        if record.book {
            self.history.push_reset(side);
        } else {
            self.clock.charge(side, Duration::from_millis(record.elapsed_ms));
            self.history.push(side, record.eval.as_ref().and_then(score_of));
        }
        self.env.observer.move_played(&self.header, &record, &self.board.fen());
        self.records.push(record);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 手番待ち
    // -----------------------------------------------------------------------

    fn await_move(&mut self, side: Side) -> Result<GameState, ArenaError> {
        let other = side.opposite();
        let snapshot = self.clock.snapshot(side);
        let position = PositionView {
            start_fen: self.board.start_fen(),
            moves: self.board.moves(),
        };
        self.players[side.index()].request_move(position, &snapshot);
        self.clock.start(side);
        let margin = self.time_controls[side.index()].margin;
        let mut eval = EvalLog::default();

        loop {
            if self.env.cancel.is_cancelled() {
                self.clock.stop(side);
                return Err(ArenaError::Aborted);
            }
            if self.clock.has_expired(side, margin) {
                self.clock.stop(side);
                return Ok(self.lose(side, Termination::Timeout, "no move in time"));
            }
            while let Some(event) = self.players[other.index()].try_event() {
                if let Some(state) = self.idle_event(other, event) {
                    return Ok(state);
                }
            }

            let wait = self
                .clock
                .deadline_in(side)
                .map_or(POLL_INTERVAL, |d| d.clamp(Duration::from_millis(1), POLL_INTERVAL));
            let Some(event) = self.players[side.index()].wait_event(wait) else {
                continue;
            };
            match event {
                EngineEvent::BestMove { mv, ponder } => {
                    return Ok(GameState::ApplyingMove(PendingMove {
                        side,
                        mv,
                        ponder,
                        eval,
                    }));
                }
                EngineEvent::Info(info) => eval.merge(&info),
                EngineEvent::DrawOffer => self.offer_draw(side),
                EngineEvent::Claim(claim) => {
                    if let Some(result) = self.judge_claim(side, claim) {
                        self.clock.stop(side);
                        return Ok(self.finish(result));
                    }
                }
                EngineEvent::IllegalMoveReport { mv, reason } => {
                    self.clock.stop(side);
                    let detail = match mv {
                        Some(mv) => format!("engine rejected {mv}: {reason}"),
                        None => format!("engine reported an illegal move: {reason}"),
                    };
                    return Ok(self.lose(side, Termination::Disconnection, detail));
                }
                EngineEvent::Violation(reason) => {
                    self.clock.stop(side);
                    return Ok(self.lose(side, Termination::Disconnection, reason));
                }
                EngineEvent::Crash(code) => {
                    self.clock.stop(side);
                    return Ok(self.crash(side, code));
                }
                EngineEvent::Ready | EngineEvent::Ignorable => {}
            }
        }
    }

    /// 手番でない側からのイベント
    fn idle_event(&mut self, side: Side, event: EngineEvent) -> Option<GameState> {
        match event {
            EngineEvent::Crash(code) => Some(self.crash(side, code)),
            EngineEvent::Violation(reason) => {
                Some(self.lose(side, Termination::Disconnection, reason))
            }
            EngineEvent::Claim(claim) => {
                let result = self.judge_claim(side, claim)?;
                Some(self.finish(result))
            }
            EngineEvent::DrawOffer => {
                self.offer_draw(side);
                None
            }
            _ => None,
        }
    }

    fn crash(&mut self, side: Side, code: Option<i32>) -> GameState {
        let detail = match code {
            Some(code) => format!("engine exited with code {code}"),
            None => "engine terminated".to_string(),
        };
        log::warn!(
            "game {}: {} ({side}) {detail}",
            self.header.game_id,
            self.players[side.index()].name()
        );
        self.crashed = Some(side);
        self.lose(side, Termination::Disconnection, detail)
    }

    fn offer_draw(&mut self, side: Side) {
        self.draw_offers[side.index()] = Some(self.board.moves().len());
        self.players[side.opposite().index()].draw_offered();
    }

    /// 直前の相手の手番（またはこの手番中）に相手も提案していれば合意
    fn draw_agreed(&self, mover: Side, ply_before: usize) -> bool {
        let own = self.draw_offers[mover.index()];
        let theirs = self.draw_offers[mover.opposite().index()];
        own == Some(ply_before) && theirs.is_some_and(|p| p + 1 >= ply_before)
    }

    /// 終局宣言を検める。採用しない宣言は None。
    fn judge_claim(&mut self, side: Side, claim: Claim) -> Option<GameResult> {
        let (outcome, comment) = match claim {
            Claim::Resign => return Some(GameResult::loss_for(side, Termination::Resignation)),
            Claim::Result { outcome, comment } => (outcome, comment),
        };
        if outcome == Outcome::Unresolved {
            let result = GameResult::new(Outcome::Unresolved, Termination::NoResult);
            return Some(if comment.is_empty() {
                result
            } else {
                result.with_detail(comment)
            });
        }
        if outcome.winner() == Some(side.opposite()) {
            return Some(GameResult::loss_for(side, Termination::Resignation));
        }
        match self.board.terminal().map(|t| t.to_result()) {
            Some(result) if result.outcome == outcome => Some(result),
            _ => {
                log::warn!(
                    "game {}: ignoring unconfirmed claim from {side}: {} {{{comment}}}",
                    self.header.game_id,
                    outcome.pgn_token()
                );
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // 着手の適用と裁定
    // -----------------------------------------------------------------------

    fn apply_move(&mut self, pending: PendingMove) -> GameState {
        let PendingMove {
            side,
            mv,
            ponder,
            eval,
        } = pending;
        let elapsed = self.clock.stop(side);
        let margin = self.time_controls[side.index()].margin;
        if self.clock.has_expired(side, margin) {
            return self.lose(
                side,
                Termination::Timeout,
                format!("{mv} after {} ms", duration_to_millis(elapsed)),
            );
        }

        let ply_before = self.board.moves().len();
        let (accepted, terminal) = match self.board.apply(&mv) {
            MoveVerdict::Accepted { mv, terminal } => (mv, terminal),
            MoveVerdict::Rejected { reason } => {
                log::warn!(
                    "game {}: illegal move {mv} from {} ({reason})",
                    self.header.game_id,
                    self.players[side.index()].name()
                );
                return self.lose(side, Termination::IllegalMove, mv);
            }
        };

        self.history.push(side, score_of(&eval));
        let record = MoveRecord {
            ply: ply_before as u32 + 1,
            side,
            mv: accepted.mv,
            san: Some(accepted.san),
            elapsed_ms: duration_to_millis(elapsed),
            book: false,
            eval: (!eval.is_empty()).then_some(eval),
        };
        self.env.observer.move_played(&self.header, &record, &self.board.fen());
        self.records.push(record);

        if let Some(terminal) = terminal {
            return self.finish(terminal.to_result());
        }
        if self.draw_agreed(side, ply_before) {
            return self.finish(GameResult::draw(Termination::Agreement));
        }

        let snapshot = self.clock.snapshot(side.opposite());
        let position = PositionView {
            start_fen: self.board.start_fen(),
            moves: self.board.moves(),
        };
        self.players[side.index()].after_own_move(position, ponder.as_deref(), &snapshot);
        GameState::AdjudicationCheck(side)
    }

    fn check_adjudication(&mut self, mover: Side) -> GameState {
        let fen = self.board.fen();
        let input = AdjudicationInput {
            history: &self.history,
            plies: self.board.moves().len() as u32,
            piece_count: self.board.piece_count(),
            fen: &fen,
        };
        match adjudicate(self.env.adjudication, &input, self.env.oracle) {
            Some(result) => self.finish(result),
            None => GameState::AwaitingMove(mover.opposite()),
        }
    }
}

/// 裁定に使う評価値。深さ 0 の評価は信用しない。
fn score_of(eval: &EvalLog) -> Option<i32> {
    if eval.depth == Some(0) {
        return None;
    }
    eval.score()
}

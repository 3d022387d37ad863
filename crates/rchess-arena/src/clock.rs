//! 対局時計。
//!
//! 時刻の取得は [`TimeSource`] 経由なので、テストでは [`ManualTime`] を差し込んで
//! スリープせずに時間切れを再現できる。

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::time_control::{TimeBudget, TimeControl};
use crate::types::Side;

pub trait TimeSource: Send {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicTime;

impl TimeSource for MonotonicTime {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手動で進める時計。clone したハンドル同士で時刻を共有する。
#[derive(Clone, Debug)]
pub struct ManualTime {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualTime {
    fn default() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl ManualTime {
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
struct SideClock {
    tc: TimeControl,
    /// 持ち時間制の残り時間（手番開始時点）
    time_left: Duration,
    moves_left: Option<u32>,
    started: Option<Instant>,
    /// 直前に終えた手が許容量を超えていたか
    overran: bool,
}

impl SideClock {
    fn new(tc: TimeControl) -> Self {
        let (time_left, moves_left) = match tc.budget {
            TimeBudget::Conventional { moves, base, .. } => (base, moves),
            _ => (Duration::ZERO, None),
        };
        Self {
            tc,
            time_left,
            moves_left,
            started: None,
            overran: false,
        }
    }

    /// この手に割り当てられた時間
    fn allotted(&self) -> Duration {
        match self.tc.budget {
            TimeBudget::Conventional { .. } => self.time_left,
            TimeBudget::FixedPerMove(t) => t,
            TimeBudget::Infinite => Duration::MAX,
        }
    }
}

/// 両対局者の時計。Game Coordinator が排他的に所有する。
pub struct Clock {
    sides: [SideClock; 2],
    source: Box<dyn TimeSource>,
}

impl Clock {
    pub fn new(white: TimeControl, black: TimeControl) -> Self {
        Self::with_source(white, black, Box::new(MonotonicTime))
    }

    pub fn with_source(white: TimeControl, black: TimeControl, source: Box<dyn TimeSource>) -> Self {
        Self {
            sides: [SideClock::new(white), SideClock::new(black)],
            source,
        }
    }

    pub fn time_control(&self, side: Side) -> &TimeControl {
        &self.sides[side.index()].tc
    }

    pub fn is_running(&self, side: Side) -> bool {
        self.sides[side.index()].started.is_some()
    }

    pub fn start(&mut self, side: Side) {
        let now = self.source.now();
        let clock = &mut self.sides[side.index()];
        if clock.started.is_some() {
            log::debug!("clock for {side} already running");
            return;
        }
        clock.started = Some(now);
        clock.overran = false;
    }

    /// 手番を終えた側の時計を止め、消費時間を返す。
    ///
    /// 持ち時間内に指せた場合に限り加算時間を与え、`moves` 手ごとに `base` を補充する。
    pub fn stop(&mut self, side: Side) -> Duration {
        let now = self.source.now();
        let Some(started) = self.sides[side.index()].started.take() else {
            return Duration::ZERO;
        };
        let elapsed = now.saturating_duration_since(started);
        self.charge(side, elapsed);
        elapsed
    }

    /// 計測済みの消費時間で 1 手分の精算をする（中断した対局の再開用）。
    pub fn charge(&mut self, side: Side, elapsed: Duration) {
        let clock = &mut self.sides[side.index()];
        clock.started = None;
        let limit = clock.allotted().saturating_add(clock.tc.margin);
        clock.overran = elapsed > limit;

        if let TimeBudget::Conventional {
            moves,
            base,
            increment,
        } = clock.tc.budget
        {
            clock.time_left = clock.time_left.saturating_sub(elapsed);
            if !clock.overran {
                clock.time_left = clock.time_left.saturating_add(increment);
            }
            if let Some(left) = clock.moves_left.as_mut() {
                *left = left.saturating_sub(1);
                if *left == 0 {
                    *left = moves.unwrap_or(0);
                    clock.time_left = clock.time_left.saturating_add(base);
                }
            }
        }
    }

    /// 残り時間。負になることはない。無制限なら `Duration::MAX`。
    pub fn remaining(&self, side: Side) -> Duration {
        let clock = &self.sides[side.index()];
        let allotted = clock.allotted();
        match clock.started {
            Some(started) if allotted != Duration::MAX => {
                let elapsed = self.source.now().saturating_duration_since(started);
                allotted.saturating_sub(elapsed)
            }
            _ => allotted,
        }
    }

    /// 手番中なら現在の消費時間で、止まっていれば直前の手で判定する。
    ///
    /// 消費時間が割り当てを `margin` より大きく超えたときだけ true。
    pub fn has_expired(&self, side: Side, margin: Duration) -> bool {
        let clock = &self.sides[side.index()];
        match clock.started {
            Some(started) => {
                let allotted = clock.allotted();
                if allotted == Duration::MAX {
                    return false;
                }
                let elapsed = self.source.now().saturating_duration_since(started);
                elapsed > allotted.saturating_add(margin)
            }
            None => clock.overran,
        }
    }

    /// 手番側が時間切れになるまでの猶予（margin 込み）。無制限なら None。
    pub fn deadline_in(&self, side: Side) -> Option<Duration> {
        let clock = &self.sides[side.index()];
        if clock.allotted() == Duration::MAX {
            return None;
        }
        Some(self.remaining(side).saturating_add(clock.tc.margin))
    }

    pub fn snapshot(&self, to_move: Side) -> ClockSnapshot {
        let mover = &self.sides[to_move.index()].tc;
        let per_side = |side: Side| {
            let clock = &self.sides[side.index()];
            SideTime {
                remaining: self.remaining(side),
                increment: clock.tc.increment(),
                moves_to_go: clock.moves_left,
            }
        };
        ClockSnapshot {
            to_move,
            white: per_side(Side::White),
            black: per_side(Side::Black),
            budget: mover.budget,
            ply_limit: mover.ply_limit,
            node_limit: mover.node_limit,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SideTime {
    pub remaining: Duration,
    pub increment: Duration,
    pub moves_to_go: Option<u32>,
}

/// 探索要求を組み立てるためにアダプタへ渡す時計の写し
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockSnapshot {
    pub to_move: Side,
    pub white: SideTime,
    pub black: SideTime,
    pub budget: TimeBudget,
    pub ply_limit: Option<u32>,
    pub node_limit: Option<u64>,
}

impl ClockSnapshot {
    pub fn side(&self, side: Side) -> &SideTime {
        match side {
            Side::White => &self.white,
            Side::Black => &self.black,
        }
    }

    pub fn own(&self) -> &SideTime {
        self.side(self.to_move)
    }

    pub fn opponent(&self) -> &SideTime {
        self.side(self.to_move.opposite())
    }
}

//! トーナメント形式ごとの対局カード生成。
//!
//! 総当たり・ガントレット・ピラミッドは最初に全カードを作る。ノックアウトだけは
//! 結果を見ながら次のラウンドを組むので、途中で [`NextPairing::Wait`] を返すことがある。

mod gauntlet;
mod knockout;
mod pyramid;
mod round_robin;

use std::collections::VecDeque;

use serde::Deserialize;

use crate::config::TournamentSection;
use crate::error::ArenaError;
use crate::types::{Outcome, Side};

pub use gauntlet::gauntlet;
pub use knockout::Knockout;
pub use pyramid::pyramid;
pub use round_robin::round_robin;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    #[default]
    RoundRobin,
    Gauntlet,
    Knockout,
    Pyramid,
}

impl Format {
    pub fn label(self) -> &'static str {
        match self {
            Format::RoundRobin => "round-robin",
            Format::Gauntlet => "gauntlet",
            Format::Knockout => "knockout",
            Format::Pyramid => "pyramid",
        }
    }
}

/// ノックアウトの組み合わせ方
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeedingPolicy {
    /// 並び順どおりに隣同士を当てる。不戦勝は先頭から順に与える。
    #[default]
    AsListed,
    /// 並び順をシード順とみなし、1 対 最下位、2 対 その次 … と上位が後で当たる配置にする
    Standard,
    /// 乱数でシード順を決めてから Standard と同じ配置にする
    Random,
}

/// ノックアウトで同点だったときの決め方
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TiebreakPolicy {
    /// シード上位が勝ち上がる
    #[default]
    HigherSeed,
    /// 先後を入れ替えた追加対局を `tiebreak_games` 局まで行い、それでも同点ならシード上位
    ExtraGames,
    Random,
}

/// 1 局分の対局カード
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pairing {
    /// トーナメント内で一意の通し番号
    pub id: usize,
    pub round: u32,
    /// EngineStore 上の添字
    pub white: usize,
    pub black: usize,
    /// 同じ 2 者の一連の対局（エンカウンター）の番号
    pub encounter: usize,
    /// エンカウンター内の何局目か（0 始まり）
    pub game_in_encounter: u32,
}

impl Pairing {
    pub fn player(&self, side: Side) -> usize {
        match side {
            Side::White => self.white,
            Side::Black => self.black,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextPairing {
    Ready(Pairing),
    /// 進行中の対局の結果待ち
    Wait,
    Finished,
}

/// 対局カードが消化された結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingOutcome {
    Played(Outcome),
    /// 再試行上限で打ち切り。`loser` は落ち続けた側。
    Aborted { loser: Option<Side> },
}

pub trait PairingGenerator: Send {
    fn format(&self) -> Format;
    fn next_pairing(&mut self) -> NextPairing;
    fn record_result(&mut self, pairing: &Pairing, outcome: PairingOutcome);
    /// 予定総局数。結果次第で変わる形式は None。
    fn expected_games(&self) -> Option<usize>;
    /// 優勝者が決まる形式ならその添字
    fn champion(&self) -> Option<usize> {
        None
    }
}

/// あらかじめ作った対局カードを順に配る
pub struct FixedSchedule {
    format: Format,
    queue: VecDeque<Pairing>,
    total: usize,
}

impl FixedSchedule {
    pub fn new(format: Format, pairings: Vec<Pairing>) -> Self {
        Self {
            format,
            total: pairings.len(),
            queue: pairings.into(),
        }
    }

    pub fn pairings(&self) -> impl Iterator<Item = &Pairing> {
        self.queue.iter()
    }
}

impl PairingGenerator for FixedSchedule {
    fn format(&self) -> Format {
        self.format
    }

    fn next_pairing(&mut self) -> NextPairing {
        match self.queue.pop_front() {
            Some(p) => NextPairing::Ready(p),
            None => NextPairing::Finished,
        }
    }

    fn record_result(&mut self, _pairing: &Pairing, _outcome: PairingOutcome) {}

    fn expected_games(&self) -> Option<usize> {
        Some(self.total)
    }
}

/// エンカウンターを対局カードに展開する。先後は 1 局ごとに入れ替える。
#[derive(Debug, Default)]
pub(crate) struct ScheduleBuilder {
    games_per_encounter: u32,
    pairings: Vec<Pairing>,
    encounters: usize,
}

impl ScheduleBuilder {
    pub(crate) fn new(games_per_encounter: u32) -> Self {
        Self {
            games_per_encounter: games_per_encounter.max(1),
            ..Default::default()
        }
    }

    pub(crate) fn encounter(&mut self, round: u32, first: usize, second: usize) {
        let encounter = self.encounters;
        self.encounters += 1;
        for game in 0..self.games_per_encounter {
            let (white, black) = if game % 2 == 0 {
                (first, second)
            } else {
                (second, first)
            };
            self.pairings.push(Pairing {
                id: self.pairings.len(),
                round,
                white,
                black,
                encounter,
                game_in_encounter: game,
            });
        }
    }

    pub(crate) fn build(self, format: Format) -> FixedSchedule {
        FixedSchedule::new(format, self.pairings)
    }
}

/// 設定から生成器を作る
pub fn create_generator(
    section: &TournamentSection,
    players: usize,
) -> Result<Box<dyn PairingGenerator>, ArenaError> {
    if players < 2 {
        return Err(ArenaError::PairingGeneration(format!(
            "{} needs at least 2 players, got {players}",
            section.format.label()
        )));
    }
    let gpe = section.games_per_encounter;
    let generator: Box<dyn PairingGenerator> = match section.format {
        Format::RoundRobin => Box::new(round_robin(players, section.rounds, gpe)),
        Format::Pyramid => Box::new(pyramid(players, section.rounds, gpe)),
        Format::Gauntlet => {
            if section.seeds == 0 || section.seeds >= players {
                return Err(ArenaError::PairingGeneration(format!(
                    "gauntlet needs 1..{players} seeds, got {}",
                    section.seeds
                )));
            }
            Box::new(gauntlet(players, section.seeds, section.rounds, gpe))
        }
        Format::Knockout => Box::new(Knockout::new(
            players,
            section.seeding,
            section.tiebreak,
            gpe,
            section.tiebreak_games,
            section.seed,
        )),
    };
    if let Some(total) = generator.expected_games() {
        if total == 0 {
            return Err(ArenaError::PairingGeneration(
                "the schedule contains no games".to_string(),
            ));
        }
    }
    Ok(generator)
}

#[cfg(test)]
pub(crate) fn drain(schedule: &mut dyn PairingGenerator) -> Vec<Pairing> {
    let mut out = Vec::new();
    while let NextPairing::Ready(p) = schedule.next_pairing() {
        out.push(p);
    }
    out
}

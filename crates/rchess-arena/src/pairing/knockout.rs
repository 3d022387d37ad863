use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use super::{
    Format, NextPairing, Pairing, PairingGenerator, PairingOutcome, SeedingPolicy, TiebreakPolicy,
};
use crate::types::Outcome;

#[derive(Debug)]
struct Match {
    /// 不戦勝なら None
    encounter: Option<usize>,
    players: [usize; 2],
    budget: u32,
    scheduled: u32,
    finished: u32,
    extra: u32,
    /// 半点単位
    points: [u32; 2],
    winner: Option<usize>,
}

impl Match {
    fn bye(player: usize) -> Self {
        Self {
            encounter: None,
            players: [player, player],
            budget: 0,
            scheduled: 0,
            finished: 0,
            extra: 0,
            points: [0, 0],
            winner: Some(player),
        }
    }
}

/// シングルエリミネーション。ラウンド内の全試合が決着してから次のラウンドを組む。
pub struct Knockout {
    tiebreak: TiebreakPolicy,
    games_per_encounter: u32,
    tiebreak_games: u32,
    rng: Xoshiro256PlusPlus,
    /// シード順位（0 が最上位）
    rank: Vec<usize>,
    round: u32,
    matches: Vec<Match>,
    next_id: usize,
    next_encounter: usize,
    champion: Option<usize>,
}

impl Knockout {
    pub fn new(
        players: usize,
        seeding: SeedingPolicy,
        tiebreak: TiebreakPolicy,
        games_per_encounter: u32,
        tiebreak_games: u32,
        seed: Option<u64>,
    ) -> Self {
        let mut rng = match seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_rng(&mut rand::rng()),
        };
        let mut order: Vec<usize> = (0..players).collect();
        if seeding == SeedingPolicy::Random {
            order.shuffle(&mut rng);
        }
        let mut rank = vec![0; players];
        for (r, &p) in order.iter().enumerate() {
            rank[p] = r;
        }
        let slots = match seeding {
            SeedingPolicy::AsListed => as_listed_slots(&order),
            SeedingPolicy::Standard | SeedingPolicy::Random => standard_slots(&order),
        };

        let mut ko = Self {
            tiebreak,
            games_per_encounter: games_per_encounter.max(1),
            tiebreak_games,
            rng,
            rank,
            round: 0,
            matches: Vec::new(),
            next_id: 0,
            next_encounter: 0,
            champion: None,
        };
        ko.start_round(&slots);
        ko
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn champion(&self) -> Option<usize> {
        self.champion
    }

    fn start_round(&mut self, slots: &[Option<usize>]) {
        self.round += 1;
        let mut matches = Vec::with_capacity(slots.len() / 2);
        for pair in slots.chunks(2) {
            match (pair[0], pair.get(1).copied().flatten()) {
                (Some(a), Some(b)) => {
                    matches.push(Match {
                        encounter: Some(self.next_encounter),
                        players: [a, b],
                        budget: self.games_per_encounter,
                        scheduled: 0,
                        finished: 0,
                        extra: 0,
                        points: [0, 0],
                        winner: None,
                    });
                    self.next_encounter += 1;
                }
                (Some(a), None) | (None, Some(a)) => matches.push(Match::bye(a)),
                (None, None) => {}
            }
        }
        log::debug!(
            "knockout round {}: {} matches",
            self.round,
            matches.iter().filter(|m| m.encounter.is_some()).count()
        );
        self.matches = matches;
    }

    fn advance(&mut self) {
        let winners: Vec<Option<usize>> = self.matches.iter().map(|m| m.winner).collect();
        if winners.len() <= 1 {
            self.champion = winners.first().copied().flatten();
            return;
        }
        self.start_round(&winners);
    }

    fn decide(&mut self, idx: usize) {
        let m = &mut self.matches[idx];
        if m.points[0] != m.points[1] {
            let best = if m.points[0] > m.points[1] { 0 } else { 1 };
            m.winner = Some(m.players[best]);
            return;
        }
        let winner = match self.tiebreak {
            TiebreakPolicy::ExtraGames if m.extra < self.tiebreak_games => {
                let add = (self.tiebreak_games - m.extra).min(2);
                m.extra += add;
                m.budget += add;
                log::info!(
                    "knockout round {}: players {} and {} tied, {add} extra games",
                    self.round,
                    m.players[0],
                    m.players[1]
                );
                return;
            }
            TiebreakPolicy::Random => m.players[self.rng.random_range(0..2)],
            TiebreakPolicy::HigherSeed | TiebreakPolicy::ExtraGames => {
                let [a, b] = m.players;
                if self.rank[a] <= self.rank[b] { a } else { b }
            }
        };
        m.winner = Some(winner);
    }
}

impl PairingGenerator for Knockout {
    fn format(&self) -> Format {
        Format::Knockout
    }

    fn next_pairing(&mut self) -> NextPairing {
        loop {
            if self.champion.is_some() {
                return NextPairing::Finished;
            }
            for m in &mut self.matches {
                let Some(encounter) = m.encounter else {
                    continue;
                };
                if m.winner.is_some() || m.scheduled >= m.budget {
                    continue;
                }
                let game = m.scheduled;
                let (white, black) = if game % 2 == 0 {
                    (m.players[0], m.players[1])
                } else {
                    (m.players[1], m.players[0])
                };
                m.scheduled += 1;
                let pairing = Pairing {
                    id: self.next_id,
                    round: self.round,
                    white,
                    black,
                    encounter,
                    game_in_encounter: game,
                };
                self.next_id += 1;
                return NextPairing::Ready(pairing);
            }
            if self.matches.iter().all(|m| m.winner.is_some()) {
                self.advance();
                continue;
            }
            return NextPairing::Wait;
        }
    }

    fn record_result(&mut self, pairing: &Pairing, outcome: PairingOutcome) {
        let Some(idx) = self
            .matches
            .iter()
            .position(|m| m.encounter == Some(pairing.encounter))
        else {
            log::warn!("knockout: result for unknown encounter {}", pairing.encounter);
            return;
        };
        let m = &mut self.matches[idx];
        let white_slot = if m.players[0] == pairing.white { 0 } else { 1 };
        let black_slot = 1 - white_slot;
        let decisive = match outcome {
            PairingOutcome::Played(Outcome::WhiteWins) => Some(white_slot),
            PairingOutcome::Played(Outcome::BlackWins) => Some(black_slot),
            PairingOutcome::Aborted { loser: Some(side) } => Some(match side.opposite() {
                crate::types::Side::White => white_slot,
                crate::types::Side::Black => black_slot,
            }),
            PairingOutcome::Played(Outcome::Draw | Outcome::Unresolved)
            | PairingOutcome::Aborted { loser: None } => None,
        };
        match decisive {
            Some(slot) => m.points[slot] += 2,
            None => {
                m.points[0] += 1;
                m.points[1] += 1;
            }
        }
        m.finished += 1;
        if m.finished >= m.budget {
            self.decide(idx);
        }
    }

    fn expected_games(&self) -> Option<usize> {
        None
    }

    fn champion(&self) -> Option<usize> {
        self.champion
    }
}

/// 1-based のシード番号をブラケット上の位置順に並べる（1, 8, 4, 5, 2, 7, 3, 6 …）
fn bracket_order(size: usize) -> Vec<usize> {
    let mut seeds = vec![1usize];
    while seeds.len() < size {
        let len = seeds.len() * 2;
        seeds = seeds.iter().flat_map(|&s| [s, len + 1 - s]).collect();
    }
    seeds
}

fn standard_slots(order: &[usize]) -> Vec<Option<usize>> {
    let size = order.len().next_power_of_two();
    bracket_order(size)
        .into_iter()
        .map(|seed| order.get(seed - 1).copied())
        .collect()
}

fn as_listed_slots(order: &[usize]) -> Vec<Option<usize>> {
    let size = order.len().next_power_of_two();
    let byes = size - order.len();
    let mut slots = Vec::with_capacity(size);
    for &p in &order[..byes] {
        slots.push(Some(p));
        slots.push(None);
    }
    slots.extend(order[byes..].iter().copied().map(Some));
    slots
}

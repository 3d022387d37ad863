use super::{FixedSchedule, Format, ScheduleBuilder};

/// 先頭 `seeds` 人がそれ以外の全員と当たる。
pub fn gauntlet(players: usize, seeds: usize, rounds: u32, games_per_encounter: u32) -> FixedSchedule {
    let mut builder = ScheduleBuilder::new(games_per_encounter);
    for round in 1..=rounds {
        for opponent in seeds..players {
            for seed in 0..seeds {
                if round % 2 == 1 {
                    builder.encounter(round, seed, opponent);
                } else {
                    builder.encounter(round, opponent, seed);
                }
            }
        }
    }
    builder.build(Format::Gauntlet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::{PairingGenerator, drain};

    #[test]
    fn seed_meets_everyone_else_but_they_never_meet_each_other() {
        let mut schedule = gauntlet(5, 1, 2, 2);
        assert_eq!(schedule.expected_games(), Some(16));
        let games = drain(&mut schedule);
        assert!(games.iter().all(|p| p.white == 0 || p.black == 0));
        for opponent in 1..5 {
            let n = games
                .iter()
                .filter(|p| p.white == opponent || p.black == opponent)
                .count();
            assert_eq!(n, 4);
        }
        assert_eq!(games.iter().filter(|p| p.white == 0).count(), 8);
    }
}

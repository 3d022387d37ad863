use super::{FixedSchedule, Format, ScheduleBuilder};

/// 各選手が自分より前に並んだ全員と当たる。後から加わった選手ほど多く指す順番になる。
pub fn pyramid(players: usize, rounds: u32, games_per_encounter: u32) -> FixedSchedule {
    let mut builder = ScheduleBuilder::new(games_per_encounter);
    for round in 1..=rounds {
        for newcomer in 1..players {
            for earlier in 0..newcomer {
                builder.encounter(round, newcomer, earlier);
            }
        }
    }
    builder.build(Format::Pyramid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::drain;

    #[test]
    fn newcomers_play_all_earlier_players_in_order() {
        let mut schedule = pyramid(4, 1, 1);
        let pairs: Vec<(usize, usize)> = drain(&mut schedule)
            .into_iter()
            .map(|p| (p.white, p.black))
            .collect();
        assert_eq!(pairs, vec![(1, 0), (2, 0), (2, 1), (3, 0), (3, 1), (3, 2)]);
    }
}

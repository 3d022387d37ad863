use super::{FixedSchedule, Format, ScheduleBuilder};

/// 総当たり（サークル方式）。1 ラウンドで全ての組が 1 回ずつ当たる。
///
/// 人数が奇数なら空席を 1 つ足し、空席との組は飛ばす。ラウンドごとに先後を入れ替える。
pub fn round_robin(players: usize, rounds: u32, games_per_encounter: u32) -> FixedSchedule {
    let mut builder = ScheduleBuilder::new(games_per_encounter);
    let mut ring: Vec<Option<usize>> = (0..players).map(Some).collect();
    if ring.len() % 2 == 1 {
        ring.push(None);
    }
    let m = ring.len();

    for round in 1..=rounds {
        let mut ring = ring.clone();
        for cycle in 0..m.saturating_sub(1) {
            for i in 0..m / 2 {
                let (Some(a), Some(b)) = (ring[i], ring[m - 1 - i]) else {
                    continue;
                };
                // 固定位置の選手が毎回同じ色にならないように
                let swap = (i == 0 && cycle % 2 == 1) ^ (round % 2 == 0);
                if swap {
                    builder.encounter(round, b, a);
                } else {
                    builder.encounter(round, a, b);
                }
            }
            ring[1..].rotate_right(1);
        }
    }
    builder.build(Format::RoundRobin)
}

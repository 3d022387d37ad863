//! 勝敗集計と Elo 差の推定

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::types::Outcome;

/// 95% 信頼区間の z 値
const Z_95: f64 = 1.959_963_985;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Score {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

impl Score {
    pub fn games(&self) -> u32 {
        self.wins + self.losses + self.draws
    }

    pub fn points(&self) -> f64 {
        self.wins as f64 + self.draws as f64 * 0.5
    }

    /// 得点率。対局が無ければ None。
    pub fn ratio(&self) -> Option<f64> {
        let n = self.games();
        (n > 0).then(|| self.points() / n as f64)
    }

    /// 相手側から見た成績
    pub fn flipped(&self) -> Score {
        Score {
            wins: self.losses,
            losses: self.wins,
            draws: self.draws,
        }
    }

    pub fn elo(&self) -> Option<EloEstimate> {
        EloEstimate::from_score(self)
    }
}

/// Elo 差の推定値
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EloEstimate {
    pub diff: f64,
    /// 95% 信頼区間の半幅
    pub error: f64,
    /// 優越確率 (likelihood of superiority)
    pub los: f64,
}

impl EloEstimate {
    /// 全勝・全敗では推定できない
    pub fn from_score(score: &Score) -> Option<Self> {
        let n = score.games() as f64;
        let ratio = score.ratio()?;
        if ratio <= 0.0 || ratio >= 1.0 {
            return None;
        }
        let w = score.wins as f64 / n;
        let l = score.losses as f64 / n;
        let d = score.draws as f64 / n;
        let variance =
            w * (1.0 - ratio).powi(2) + l * (0.0 - ratio).powi(2) + d * (0.5 - ratio).powi(2);
        let stdev = (variance / n).sqrt();
        let lo = (ratio - Z_95 * stdev).clamp(f64::EPSILON, 1.0 - f64::EPSILON);
        let hi = (ratio + Z_95 * stdev).clamp(f64::EPSILON, 1.0 - f64::EPSILON);
        Some(Self {
            diff: elo_from_ratio(ratio),
            error: (elo_from_ratio(hi) - elo_from_ratio(lo)) / 2.0,
            los: los(score.wins, score.losses),
        })
    }
}

pub fn elo_from_ratio(ratio: f64) -> f64 {
    -400.0 * (1.0 / ratio - 1.0).log10()
}

/// 引き分けを除いた勝ち越しの確からしさ
pub fn los(wins: u32, losses: u32) -> f64 {
    let decisive = (wins + losses) as f64;
    if decisive == 0.0 {
        return 0.5;
    }
    0.5 * (1.0 + erf((wins as f64 - losses as f64) / (2.0 * decisive).sqrt()))
}

/// 誤差関数（Abramowitz & Stegun 7.1.26、誤差 1.5e-7 以下）
fn erf(x: f64) -> f64 {
    let sign = x.signum();
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// 参加者ごと・組ごとの成績表。スケジューラのメインループだけが更新する。
#[derive(Clone, Debug)]
pub struct Standings {
    names: Vec<String>,
    players: Vec<Score>,
    /// (小さい添字, 大きい添字) → 小さい添字側から見た成績
    pairs: BTreeMap<(usize, usize), Score>,
}

impl Standings {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            players: vec![Score::default(); names.len()],
            names,
            pairs: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, white: usize, black: usize, outcome: Outcome) {
        let w = match outcome {
            Outcome::WhiteWins => Score {
                wins: 1,
                ..Score::default()
            },
            Outcome::BlackWins => Score {
                losses: 1,
                ..Score::default()
            },
            Outcome::Draw => Score {
                draws: 1,
                ..Score::default()
            },
            Outcome::Unresolved => return,
        };
        let b = w.flipped();
        add(&mut self.players[white], &w);
        add(&mut self.players[black], &b);
        let (key, pov) = if white < black {
            ((white, black), w)
        } else {
            ((black, white), b)
        };
        add(self.pairs.entry(key).or_default(), &pov);
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn player(&self, idx: usize) -> Score {
        self.players[idx]
    }

    /// `a` から見た `b` との対戦成績
    pub fn pair(&self, a: usize, b: usize) -> Score {
        if a < b {
            self.pairs.get(&(a, b)).copied().unwrap_or_default()
        } else {
            self.pairs
                .get(&(b, a))
                .map(Score::flipped)
                .unwrap_or_default()
        }
    }

    pub fn games(&self) -> u32 {
        self.pairs.values().map(Score::games).sum()
    }

    /// 得点の高い順（同点は対局数の少ない順、次に登録順）
    pub fn ranking(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.players.len()).collect();
        order.sort_by(|&a, &b| {
            let (sa, sb) = (self.players[a], self.players[b]);
            sb.points()
                .total_cmp(&sa.points())
                .then(sa.games().cmp(&sb.games()))
                .then(a.cmp(&b))
        });
        order
    }

    /// 組ごとの表（2 者対戦なら Elo・LOS 付き）
    pub fn pair_table(&self) -> String {
        let mut out = String::new();
        for (&(i, j), score) in &self.pairs {
            if score.games() == 0 {
                continue;
            }
            let elo = score.elo().map_or("N/A".to_string(), |e| {
                format!("{:+.1} +/- {:.1}, LOS {:.1}%", e.diff, e.error, e.los * 100.0)
            });
            let _ = writeln!(
                out,
                "  {} vs {}: {}W-{}L-{}D | {} score: {:.1}% | Elo: {elo}",
                self.names[i],
                self.names[j],
                score.wins,
                score.losses,
                score.draws,
                self.names[i],
                score.ratio().unwrap_or(0.0) * 100.0,
            );
        }
        out
    }

    /// 順位表
    pub fn ranking_table(&self) -> String {
        let width = self.names.iter().map(String::len).max().unwrap_or(4).max(4);
        let mut out = String::new();
        let _ = writeln!(
            out,
            "  {:>3} {:<width$} {:>7} {:>6} {:>6} {:>6} {:>7}",
            "#", "name", "points", "games", "score", "elo", "+/-"
        );
        for (rank, idx) in self.ranking().into_iter().enumerate() {
            let s = self.players[idx];
            let (elo, err) = match s.elo() {
                Some(e) => (format!("{:+.0}", e.diff), format!("{:.0}", e.error)),
                None => ("-".to_string(), "-".to_string()),
            };
            let _ = writeln!(
                out,
                "  {:>3} {:<width$} {:>7.1} {:>6} {:>5.1}% {:>6} {:>7}",
                rank + 1,
                self.names[idx],
                s.points(),
                s.games(),
                s.ratio().unwrap_or(0.0) * 100.0,
                elo,
                err
            );
        }
        out
    }
}

fn add(total: &mut Score, delta: &Score) {
    total.wins += delta.wins;
    total.losses += delta.losses;
    total.draws += delta.draws;
}

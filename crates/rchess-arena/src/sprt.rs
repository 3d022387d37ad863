//! 2 者対戦の逐次確率比検定 (SPRT)
//!
//! 引き分け率を標本から推定する BayesElo モデルで対数尤度比を計算する。

use serde::{Deserialize, Serialize};

use crate::standings::Score;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SprtConfig {
    pub elo0: f64,
    pub elo1: f64,
    #[serde(default = "default_error_rate")]
    pub alpha: f64,
    #[serde(default = "default_error_rate")]
    pub beta: f64,
}

fn default_error_rate() -> f64 {
    0.05
}

impl SprtConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.elo0 < self.elo1) {
            return Err(format!(
                "sprt: elo0 ({}) must be less than elo1 ({})",
                self.elo0, self.elo1
            ));
        }
        for (name, v) in [("alpha", self.alpha), ("beta", self.beta)] {
            if !(v > 0.0 && v < 1.0) {
                return Err(format!("sprt: {name} must be in (0, 1), got {v}"));
            }
        }
        if self.alpha + self.beta >= 1.0 {
            return Err("sprt: alpha + beta must be less than 1".to_string());
        }
        Ok(())
    }

    /// 下限 ln(β/(1-α))
    pub fn lower_bound(&self) -> f64 {
        (self.beta / (1.0 - self.alpha)).ln()
    }

    /// 上限 ln((1-β)/α)
    pub fn upper_bound(&self) -> f64 {
        ((1.0 - self.beta) / self.alpha).ln()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SprtDecision {
    Running,
    AcceptH0,
    AcceptH1,
}

impl SprtDecision {
    pub fn classify(llr: f64, lower: f64, upper: f64) -> Self {
        if llr <= lower {
            SprtDecision::AcceptH0
        } else if llr >= upper {
            SprtDecision::AcceptH1
        } else {
            SprtDecision::Running
        }
    }

    pub fn is_final(self) -> bool {
        self != SprtDecision::Running
    }

    pub fn label(self) -> &'static str {
        match self {
            SprtDecision::Running => "running",
            SprtDecision::AcceptH0 => "H0 accepted",
            SprtDecision::AcceptH1 => "H1 accepted",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SprtStatus {
    pub llr: f64,
    pub lower: f64,
    pub upper: f64,
    pub decision: SprtDecision,
}

/// 勝率・敗率・引き分け率の組
#[derive(Clone, Copy, Debug)]
struct Probability {
    win: f64,
    loss: f64,
    draw: f64,
}

impl Probability {
    fn from_score(score: &Score) -> Self {
        let n = score.games() as f64;
        let win = score.wins as f64 / n;
        let loss = score.losses as f64 / n;
        Self {
            win,
            loss,
            draw: 1.0 - win - loss,
        }
    }

    fn from_bayes_elo(bayes_elo: f64, draw_elo: f64) -> Self {
        let win = 1.0 / (1.0 + 10f64.powf((draw_elo - bayes_elo) / 400.0));
        let loss = 1.0 / (1.0 + 10f64.powf((draw_elo + bayes_elo) / 400.0));
        Self {
            win,
            loss,
            draw: 1.0 - win - loss,
        }
    }

    fn draw_elo(&self) -> f64 {
        200.0 * ((1.0 - self.loss) / self.loss * (1.0 - self.win) / self.win).log10()
    }

    /// ロジスティック Elo → BayesElo の換算係数
    fn scale(&self) -> f64 {
        let x = 10f64.powf(-self.draw_elo() / 400.0);
        4.0 * x / ((1.0 + x) * (1.0 + x))
    }
}

/// 1 番目の選手から見た成績に対する検定状態
pub fn sprt_status(config: &SprtConfig, score: &Score) -> SprtStatus {
    let lower = config.lower_bound();
    let upper = config.upper_bound();
    // 勝ち・負け・引き分けのどれかが 0 だと引き分け Elo を推定できない
    if score.wins == 0 || score.losses == 0 || score.draws == 0 {
        return SprtStatus {
            llr: 0.0,
            lower,
            upper,
            decision: SprtDecision::Running,
        };
    }
    let p = Probability::from_score(score);
    let draw_elo = p.draw_elo();
    let s = p.scale();
    let p0 = Probability::from_bayes_elo(config.elo0 / s, draw_elo);
    let p1 = Probability::from_bayes_elo(config.elo1 / s, draw_elo);
    let llr = score.wins as f64 * (p1.win / p0.win).ln()
        + score.losses as f64 * (p1.loss / p0.loss).ln()
        + score.draws as f64 * (p1.draw / p0.draw).ln();
    SprtStatus {
        llr,
        lower,
        upper,
        decision: SprtDecision::classify(llr, lower, upper),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SprtConfig {
        SprtConfig {
            elo0: 0.0,
            elo1: 10.0,
            alpha: 0.05,
            beta: 0.05,
        }
    }

    #[test]
    fn bounds_follow_error_rates() {
        let c = config();
        assert!((c.lower_bound() + 2.944).abs() < 1e-3);
        assert!((c.upper_bound() - 2.944).abs() < 1e-3);
    }

    #[test]
    fn validate_rejects_inverted_hypotheses() {
        assert!(config().validate().is_ok());
        let mut c = config();
        c.elo1 = -5.0;
        assert!(c.validate().is_err());
        let mut c = config();
        c.alpha = 0.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn needs_all_three_result_kinds() {
        let s = Score {
            wins: 100,
            losses: 0,
            draws: 50,
        };
        let status = sprt_status(&config(), &s);
        assert_eq!(status.llr, 0.0);
        assert_eq!(status.decision, SprtDecision::Running);
    }

    #[test]
    fn clear_superiority_accepts_h1() {
        let s = Score {
            wins: 400,
            losses: 200,
            draws: 400,
        };
        let status = sprt_status(&config(), &s);
        assert!(status.llr > status.upper, "{status:?}");
        assert_eq!(status.decision, SprtDecision::AcceptH1);
    }

    #[test]
    fn clear_inferiority_accepts_h0() {
        let s = Score {
            wins: 200,
            losses: 400,
            draws: 400,
        };
        let status = sprt_status(&config(), &s);
        assert_eq!(status.decision, SprtDecision::AcceptH0);
    }

    #[test]
    fn balanced_small_sample_keeps_running() {
        let s = Score {
            wins: 10,
            losses: 10,
            draws: 20,
        };
        let status = sprt_status(&config(), &s);
        assert!(status.llr < 0.0 && status.llr > status.lower);
        assert_eq!(status.decision, SprtDecision::Running);
    }

    #[test]
    fn classify_matches_bounds() {
        assert_eq!(SprtDecision::classify(-3.0, -2.9, 2.9), SprtDecision::AcceptH0);
        assert_eq!(SprtDecision::classify(2.9, -2.9, 2.9), SprtDecision::AcceptH1);
        assert_eq!(SprtDecision::classify(0.0, -2.9, 2.9), SprtDecision::Running);
    }
}

use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// 持ち時間の方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeBudget {
    /// `moves` 手ごとに `base` を補充する持ち時間制。`moves == None` なら切れ負け / フィッシャー。
    Conventional {
        moves: Option<u32>,
        base: Duration,
        increment: Duration,
    },
    /// 1手ごとに固定時間
    FixedPerMove(Duration),
    Infinite,
}

/// 片側の時間設定。探索深さ / ノード数の上限もここで持つ。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeControl {
    pub budget: TimeBudget,
    pub ply_limit: Option<u32>,
    pub node_limit: Option<u64>,
    /// 通信遅延を吸収するための超過許容量
    pub margin: Duration,
}

impl Default for TimeControl {
    fn default() -> Self {
        Self {
            budget: TimeBudget::Infinite,
            ply_limit: None,
            node_limit: None,
            margin: Duration::ZERO,
        }
    }
}

impl TimeControl {
    pub fn conventional(moves: Option<u32>, base: Duration, increment: Duration) -> Self {
        Self {
            budget: TimeBudget::Conventional {
                moves,
                base,
                increment,
            },
            ..Default::default()
        }
    }

    pub fn per_move(time: Duration) -> Self {
        Self {
            budget: TimeBudget::FixedPerMove(time),
            ..Default::default()
        }
    }

    pub fn infinite() -> Self {
        Self::default()
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_limits(mut self, ply_limit: Option<u32>, node_limit: Option<u64>) -> Self {
        self.ply_limit = ply_limit;
        self.node_limit = node_limit;
        self
    }

    pub fn is_infinite(&self) -> bool {
        self.budget == TimeBudget::Infinite
    }

    pub fn increment(&self) -> Duration {
        match self.budget {
            TimeBudget::Conventional { increment, .. } => increment,
            _ => Duration::ZERO,
        }
    }

    pub fn moves_per_period(&self) -> Option<u32> {
        match self.budget {
            TimeBudget::Conventional { moves, .. } => moves,
            _ => None,
        }
    }

    /// `[moves/]time[+inc]`、`inf`、`st=<sec>` 形式の文字列を解釈する。
    ///
    /// `time` は秒数、または `m:ss` 形式。小数を許す。
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let err = || ConfigError::TimeControl(s.to_string());
        let s_trim = s.trim();
        if s_trim.eq_ignore_ascii_case("inf") || s_trim.eq_ignore_ascii_case("infinite") {
            return Ok(Self::infinite());
        }
        if let Some(rest) = s_trim.strip_prefix("st=") {
            let secs = parse_seconds(rest).ok_or_else(err)?;
            if secs.is_zero() {
                return Err(err());
            }
            return Ok(Self::per_move(secs));
        }

        let (moves, rest) = match s_trim.split_once('/') {
            Some((m, rest)) => {
                let moves: u32 = m.trim().parse().map_err(|_| err())?;
                if moves == 0 {
                    return Err(err());
                }
                (Some(moves), rest)
            }
            None => (None, s_trim),
        };
        let (base, increment) = match rest.split_once('+') {
            Some((b, i)) => (
                parse_seconds(b).ok_or_else(err)?,
                parse_seconds(i).ok_or_else(err)?,
            ),
            None => (parse_seconds(rest).ok_or_else(err)?, Duration::ZERO),
        };
        if base.is_zero() && increment.is_zero() {
            return Err(err());
        }
        Ok(Self::conventional(moves, base, increment))
    }
}

fn parse_seconds(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let secs = match s.split_once(':') {
        Some((m, sec)) => {
            let minutes: u64 = m.parse().ok()?;
            let seconds: f64 = sec.parse().ok()?;
            if !(0.0..60.0).contains(&seconds) {
                return None;
            }
            minutes as f64 * 60.0 + seconds
        }
        None => s.parse::<f64>().ok()?,
    };
    if secs < 0.0 {
        return None;
    }
    // NaN・無限大・Duration に収まらない値はここで弾く
    Duration::try_from_secs_f64(secs).ok()
}

fn format_seconds(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        d.as_secs().to_string()
    } else {
        let s = format!("{:.3}", d.as_secs_f64());
        s.trim_end_matches('0').to_string()
    }
}

/// PGN の TimeControl タグと同じ表記
impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.budget {
            TimeBudget::Infinite => f.write_str("inf"),
            TimeBudget::FixedPerMove(t) => write!(f, "st={}", format_seconds(t)),
            TimeBudget::Conventional {
                moves,
                base,
                increment,
            } => {
                if let Some(m) = moves {
                    write!(f, "{m}/")?;
                }
                write!(f, "{}", format_seconds(base))?;
                if !increment.is_zero() {
                    write!(f, "+{}", format_seconds(increment))?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_time_control_strings() {
        let tc = TimeControl::parse("40/300").unwrap();
        assert_eq!(
            tc.budget,
            TimeBudget::Conventional {
                moves: Some(40),
                base: Duration::from_secs(300),
                increment: Duration::ZERO
            }
        );

        let tc = TimeControl::parse("40/5:00+2").unwrap();
        assert_eq!(tc.moves_per_period(), Some(40));
        assert_eq!(tc.increment(), Duration::from_secs(2));

        let tc = TimeControl::parse("60+0.6").unwrap();
        assert_eq!(tc.moves_per_period(), None);
        assert_eq!(tc.increment(), Duration::from_millis(600));

        assert!(TimeControl::parse("inf").unwrap().is_infinite());
        assert_eq!(
            TimeControl::parse("st=2.5").unwrap().budget,
            TimeBudget::FixedPerMove(Duration::from_millis(2500))
        );
    }

    #[test]
    fn rejects_malformed_strings() {
        for bad in [
            "", "abc", "0/60", "40/", "40/1:75", "st=0", "0", "-5", "10+x", "1e30", "60+1e30",
            "st=1e30", "nan", "inf+1", "99999999999999999999:00",
        ] {
            assert!(
                matches!(TimeControl::parse(bad), Err(ConfigError::TimeControl(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn display_uses_pgn_notation() {
        assert_eq!(TimeControl::parse("40/5:00+2").unwrap().to_string(), "40/300+2");
        assert_eq!(TimeControl::parse("60+0.6").unwrap().to_string(), "60+0.6");
        assert_eq!(TimeControl::parse("st=1").unwrap().to_string(), "st=1");
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 手番（白 / 黒）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::White, Side::Black];

    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Side::White => 0,
            Side::Black => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 対局結果の勝敗部分。
///
/// `Unresolved` は終局理由が `NoResult` のときだけ使われる（PGN の `*`）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    WhiteWins,
    BlackWins,
    Draw,
    Unresolved,
}

impl Outcome {
    pub fn win_for(side: Side) -> Outcome {
        match side {
            Side::White => Outcome::WhiteWins,
            Side::Black => Outcome::BlackWins,
        }
    }

    pub fn winner(self) -> Option<Side> {
        match self {
            Outcome::WhiteWins => Some(Side::White),
            Outcome::BlackWins => Some(Side::Black),
            Outcome::Draw | Outcome::Unresolved => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::WhiteWins => "white_win",
            Outcome::BlackWins => "black_win",
            Outcome::Draw => "draw",
            Outcome::Unresolved => "no_result",
        }
    }

    /// PGN の Result タグ表記
    pub fn pgn_token(self) -> &'static str {
        match self {
            Outcome::WhiteWins => "1-0",
            Outcome::BlackWins => "0-1",
            Outcome::Draw => "1/2-1/2",
            Outcome::Unresolved => "*",
        }
    }
}

/// 終局理由
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    Repetition,
    FiftyMoves,
    Resignation,
    Timeout,
    IllegalMove,
    AdjudicationDraw,
    AdjudicationWin,
    Disconnection,
    Agreement,
    NoResult,
}

impl Termination {
    pub fn label(self) -> &'static str {
        match self {
            Termination::Checkmate => "checkmate",
            Termination::Stalemate => "stalemate",
            Termination::InsufficientMaterial => "insufficient_material",
            Termination::Repetition => "repetition",
            Termination::FiftyMoves => "fifty_moves",
            Termination::Resignation => "resignation",
            Termination::Timeout => "timeout",
            Termination::IllegalMove => "illegal_move",
            Termination::AdjudicationDraw => "adjudication_draw",
            Termination::AdjudicationWin => "adjudication_win",
            Termination::Disconnection => "disconnection",
            Termination::Agreement => "agreement",
            Termination::NoResult => "no_result",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 1局の最終結果。一度 Game に付いたら変化しない。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    pub outcome: Outcome,
    pub termination: Termination,
    /// 補足（不正手の文字列、クラッシュ時の終了コードなど）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl GameResult {
    pub fn new(outcome: Outcome, termination: Termination) -> Self {
        Self {
            outcome,
            termination,
            detail: None,
        }
    }

    /// `loser` の負け
    pub fn loss_for(loser: Side, termination: Termination) -> Self {
        Self::new(Outcome::win_for(loser.opposite()), termination)
    }

    pub fn draw(termination: Termination) -> Self {
        Self::new(Outcome::Draw, termination)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn winner(&self) -> Option<Side> {
        self.outcome.winner()
    }

    pub fn loser(&self) -> Option<Side> {
        self.winner().map(Side::opposite)
    }

    pub fn is_draw(&self) -> bool {
        self.outcome == Outcome::Draw
    }

    /// PGN Termination タグ向けの説明文
    pub fn description(&self) -> String {
        let base = match (self.outcome, self.termination) {
            (Outcome::Draw, t) => format!("draw by {}", t.label().replace('_', " ")),
            (Outcome::Unresolved, _) => "no result".to_string(),
            (o, t) => format!(
                "{} wins by {}",
                o.winner().map(Side::label).unwrap_or("nobody"),
                t.label().replace('_', " ")
            ),
        };
        match &self.detail {
            Some(detail) => format!("{base} ({detail})"),
            None => base,
        }
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{{}}}", self.outcome.pgn_token(), self.description())
    }
}

/// 結果を一度だけ保持するスロット。
///
/// 2 回目以降の `set` は無視され `false` を返す。
#[derive(Debug, Default)]
pub struct ResultSlot {
    result: Option<GameResult>,
}

impl ResultSlot {
    pub fn set(&mut self, result: GameResult) -> bool {
        if let Some(existing) = &self.result {
            log::warn!("ignoring second result {result} (already finished with {existing})");
            return false;
        }
        self.result = Some(result);
        true
    }

    pub fn get(&self) -> Option<&GameResult> {
        self.result.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.result.is_some()
    }

    pub fn take(self) -> Option<GameResult> {
        self.result
    }
}

/// 探索情報（info 行 / thinking 出力から組み立てる）
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct EvalLog {
    /// 手番側から見た評価値（centipawn）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_cp: Option<i32>,
    /// 詰み手数（正なら手番側の勝ち）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_mate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seldepth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv: Option<Vec<String>>,
}

impl EvalLog {
    pub fn is_empty(&self) -> bool {
        *self == EvalLog::default()
    }

    /// 判定用の単一スコア。mate n は `30001 - 2n` / `-30000 - 2n` に写す。
    pub fn score(&self) -> Option<i32> {
        match (self.score_mate, self.score_cp) {
            (Some(n), _) if n > 0 => Some(30001 - 2 * n),
            (Some(n), _) => Some(-30000 - 2 * n),
            (None, cp) => cp,
        }
    }

    /// 後から届いた情報で上書きする（None のフィールドは保持）。
    pub fn merge(&mut self, newer: &EvalLog) {
        if newer.score_cp.is_some() || newer.score_mate.is_some() {
            self.score_cp = newer.score_cp;
            self.score_mate = newer.score_mate;
        }
        if newer.depth.is_some() {
            self.depth = newer.depth;
        }
        if newer.seldepth.is_some() {
            self.seldepth = newer.seldepth;
        }
        if newer.nodes.is_some() {
            self.nodes = newer.nodes;
        }
        if newer.time_ms.is_some() {
            self.time_ms = newer.time_ms;
        }
        if newer.nps.is_some() {
            self.nps = newer.nps;
        }
        if newer.pv.is_some() {
            self.pv = newer.pv.clone();
        }
    }
}

/// 指し手 1 つ分の記録（中立表記 + 消費時間 + 探索情報）
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MoveRecord {
    pub ply: u32,
    pub side: Side,
    /// 中立表記（long algebraic / UCI 形式）
    pub mv: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub san: Option<String>,
    pub elapsed_ms: u64,
    /// オープニング由来の強制手
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub book: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval: Option<EvalLog>,
}

pub fn duration_to_millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_slot_keeps_first_result() {
        let mut slot = ResultSlot::default();
        assert!(slot.set(GameResult::loss_for(Side::White, Termination::Timeout)));
        assert!(!slot.set(GameResult::draw(Termination::Agreement)));
        let result = slot.take().unwrap();
        assert_eq!(result.outcome, Outcome::BlackWins);
        assert_eq!(result.termination, Termination::Timeout);
    }

    #[test]
    fn eval_merge_keeps_missing_fields() {
        let mut eval = EvalLog {
            score_cp: Some(20),
            depth: Some(8),
            nodes: Some(1000),
            ..Default::default()
        };
        eval.merge(&EvalLog {
            depth: Some(9),
            score_mate: Some(3),
            ..Default::default()
        });
        assert_eq!(eval.depth, Some(9));
        assert_eq!(eval.nodes, Some(1000));
        assert_eq!(eval.score_cp, None);
        assert_eq!(eval.score_mate, Some(3));
        assert_eq!(eval.score(), Some(29995));
    }

    #[test]
    fn mated_score_is_below_any_centipawn_score() {
        let eval = EvalLog {
            score_mate: Some(-2),
            ..Default::default()
        };
        assert_eq!(eval.score(), Some(-29996));
    }

    #[test]
    fn result_description_names_winner_and_cause() {
        let r = GameResult::loss_for(Side::Black, Termination::IllegalMove).with_detail("e7e4");
        assert_eq!(r.to_string(), "1-0 {white wins by illegal move (e7e4)}");
        assert_eq!(
            GameResult::draw(Termination::AdjudicationDraw).description(),
            "draw by adjudication draw"
        );
    }
}

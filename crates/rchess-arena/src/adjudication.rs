//! 勝敗の裁定。
//!
//! 状態を持たない純粋関数 [`adjudicate`] が、明示的な [`ScoreHistory`] と局面情報だけから
//! 判定する。同じ履歴に対して何度呼んでも同じ結果になる。

use std::collections::VecDeque;

use serde::Deserialize;

use crate::types::{GameResult, Outcome, Side, Termination};

/// 保持する半手数の上限。連続回数の判定にはこれで足りる。
pub const HISTORY_WINDOW: usize = 512;
const MAX_RULE_MOVES: u32 = (HISTORY_WINDOW / 2) as u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DrawRule {
    /// この手数に達するまでは引き分け判定しない
    #[serde(default)]
    pub move_number: u32,
    /// 両者の評価値が帯の中に留まる必要がある手数
    pub move_count: u32,
    /// 帯の幅（centipawn、絶対値）
    pub score: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResignRule {
    pub move_count: u32,
    /// 投了とみなす評価値（正の値で指定し、`-score` 以下が続いたら負け）
    pub score: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdjudicationConfig {
    /// この手数に達するまでは一切裁定しない
    #[serde(default)]
    pub min_move_number: u32,
    pub draw: Option<DrawRule>,
    pub resign: Option<ResignRule>,
    /// この手数に達したら引き分け
    pub max_moves: Option<u32>,
    #[serde(default)]
    pub tablebase: bool,
    #[serde(default = "default_tablebase_pieces")]
    pub tablebase_pieces: u32,
}

fn default_tablebase_pieces() -> u32 {
    6
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        Self {
            min_move_number: 0,
            draw: None,
            resign: None,
            max_moves: None,
            tablebase: false,
            tablebase_pieces: default_tablebase_pieces(),
        }
    }
}

impl AdjudicationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(draw) = &self.draw {
            if draw.move_count == 0 || draw.move_count > MAX_RULE_MOVES || draw.score < 0 {
                return Err(format!(
                    "draw adjudication needs 1..={MAX_RULE_MOVES} moves and a non-negative score"
                ));
            }
        }
        if let Some(resign) = &self.resign {
            if resign.move_count == 0 || resign.move_count > MAX_RULE_MOVES || resign.score <= 0 {
                return Err(format!(
                    "resign adjudication needs 1..={MAX_RULE_MOVES} moves and a positive score"
                ));
            }
        }
        if self.max_moves == Some(0) {
            return Err("max_moves must be at least 1".into());
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.draw.is_some() || self.resign.is_some() || self.max_moves.is_some() || self.tablebase
    }
}

/// 終盤データベースの判定
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TablebaseVerdict {
    Win(Side),
    Draw,
}

/// 駒数の少ない局面の結果を返す外部オラクル
pub trait TablebaseOracle: Send + Sync {
    fn max_pieces(&self) -> u32;
    fn probe(&self, fen: &str) -> Option<TablebaseVerdict>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ScoreEntry {
    side: Side,
    /// 指した側から見た評価値。None は連続を途切れさせる（定跡手、深さ 0 の評価など）。
    score: Option<i32>,
}

/// 半手ごとの評価値の履歴（直近 [`HISTORY_WINDOW`] 半手分）
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScoreHistory {
    entries: VecDeque<ScoreEntry>,
}

impl ScoreHistory {
    pub fn push(&mut self, side: Side, score: Option<i32>) {
        if self.entries.len() == HISTORY_WINDOW {
            self.entries.pop_front();
        }
        self.entries.push_back(ScoreEntry { side, score });
    }

    /// 連続判定をリセットする（定跡手など）
    pub fn push_reset(&mut self, side: Side) {
        self.push(side, None);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 末尾から連続して |score| <= band である半手数
    fn draw_streak(&self, band: i32) -> u32 {
        self.entries
            .iter()
            .rev()
            .take_while(|e| e.score.is_some_and(|s| s.abs() <= band))
            .count() as u32
    }

    /// `side` 自身の手について、末尾から連続して score <= -threshold である手数
    fn resign_streak(&self, side: Side, threshold: i32) -> u32 {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.side == side)
            .take_while(|e| e.score.is_some_and(|s| s <= -threshold))
            .count() as u32
    }
}

/// 1回の裁定に必要な局面情報
#[derive(Clone, Copy, Debug)]
pub struct AdjudicationInput<'a> {
    pub history: &'a ScoreHistory,
    /// 開始局面からの半手数
    pub plies: u32,
    pub piece_count: u32,
    pub fen: &'a str,
}

/// 裁定する。判定が出なければ None。
///
/// 優先順位は tablebase、引き分け、投了、最大手数。`min_move_number` に達するまでは何もしない。
pub fn adjudicate(
    config: &AdjudicationConfig,
    input: &AdjudicationInput<'_>,
    oracle: Option<&dyn TablebaseOracle>,
) -> Option<GameResult> {
    let moves_played = input.plies / 2;
    if moves_played < config.min_move_number {
        return None;
    }

    if config.tablebase {
        if let Some(oracle) = oracle {
            let limit = config.tablebase_pieces.min(oracle.max_pieces());
            if input.piece_count <= limit {
                if let Some(verdict) = oracle.probe(input.fen) {
                    let result = match verdict {
                        TablebaseVerdict::Win(side) => {
                            GameResult::new(Outcome::win_for(side), Termination::AdjudicationWin)
                        }
                        TablebaseVerdict::Draw => GameResult::draw(Termination::AdjudicationDraw),
                    };
                    return Some(result.with_detail("tablebase"));
                }
            }
        }
    }

    if let Some(draw) = &config.draw {
        if moves_played >= draw.move_number
            && input.history.draw_streak(draw.score) >= draw.move_count * 2
        {
            return Some(GameResult::draw(Termination::AdjudicationDraw).with_detail("score"));
        }
    }

    if let Some(resign) = &config.resign {
        for side in Side::BOTH {
            if input.history.resign_streak(side, resign.score) >= resign.move_count {
                return Some(
                    GameResult::loss_for(side, Termination::AdjudicationWin).with_detail("score"),
                );
            }
        }
    }

    if let Some(max) = config.max_moves {
        if moves_played >= max {
            return Some(GameResult::draw(Termination::AdjudicationDraw).with_detail("max moves"));
        }
    }
    None
}

//! 合法手判定と局面管理を担う外部サービスの境界。
//!
//! コーディネータはここで定義したトレイトだけを呼び、駒の動きは知らない。

#[cfg(feature = "standard-board")]
pub mod standard;

use crate::error::BoardError;
use crate::types::{GameResult, Side, Termination};

#[cfg(feature = "standard-board")]
pub use standard::{StandardBoard, StandardBoardProvider};

/// 盤面側が判定した終局状態
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardTerminal {
    Checkmate { winner: Side },
    Stalemate,
    InsufficientMaterial,
    Repetition,
    FiftyMoves,
}

impl BoardTerminal {
    pub fn to_result(self) -> GameResult {
        match self {
            BoardTerminal::Checkmate { winner } => {
                GameResult::loss_for(winner.opposite(), Termination::Checkmate)
            }
            BoardTerminal::Stalemate => GameResult::draw(Termination::Stalemate),
            BoardTerminal::InsufficientMaterial => GameResult::draw(Termination::InsufficientMaterial),
            BoardTerminal::Repetition => GameResult::draw(Termination::Repetition),
            BoardTerminal::FiftyMoves => GameResult::draw(Termination::FiftyMoves),
        }
    }

    pub fn is_draw(self) -> bool {
        !matches!(self, BoardTerminal::Checkmate { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptedMove {
    /// 中立表記（UCI 形式）
    pub mv: String,
    pub san: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MoveVerdict {
    Accepted {
        mv: AcceptedMove,
        terminal: Option<BoardTerminal>,
    },
    Rejected {
        reason: String,
    },
}

/// 1局分の局面。
pub trait BoardService: Send {
    fn variant(&self) -> &str;
    fn side_to_move(&self) -> Side;
    fn fen(&self) -> String;
    /// 開始局面の FEN。標準初期局面なら None。
    fn start_fen(&self) -> Option<&str>;
    /// 開始局面から受理された手（中立表記）
    fn moves(&self) -> &[String];
    /// UCI 形式または SAN の手を検査し、合法なら適用する。
    fn apply(&mut self, mv: &str) -> MoveVerdict;
    fn terminal(&self) -> Option<BoardTerminal>;
    /// 盤上の駒数（キングを含む）
    fn piece_count(&self) -> u32;
    fn fullmove_number(&self) -> u32;
}

pub trait BoardProvider: Send + Sync {
    fn supports_variant(&self, variant: &str) -> bool;
    fn create(&self, variant: &str, start_fen: Option<&str>) -> Result<Box<dyn BoardService>, BoardError>;

    /// 開始局面から `moves` を並べた盤を作る。
    fn replay(
        &self,
        variant: &str,
        start_fen: Option<&str>,
        moves: &[String],
    ) -> Result<Box<dyn BoardService>, BoardError> {
        let mut board = self.create(variant, start_fen)?;
        for mv in moves {
            if let MoveVerdict::Rejected { .. } = board.apply(mv) {
                return Err(BoardError::IllegalMove {
                    mv: mv.clone(),
                    fen: board.fen(),
                });
            }
        }
        Ok(board)
    }
}

use std::collections::HashMap;

use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, Position};

use crate::board::{AcceptedMove, BoardProvider, BoardService, BoardTerminal, MoveVerdict};
use crate::error::BoardError;
use crate::protocol::is_standard_variant;
use crate::types::Side;

/// 50 手ルール（半手数）
const FIFTY_MOVE_PLIES: u32 = 100;
const REPETITION_LIMIT: u32 = 3;

/// shakmaty による標準チェス（と Chess960）の盤
pub struct StandardBoard {
    variant: String,
    position: Chess,
    mode: CastlingMode,
    start_fen: Option<String>,
    moves: Vec<String>,
    /// FEN の先頭 4 フィールド → 出現回数
    seen: HashMap<String, u32>,
    repetitions: u32,
}

impl StandardBoard {
    pub fn new(variant: &str, start_fen: Option<&str>) -> Result<Self, BoardError> {
        let mode = if is_standard_variant(variant) {
            CastlingMode::Standard
        } else if is_chess960(variant) {
            CastlingMode::Chess960
        } else {
            return Err(BoardError::UnsupportedVariant(variant.to_string()));
        };
        let position = match start_fen {
            Some(fen_str) => {
                let invalid = |reason: String| BoardError::InvalidFen {
                    fen: fen_str.to_string(),
                    reason,
                };
                let fen: Fen = fen_str.parse().map_err(|e| invalid(format!("{e}")))?;
                fen.into_position(mode).map_err(|e| invalid(format!("{e}")))?
            }
            None => Chess::default(),
        };
        let mut board = Self {
            variant: variant.to_string(),
            position,
            mode,
            start_fen: start_fen.map(str::to_string),
            moves: Vec::new(),
            seen: HashMap::new(),
            repetitions: 1,
        };
        board.record_position();
        Ok(board)
    }

    fn record_position(&mut self) {
        let key = repetition_key(&self.fen());
        let count = self.seen.entry(key).or_insert(0);
        *count += 1;
        self.repetitions = *count;
    }

    fn parse_move(&self, text: &str) -> Option<Move> {
        if let Ok(uci) = text.parse::<UciMove>() {
            if let Ok(m) = uci.to_move(&self.position) {
                return Some(m);
            }
        }
        let san: SanPlus = text.parse().ok()?;
        san.san.to_move(&self.position).ok()
    }
}

fn is_chess960(variant: &str) -> bool {
    variant.eq_ignore_ascii_case("fischerandom") || variant.eq_ignore_ascii_case("chess960")
}

/// 手番・配置・キャスリング権・アンパッサンが同じなら同一局面
fn repetition_key(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

fn to_side(color: Color) -> Side {
    match color {
        Color::White => Side::White,
        Color::Black => Side::Black,
    }
}

impl BoardService for StandardBoard {
    fn variant(&self) -> &str {
        &self.variant
    }

    fn side_to_move(&self) -> Side {
        to_side(self.position.turn())
    }

    fn fen(&self) -> String {
        Fen::from_position(self.position.clone(), EnPassantMode::Legal).to_string()
    }

    fn start_fen(&self) -> Option<&str> {
        self.start_fen.as_deref()
    }

    fn moves(&self) -> &[String] {
        &self.moves
    }

    fn apply(&mut self, text: &str) -> MoveVerdict {
        if self.terminal().is_some() {
            return MoveVerdict::Rejected {
                reason: "game is already over".to_string(),
            };
        }
        let Some(m) = self.parse_move(text.trim()) else {
            return MoveVerdict::Rejected {
                reason: format!("`{text}` is not a legal move in {}", self.fen()),
            };
        };
        let mut san = shakmaty::san::San::from_move(&self.position, &m).to_string();
        let uci = m.to_uci(self.mode).to_string();
        match self.position.clone().play(&m) {
            Ok(next) => self.position = next,
            Err(e) => {
                return MoveVerdict::Rejected {
                    reason: format!("{e}"),
                };
            }
        }
        if self.position.is_checkmate() {
            san.push('#');
        } else if self.position.is_check() {
            san.push('+');
        }
        self.moves.push(uci.clone());
        self.record_position();
        MoveVerdict::Accepted {
            mv: AcceptedMove { mv: uci, san },
            terminal: self.terminal(),
        }
    }

    fn terminal(&self) -> Option<BoardTerminal> {
        if self.position.is_checkmate() {
            return Some(BoardTerminal::Checkmate {
                winner: to_side(self.position.turn().other()),
            });
        }
        if self.position.is_stalemate() {
            return Some(BoardTerminal::Stalemate);
        }
        if self.position.is_insufficient_material() {
            return Some(BoardTerminal::InsufficientMaterial);
        }
        if self.repetitions >= REPETITION_LIMIT {
            return Some(BoardTerminal::Repetition);
        }
        if self.position.halfmoves() >= FIFTY_MOVE_PLIES {
            return Some(BoardTerminal::FiftyMoves);
        }
        None
    }

    fn piece_count(&self) -> u32 {
        self.position.board().occupied().count() as u32
    }

    fn fullmove_number(&self) -> u32 {
        self.position.fullmoves().get()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StandardBoardProvider;

impl BoardProvider for StandardBoardProvider {
    fn supports_variant(&self, variant: &str) -> bool {
        is_standard_variant(variant) || is_chess960(variant)
    }

    fn create(&self, variant: &str, start_fen: Option<&str>) -> Result<Box<dyn BoardService>, BoardError> {
        Ok(Box::new(StandardBoard::new(variant, start_fen)?))
    }
}

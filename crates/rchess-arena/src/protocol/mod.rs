//! エンジン制御プロトコル（UCI / xboard）と中立的なコマンド・イベント語彙との変換。
//!
//! どちらの実装も [`ProtocolAdapter`] の 1 バリアントで、プロセスの入出力は持たない。
//! 送るべき行を返し、受け取った行を [`EngineEvent`] に変換するだけの純粋な状態機械。

pub mod uci;
pub mod xboard;

use std::time::Duration;

use serde::Deserialize;

use crate::clock::ClockSnapshot;
use crate::error::ProtocolError;
use crate::options::EngineOption;
use crate::time_control::TimeControl;
use crate::types::{EvalLog, Outcome, Side};

pub use uci::UciAdapter;
pub use xboard::XboardAdapter;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    #[default]
    Uci,
    #[serde(alias = "cecp")]
    Xboard,
}

/// ハンドシェイクで判明したエンジンの能力
#[derive(Clone, Debug, Default)]
pub struct Capabilities {
    pub name: Option<String>,
    pub author: Option<String>,
    pub options: Vec<EngineOption>,
    /// 空なら standard のみ
    pub variants: Vec<String>,
    pub setboard: bool,
    pub ping: bool,
    /// false なら対局ごとにプロセスを作り直す（xboard `reuse=0`）
    pub reuse: bool,
    pub usermove: bool,
    pub draw_offers: bool,
    pub nps: bool,
    /// 宣言されたが処理系が扱わない項目（エラーにはしない）
    pub unknown: Vec<String>,
}

impl Capabilities {
    pub fn supports_variant(&self, variant: &str) -> bool {
        if is_standard_variant(variant) {
            return true;
        }
        self.variants.iter().any(|v| v.eq_ignore_ascii_case(variant))
    }
}

pub fn is_standard_variant(variant: &str) -> bool {
    variant.eq_ignore_ascii_case("standard") || variant.eq_ignore_ascii_case("normal")
}

/// エンジンによる終局宣言
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Claim {
    Resign,
    /// `1-0` / `0-1` / `1/2-1/2` / `*` とその理由
    Result { outcome: Outcome, comment: String },
}

/// エンジン出力 1 行の解釈結果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    BestMove { mv: String, ponder: Option<String> },
    Info(EvalLog),
    IllegalMoveReport { mv: Option<String>, reason: String },
    Claim(Claim),
    DrawOffer,
    /// `readyok` / `pong`
    Ready,
    /// 待っていた応答が壊れている、または順序が不正
    Violation(String),
    Crash(Option<i32>),
    Ignorable,
}

/// ハンドシェイク中の 1 行に対する応答
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Handshake {
    Pending,
    /// 送り返す行があり、まだ続く
    Reply(Vec<String>),
    /// 完了（最後に送る行があれば含む）
    Complete(Vec<String>),
    /// 待ち時間を延長（xboard `done=0`）
    Extend(Vec<String>, Duration),
}

/// 対局開始時にアダプタへ渡す情報
#[derive(Clone, Debug)]
pub struct GameSetup<'a> {
    pub variant: &'a str,
    /// None なら初期局面
    pub start_fen: Option<&'a str>,
    pub own_side: Side,
    pub time_control: &'a TimeControl,
    pub opponent_name: &'a str,
    pub ponder: bool,
}

/// 探索を依頼する時点の局面
#[derive(Clone, Copy, Debug)]
pub struct PositionView<'a> {
    pub start_fen: Option<&'a str>,
    pub moves: &'a [String],
}

/// プロトコル種別でタグ付けされたアダプタ
pub enum ProtocolAdapter {
    Uci(UciAdapter),
    Xboard(XboardAdapter),
}

macro_rules! dispatch {
    ($self:ident, $a:ident => $body:expr) => {
        match $self {
            ProtocolAdapter::Uci($a) => $body,
            ProtocolAdapter::Xboard($a) => $body,
        }
    };
}

impl ProtocolAdapter {
    pub fn new(kind: ProtocolKind, engine: &str, white_pov: bool) -> Self {
        match kind {
            ProtocolKind::Uci => ProtocolAdapter::Uci(UciAdapter::new(engine)),
            ProtocolKind::Xboard => ProtocolAdapter::Xboard(XboardAdapter::new(engine, white_pov)),
        }
    }

    pub fn kind(&self) -> ProtocolKind {
        match self {
            ProtocolAdapter::Uci(_) => ProtocolKind::Uci,
            ProtocolAdapter::Xboard(_) => ProtocolKind::Xboard,
        }
    }

    /// 起動直後に送る行と、最初の応答を待つ時間
    pub fn start_commands(&mut self) -> (Vec<String>, Duration) {
        dispatch!(self, a => a.start_commands())
    }

    pub fn handshake_line(&mut self, line: &str) -> Handshake {
        dispatch!(self, a => a.handshake_line(line))
    }

    /// 待ち時間切れ。xboard は protover 1 とみなして続行、UCI はエラー。
    pub fn handshake_timeout(&mut self, waited: Duration) -> Result<Vec<String>, ProtocolError> {
        dispatch!(self, a => a.handshake_timeout(waited))
    }

    pub fn capabilities(&self) -> &Capabilities {
        dispatch!(self, a => a.capabilities())
    }

    /// 設定値を送る行。値は検査せずそのまま送る。
    pub fn option_commands(&self, name: &str, value: &str) -> Vec<String> {
        dispatch!(self, a => a.option_commands(name, value))
    }

    /// 同期要求（`isready` / `ping`）。同期できない場合は None。
    pub fn sync_command(&mut self) -> Option<String> {
        dispatch!(self, a => a.sync_command())
    }

    pub fn new_game_commands(&mut self, setup: &GameSetup<'_>) -> Result<Vec<String>, ProtocolError> {
        dispatch!(self, a => a.new_game_commands(setup))
    }

    pub fn set_position(&mut self, position: PositionView<'_>) {
        dispatch!(self, a => a.set_position(position))
    }

    pub fn request_move(&mut self, clock: &ClockSnapshot) -> Vec<String> {
        dispatch!(self, a => a.request_move(clock))
    }

    /// 相手の手番中の先読みを開始する。対応しなければ空。
    pub fn start_ponder(&mut self, ponder_move: &str, clock: &ClockSnapshot) -> Vec<String> {
        dispatch!(self, a => a.start_ponder(ponder_move, clock))
    }

    /// 相手の実際の手を受けて先読みを処理する。`true` なら探索は継続中（ponderhit）。
    pub fn resolve_ponder(&mut self, actual: &str) -> (Vec<String>, bool) {
        dispatch!(self, a => a.resolve_ponder(actual))
    }

    pub fn is_pondering(&self) -> bool {
        dispatch!(self, a => a.is_pondering())
    }

    pub fn stop_commands(&mut self) -> Vec<String> {
        dispatch!(self, a => a.stop_commands())
    }

    /// 相手からの引き分け提案をエンジンに伝える行
    pub fn draw_offer_commands(&self) -> Vec<String> {
        dispatch!(self, a => a.draw_offer_commands())
    }

    pub fn game_end_commands(&mut self, outcome: Outcome, comment: &str) -> Vec<String> {
        dispatch!(self, a => a.game_end_commands(outcome, comment))
    }

    pub fn quit_commands(&self) -> Vec<String> {
        vec!["quit".to_string()]
    }

    pub fn parse_line(&mut self, line: &str) -> EngineEvent {
        dispatch!(self, a => a.parse_line(line))
    }
}

/// `go` / `time` 用にミリ秒へ丸める（無制限は上限で頭打ち）
pub(crate) fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u32::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_kind_from_toml() {
        #[derive(Deserialize)]
        struct W {
            p: ProtocolKind,
        }
        let w: W = toml::from_str("p = \"cecp\"").unwrap();
        assert_eq!(w.p, ProtocolKind::Xboard);
        let w: W = toml::from_str("p = \"uci\"").unwrap();
        assert_eq!(w.p, ProtocolKind::Uci);
    }

    #[test]
    fn adapter_reports_its_kind() {
        let a = ProtocolAdapter::new(ProtocolKind::Xboard, "x", false);
        assert_eq!(a.kind(), ProtocolKind::Xboard);
        assert!(a.capabilities().supports_variant("standard"));
    }
}

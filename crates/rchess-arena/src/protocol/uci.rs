use std::time::Duration;

use crate::clock::ClockSnapshot;
use crate::error::ProtocolError;
use crate::options::{EngineOption, find_option};
use crate::protocol::{
    Capabilities, EngineEvent, GameSetup, Handshake, PositionView, is_standard_variant, millis,
};
use crate::time_control::TimeBudget;
use crate::types::{EvalLog, Outcome};

pub const UCI_INIT_TIMEOUT: Duration = Duration::from_secs(15);

const NON_VARIANT_UCI_OPTIONS: [&str; 7] = [
    "AnalyseMode",
    "LimitStrength",
    "ShowCurrLine",
    "ShowRefutations",
    "ShowWDL",
    "Ponder",
    "EngineAbout",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SearchState {
    Idle,
    Thinking,
    Pondering,
}

/// UCI: 毎手 `position` で局面を丸ごと送り、`go` で残り時間の絶対値を渡す。
pub struct UciAdapter {
    engine: String,
    caps: Capabilities,
    state: SearchState,
    /// 停止させた先読み探索の bestmove を捨てる数
    discard_bestmoves: u32,
    position: String,
    ponder_move: Option<String>,
}

impl UciAdapter {
    pub fn new(engine: &str) -> Self {
        Self {
            engine: engine.to_string(),
            caps: Capabilities {
                reuse: true,
                ..Default::default()
            },
            state: SearchState::Idle,
            discard_bestmoves: 0,
            position: "position startpos".to_string(),
            ponder_move: None,
        }
    }

    pub fn start_commands(&mut self) -> (Vec<String>, Duration) {
        (vec!["uci".to_string()], UCI_INIT_TIMEOUT)
    }

    pub fn handshake_line(&mut self, line: &str) -> Handshake {
        let line = line.trim();
        if line == "uciok" {
            return Handshake::Complete(Vec::new());
        }
        if let Some(rest) = line.strip_prefix("id ") {
            let rest = rest.trim_start();
            if let Some(name) = rest.strip_prefix("name ") {
                self.caps.name = Some(name.trim().to_string());
            } else if let Some(author) = rest.strip_prefix("author ") {
                self.caps.author = Some(author.trim().to_string());
            }
        } else if let Some(rest) = line.strip_prefix("option ") {
            match EngineOption::parse_uci(rest) {
                Some(opt) => {
                    if let Some(variant) = opt.name.strip_prefix("UCI_") {
                        if variant == "Chess960" {
                            self.caps.variants.push("fischerandom".to_string());
                        } else if matches!(opt.kind, crate::options::OptionKind::Check { .. })
                            && !NON_VARIANT_UCI_OPTIONS.contains(&variant)
                        {
                            self.caps.variants.push(variant.to_ascii_lowercase());
                        }
                    }
                    self.caps.options.push(opt);
                }
                None => {
                    log::debug!("{}: unparsable option line `{line}`", self.engine);
                    self.caps.unknown.push(rest.to_string());
                }
            }
        }
        Handshake::Pending
    }

    pub fn handshake_timeout(&mut self, waited: Duration) -> Result<Vec<String>, ProtocolError> {
        Err(ProtocolError::HandshakeTimeout {
            engine: self.engine.clone(),
            waiting_for: "uciok".to_string(),
            timeout: waited,
        })
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn option_commands(&self, name: &str, value: &str) -> Vec<String> {
        let is_button = matches!(
            find_option(&self.caps.options, name).map(|o| &o.kind),
            Some(crate::options::OptionKind::Button)
        );
        if is_button || value.is_empty() {
            vec![format!("setoption name {name}")]
        } else {
            vec![format!("setoption name {name} value {value}")]
        }
    }

    pub fn sync_command(&mut self) -> Option<String> {
        Some("isready".to_string())
    }

    pub fn new_game_commands(&mut self, setup: &GameSetup<'_>) -> Result<Vec<String>, ProtocolError> {
        self.state = SearchState::Idle;
        self.discard_bestmoves = 0;
        self.ponder_move = None;
        let mut cmds = Vec::new();
        if !is_standard_variant(setup.variant) {
            let v = setup.variant.to_ascii_lowercase();
            if v == "fischerandom" || v == "chess960" {
                if find_option(&self.caps.options, "UCI_Chess960").is_none() {
                    return Err(self.unsupported(setup.variant));
                }
                cmds.push("setoption name UCI_Chess960 value true".to_string());
            } else {
                let option = self
                    .caps
                    .options
                    .iter()
                    .find(|o| o.name.strip_prefix("UCI_").is_some_and(|n| n.eq_ignore_ascii_case(&v)))
                    .ok_or_else(|| self.unsupported(setup.variant))?;
                cmds.push(format!("setoption name {} value true", option.name));
            }
        }
        if find_option(&self.caps.options, "Ponder").is_some() {
            cmds.push(format!("setoption name Ponder value {}", setup.ponder));
        }
        if find_option(&self.caps.options, "UCI_Opponent").is_some() {
            cmds.push(format!(
                "setoption name UCI_Opponent value none none computer {}",
                setup.opponent_name
            ));
        }
        cmds.push("ucinewgame".to_string());
        self.set_position(PositionView {
            start_fen: setup.start_fen,
            moves: &[],
        });
        Ok(cmds)
    }

    fn unsupported(&self, variant: &str) -> ProtocolError {
        ProtocolError::Unsupported {
            engine: self.engine.clone(),
            request: format!("variant {variant}"),
        }
    }

    pub fn set_position(&mut self, position: PositionView<'_>) {
        self.position = position_command(position.start_fen, position.moves.iter().map(String::as_str));
    }

    pub fn request_move(&mut self, clock: &ClockSnapshot) -> Vec<String> {
        self.state = SearchState::Thinking;
        vec![self.position.clone(), go_command(clock, false)]
    }

    pub fn start_ponder(&mut self, ponder_move: &str, clock: &ClockSnapshot) -> Vec<String> {
        let position = format!(
            "{}{}{ponder_move}",
            self.position,
            if self.position.contains(" moves ") { " " } else { " moves " }
        );
        self.state = SearchState::Pondering;
        self.ponder_move = Some(ponder_move.to_string());
        vec![position, go_command(clock, true)]
    }

    pub fn resolve_ponder(&mut self, actual: &str) -> (Vec<String>, bool) {
        if self.state != SearchState::Pondering {
            return (Vec::new(), false);
        }
        let expected = self.ponder_move.take();
        if expected.as_deref() == Some(actual) {
            self.state = SearchState::Thinking;
            (vec!["ponderhit".to_string()], true)
        } else {
            self.state = SearchState::Idle;
            self.discard_bestmoves += 1;
            (vec!["stop".to_string()], false)
        }
    }

    pub fn is_pondering(&self) -> bool {
        self.state == SearchState::Pondering
    }

    #[cfg(test)]
    fn is_thinking(&self) -> bool {
        self.state == SearchState::Thinking
    }

    /// 探索中なら `stop` を送り、遅れて届く bestmove を 1 つ捨てる予約をする
    pub fn stop_commands(&mut self) -> Vec<String> {
        if self.state == SearchState::Idle {
            return Vec::new();
        }
        self.state = SearchState::Idle;
        self.ponder_move = None;
        self.discard_bestmoves += 1;
        vec!["stop".to_string()]
    }

    pub fn draw_offer_commands(&self) -> Vec<String> {
        Vec::new()
    }

    pub fn game_end_commands(&mut self, _outcome: Outcome, _comment: &str) -> Vec<String> {
        self.stop_commands()
    }

    pub fn parse_line(&mut self, line: &str) -> EngineEvent {
        let line = line.trim();
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("bestmove") => {
                if self.discard_bestmoves > 0 {
                    self.discard_bestmoves -= 1;
                    log::debug!("{}: discarding stale `{line}`", self.engine);
                    return EngineEvent::Ignorable;
                }
                if self.state != SearchState::Thinking {
                    return EngineEvent::Violation(format!("unexpected `{line}` while not thinking"));
                }
                let Some(mv) = tokens.next() else {
                    return EngineEvent::Violation(format!("`{line}` carries no move"));
                };
                let ponder = match (tokens.next(), tokens.next()) {
                    (Some("ponder"), Some(p)) => Some(p.to_string()),
                    _ => None,
                };
                self.state = SearchState::Idle;
                EngineEvent::BestMove {
                    mv: mv.to_string(),
                    ponder,
                }
            }
            Some("info") => {
                if self.state != SearchState::Thinking {
                    return EngineEvent::Ignorable;
                }
                match parse_info(line) {
                    Some(eval) => EngineEvent::Info(eval),
                    None => EngineEvent::Ignorable,
                }
            }
            Some("readyok") => EngineEvent::Ready,
            _ => EngineEvent::Ignorable,
        }
    }
}

fn position_command<'a>(start_fen: Option<&str>, moves: impl Iterator<Item = &'a str>) -> String {
    let mut cmd = match start_fen {
        Some(fen) => format!("position fen {fen}"),
        None => "position startpos".to_string(),
    };
    let mut first = true;
    for mv in moves {
        if first {
            cmd.push_str(" moves");
            first = false;
        }
        cmd.push(' ');
        cmd.push_str(mv);
    }
    cmd
}

fn go_command(clock: &ClockSnapshot, ponder: bool) -> String {
    let mut cmd = String::from("go");
    if ponder {
        cmd.push_str(" ponder");
    }
    match clock.budget {
        TimeBudget::Conventional { .. } => {
            cmd.push_str(&format!(
                " wtime {} btime {}",
                millis(clock.white.remaining),
                millis(clock.black.remaining)
            ));
            if !clock.white.increment.is_zero() {
                cmd.push_str(&format!(" winc {}", millis(clock.white.increment)));
            }
            if !clock.black.increment.is_zero() {
                cmd.push_str(&format!(" binc {}", millis(clock.black.increment)));
            }
            if let Some(mtg) = clock.own().moves_to_go {
                cmd.push_str(&format!(" movestogo {mtg}"));
            }
        }
        TimeBudget::FixedPerMove(t) => cmd.push_str(&format!(" movetime {}", millis(t))),
        TimeBudget::Infinite => {
            if clock.ply_limit.is_none() && clock.node_limit.is_none() {
                cmd.push_str(" infinite");
            }
        }
    }
    if let Some(depth) = clock.ply_limit {
        cmd.push_str(&format!(" depth {depth}"));
    }
    if let Some(nodes) = clock.node_limit {
        cmd.push_str(&format!(" nodes {nodes}"));
    }
    cmd
}

/// `info` 行から探索情報を取り出す。`info string` や情報のない行は None。
///
/// bound 付きの評価値と multipv 2 以降の行は評価値を上書きしない。
pub fn parse_info(line: &str) -> Option<EvalLog> {
    let mut eval = EvalLog::default();
    let mut tokens = line.split_whitespace().skip(1).peekable();
    let mut bound = false;
    let mut secondary_pv = false;
    while let Some(tok) = tokens.next() {
        match tok {
            "string" => break,
            "depth" => eval.depth = tokens.next().and_then(|v| v.parse().ok()),
            "seldepth" => eval.seldepth = tokens.next().and_then(|v| v.parse().ok()),
            "nodes" => eval.nodes = tokens.next().and_then(|v| v.parse().ok()),
            "time" => eval.time_ms = tokens.next().and_then(|v| v.parse().ok()),
            "nps" => eval.nps = tokens.next().and_then(|v| v.parse().ok()),
            "multipv" => {
                secondary_pv = tokens.next().and_then(|v| v.parse::<u32>().ok()).unwrap_or(1) != 1;
            }
            "score" => {
                let kind = tokens.next();
                let value = tokens.next().and_then(|v| v.parse::<i32>().ok());
                match kind {
                    Some("cp") => eval.score_cp = value,
                    Some("mate") => eval.score_mate = value,
                    _ => {}
                }
                while let Some(&next) = tokens.peek() {
                    if next == "lowerbound" || next == "upperbound" {
                        bound = true;
                        tokens.next();
                    } else {
                        break;
                    }
                }
            }
            "pv" => {
                let pv: Vec<String> = tokens.by_ref().map(str::to_string).collect();
                if !pv.is_empty() {
                    eval.pv = Some(pv);
                }
                break;
            }
            _ => {}
        }
    }
    if bound || secondary_pv {
        eval.score_cp = None;
        eval.score_mate = None;
    }
    if secondary_pv {
        eval.pv = None;
    }
    if eval.is_empty() { None } else { Some(eval) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SideTime;
    use crate::options::OptionKind;
    use crate::time_control::TimeControl;
    use crate::types::Side;

    fn handshaken() -> UciAdapter {
        let mut a = UciAdapter::new("test");
        for line in [
            "id name Test Engine 1.0",
            "id author Someone",
            "option name Hash type spin default 16 min 1 max 1024",
            "option name Ponder type check default false",
            "option name UCI_Chess960 type check default false",
            "option name Clear Hash type button",
        ] {
            assert_eq!(a.handshake_line(line), Handshake::Pending);
        }
        assert_eq!(a.handshake_line("uciok"), Handshake::Complete(Vec::new()));
        a
    }

    fn snapshot(budget: TimeBudget) -> ClockSnapshot {
        let side = SideTime {
            remaining: Duration::from_millis(60_000),
            increment: Duration::from_millis(500),
            moves_to_go: Some(20),
        };
        ClockSnapshot {
            to_move: Side::White,
            white: side,
            black: SideTime {
                remaining: Duration::from_millis(55_000),
                ..side
            },
            budget,
            ply_limit: None,
            node_limit: None,
        }
    }

    #[test]
    fn handshake_collects_identity_and_options() {
        let a = handshaken();
        let caps = a.capabilities();
        assert_eq!(caps.name.as_deref(), Some("Test Engine 1.0"));
        assert_eq!(caps.options.len(), 4);
        assert!(caps.supports_variant("fischerandom"));
        assert_eq!(a.option_commands("Clear Hash", ""), vec!["setoption name Clear Hash"]);
        assert_eq!(
            a.option_commands("Hash", "128"),
            vec!["setoption name Hash value 128"]
        );
    }

    #[test]
    fn request_move_resends_full_position() {
        let mut a = handshaken();
        let tc = TimeControl::parse("20/60+0.5").unwrap();
        let setup = GameSetup {
            variant: "standard",
            start_fen: None,
            own_side: Side::White,
            time_control: &tc,
            opponent_name: "other",
            ponder: false,
        };
        let cmds = a.new_game_commands(&setup).unwrap();
        assert_eq!(cmds, vec!["setoption name Ponder value false", "ucinewgame"]);

        let moves = vec!["e2e4".to_string(), "e7e5".to_string()];
        a.set_position(PositionView {
            start_fen: None,
            moves: &moves,
        });
        let budget = tc.budget;
        let cmds = a.request_move(&snapshot(budget));
        assert_eq!(cmds[0], "position startpos moves e2e4 e7e5");
        assert_eq!(
            cmds[1],
            "go wtime 60000 btime 55000 winc 500 binc 500 movestogo 20"
        );
        assert!(a.is_thinking());

        let cmds = a.request_move(&snapshot(TimeBudget::FixedPerMove(Duration::from_secs(2))));
        assert_eq!(cmds[1], "go movetime 2000");

        let mut snap = snapshot(TimeBudget::Infinite);
        snap.ply_limit = Some(8);
        assert_eq!(a.request_move(&snap)[1], "go depth 8");
    }

    #[test]
    fn unsupported_variant_is_rejected() {
        let mut a = handshaken();
        let tc = TimeControl::infinite();
        let setup = GameSetup {
            variant: "atomic",
            start_fen: None,
            own_side: Side::Black,
            time_control: &tc,
            opponent_name: "x",
            ponder: false,
        };
        assert!(matches!(
            a.new_game_commands(&setup),
            Err(ProtocolError::Unsupported { .. })
        ));
    }

    #[test]
    fn bestmove_outside_search_is_a_violation() {
        let mut a = handshaken();
        assert!(matches!(a.parse_line("bestmove e2e4"), EngineEvent::Violation(_)));
        a.request_move(&snapshot(TimeBudget::Infinite));
        assert!(matches!(a.parse_line("bestmove"), EngineEvent::Violation(_)));
        assert_eq!(
            a.parse_line("bestmove e2e4 ponder e7e5"),
            EngineEvent::BestMove {
                mv: "e2e4".into(),
                ponder: Some("e7e5".into())
            }
        );
        assert!(!a.is_thinking());
    }

    #[test]
    fn unknown_lines_are_ignorable() {
        let mut a = handshaken();
        a.request_move(&snapshot(TimeBudget::Infinite));
        assert_eq!(a.parse_line("info string hello world"), EngineEvent::Ignorable);
        assert_eq!(a.parse_line("something odd"), EngineEvent::Ignorable);
        assert_eq!(a.parse_line(""), EngineEvent::Ignorable);
        assert_eq!(a.parse_line("readyok"), EngineEvent::Ready);
    }

    #[test]
    fn info_parsing_ignores_bounds_and_secondary_lines() {
        let eval = parse_info("info depth 12 seldepth 18 score cp 34 nodes 12345 nps 100000 time 120 pv e2e4 e7e5").unwrap();
        assert_eq!(eval.depth, Some(12));
        assert_eq!(eval.score_cp, Some(34));
        assert_eq!(eval.pv.as_ref().map(Vec::len), Some(2));

        let eval = parse_info("info depth 13 score cp 50 lowerbound nodes 20000").unwrap();
        assert_eq!(eval.score_cp, None);
        assert_eq!(eval.nodes, Some(20000));

        let eval = parse_info("info depth 13 multipv 2 score cp -20 pv d2d4").unwrap();
        assert_eq!(eval.score_cp, None);
        assert_eq!(eval.pv, None);

        let eval = parse_info("info depth 20 score mate -3").unwrap();
        assert_eq!(eval.score(), Some(-29994));
        assert!(parse_info("info string only text").is_none());
    }

    #[test]
    fn ponder_hit_and_miss() {
        let mut a = handshaken();
        let moves = vec!["e2e4".to_string()];
        a.set_position(PositionView {
            start_fen: None,
            moves: &moves,
        });
        let snap = snapshot(TimeBudget::Infinite);
        let cmds = a.start_ponder("e7e5", &snap);
        assert_eq!(cmds[0], "position startpos moves e2e4 e7e5");
        assert_eq!(cmds[1], "go ponder infinite");
        assert!(a.is_pondering());
        assert_eq!(a.parse_line("info depth 3 score cp 1"), EngineEvent::Ignorable);
        assert_eq!(a.resolve_ponder("e7e5"), (vec!["ponderhit".to_string()], true));
        assert!(a.is_thinking());

        a.parse_line("bestmove g1f3");
        a.start_ponder("b8c6", &snap);
        assert_eq!(a.resolve_ponder("g8f6"), (vec!["stop".to_string()], false));
        // 停止した先読みの bestmove は捨てる
        assert_eq!(a.parse_line("bestmove f1b5"), EngineEvent::Ignorable);
        a.request_move(&snap);
        assert!(matches!(a.parse_line("bestmove f1c4"), EngineEvent::BestMove { .. }));
    }

    #[test]
    fn bestmove_after_game_end_is_discarded() {
        let mut a = handshaken();
        a.request_move(&snapshot(TimeBudget::Infinite));
        assert_eq!(a.game_end_commands(Outcome::Draw, "draw"), vec!["stop".to_string()]);
        assert!(!a.is_thinking());
        // 次の対局の同期中に届いた遅い bestmove は違反にしない
        assert_eq!(a.parse_line("bestmove e2e4"), EngineEvent::Ignorable);
        assert!(matches!(a.parse_line("bestmove e2e4"), EngineEvent::Violation(_)));
        assert!(a.game_end_commands(Outcome::Draw, "draw").is_empty());
    }

    #[test]
    fn option_kinds_are_kept() {
        let a = handshaken();
        let ponder = find_option(&a.capabilities().options, "ponder").unwrap();
        assert_eq!(ponder.kind, OptionKind::Check { default: false });
    }
}

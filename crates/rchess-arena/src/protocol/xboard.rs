use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::clock::ClockSnapshot;
use crate::error::ProtocolError;
use crate::options::{EngineOption, OptionKind, find_option};
use crate::protocol::{
    Capabilities, Claim, EngineEvent, GameSetup, Handshake, PositionView, is_standard_variant,
};
use crate::time_control::{TimeBudget, TimeControl};
use crate::types::{EvalLog, Outcome, Side};

/// protover 2 に応答しないエンジンを protover 1 とみなすまでの時間
pub const XBOARD_INIT_TIMEOUT: Duration = Duration::from_secs(8);
/// `done=0` を受けたときの延長
pub const XBOARD_DONE0_TIMEOUT: Duration = Duration::from_secs(3600);

static FEATURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)\s*=\s*("[^"]*"|\d+)"#).expect("valid feature regex"));

/// 受理する feature 名
const ACCEPTED_FEATURES: [&str; 25] = [
    "ping", "setboard", "playother", "usermove", "time", "draw", "sigint", "sigterm", "reuse",
    "analyze", "myname", "variants", "colors", "ics", "name", "pause", "nps", "debug", "memory",
    "smp", "egt", "option", "done", "exclude", "setscore",
];

/// xboard / CECP: 手は差分で送り、時間は `level` と毎手の `time` / `otim`（センチ秒）で伝える。
pub struct XboardAdapter {
    engine: String,
    caps: Capabilities,
    white_pov: bool,
    own_side: Side,
    thinking: bool,
    /// エンジンが force モードにいるか
    forced: bool,
    /// エンジンが把握している手数
    known_moves: usize,
    moves: Vec<String>,
    ping_counter: u32,
    pending_ping: Option<u32>,
    /// 探索中に終局した。次の `go` までに届く `move` は前局の残りとして捨てる。
    late_move: bool,
}

impl XboardAdapter {
    pub fn new(engine: &str, white_pov: bool) -> Self {
        Self {
            engine: engine.to_string(),
            caps: Capabilities {
                reuse: true,
                draw_offers: true,
                ..Default::default()
            },
            white_pov,
            own_side: Side::White,
            thinking: false,
            forced: false,
            known_moves: 0,
            moves: Vec::new(),
            ping_counter: 0,
            pending_ping: None,
            late_move: false,
        }
    }

    pub fn start_commands(&mut self) -> (Vec<String>, Duration) {
        (
            vec!["xboard".to_string(), "protover 2".to_string()],
            XBOARD_INIT_TIMEOUT,
        )
    }

    pub fn handshake_line(&mut self, line: &str) -> Handshake {
        let Some(rest) = line.trim().strip_prefix("feature") else {
            return Handshake::Pending;
        };
        let mut replies = Vec::new();
        let mut done = None;
        for cap in FEATURE_RE.captures_iter(rest) {
            let name = &cap[1];
            let raw = &cap[2];
            let value = raw.trim_matches('"');
            if name == "done" {
                done = Some(value == "1");
                replies.push(format!("accepted {name}"));
                continue;
            }
            if self.apply_feature(name, value) {
                replies.push(format!("accepted {name}"));
            } else {
                replies.push(format!("rejected {name}"));
            }
        }
        match done {
            Some(true) => Handshake::Complete(replies),
            Some(false) => Handshake::Extend(replies, XBOARD_DONE0_TIMEOUT),
            None if replies.is_empty() => Handshake::Pending,
            None => Handshake::Reply(replies),
        }
    }

    /// feature を反映する。受理したら true。
    fn apply_feature(&mut self, name: &str, value: &str) -> bool {
        if !ACCEPTED_FEATURES.contains(&name) {
            // san=1 は受け付けず座標表記を使わせる
            if name != "san" {
                self.caps.unknown.push(format!("{name}={value}"));
            }
            return false;
        }
        let on = value == "1";
        match name {
            "ping" => self.caps.ping = on,
            "setboard" => self.caps.setboard = on,
            "usermove" => self.caps.usermove = on,
            "draw" => self.caps.draw_offers = on,
            "reuse" => self.caps.reuse = on,
            "nps" => self.caps.nps = on,
            "myname" => self.caps.name = Some(value.to_string()),
            "variants" => {
                self.caps.variants = value
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
            }
            "option" => match EngineOption::parse_xboard(value) {
                Some(opt) => self.caps.options.push(opt),
                None => {
                    log::debug!("{}: unparsable option feature `{value}`", self.engine);
                    self.caps.unknown.push(format!("option={value}"));
                }
            },
            "memory" if on => self.caps.options.push(EngineOption::new(
                "memory",
                OptionKind::Spin {
                    default: 32,
                    min: 1,
                    max: i64::from(u32::MAX),
                },
            )),
            "smp" if on => self.caps.options.push(EngineOption::new(
                "cores",
                OptionKind::Spin {
                    default: 1,
                    min: 1,
                    max: 256,
                },
            )),
            "egt" => {
                for kind in value.split(',').map(str::trim).filter(|k| !k.is_empty()) {
                    self.caps.options.push(EngineOption::new(
                        format!("egtpath {kind}"),
                        OptionKind::File {
                            default: String::new(),
                        },
                    ));
                }
            }
            _ => {}
        }
        true
    }

    pub fn handshake_timeout(&mut self, waited: Duration) -> Result<Vec<String>, ProtocolError> {
        log::warn!(
            "{}: no `feature done=1` within {:?}, assuming protocol version 1",
            self.engine,
            waited
        );
        Ok(Vec::new())
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn option_commands(&self, name: &str, value: &str) -> Vec<String> {
        if name == "memory" || name == "cores" {
            return vec![format!("{name} {value}")];
        }
        if name.starts_with("egtpath ") {
            return vec![format!("{name} {value}")];
        }
        let line = match find_option(&self.caps.options, name).map(|o| &o.kind) {
            Some(OptionKind::Button) => format!("option {name}"),
            Some(OptionKind::Check { .. }) => {
                let on = matches!(value, "true" | "1" | "on");
                format!("option {name}={}", u8::from(on))
            }
            _ => format!("option {name}={value}"),
        };
        vec![line]
    }

    pub fn sync_command(&mut self) -> Option<String> {
        if !self.caps.ping {
            return None;
        }
        self.ping_counter += 1;
        self.pending_ping = Some(self.ping_counter);
        Some(format!("ping {}", self.ping_counter))
    }

    pub fn new_game_commands(&mut self, setup: &GameSetup<'_>) -> Result<Vec<String>, ProtocolError> {
        self.own_side = setup.own_side;
        self.thinking = false;
        self.known_moves = 0;
        self.moves.clear();

        let mut cmds = vec!["new".to_string()];
        if !is_standard_variant(setup.variant) {
            if !self.caps.supports_variant(setup.variant) {
                return Err(self.unsupported(format!("variant {}", setup.variant)));
            }
            cmds.push(format!("variant {}", setup.variant));
        }
        cmds.push("force".to_string());
        self.forced = true;
        if let Some(fen) = setup.start_fen {
            if !self.caps.setboard {
                return Err(self.unsupported("setboard".to_string()));
            }
            cmds.push(format!("setboard {fen}"));
        }
        cmds.extend(self.time_control_commands(setup.time_control));
        cmds.push("computer".to_string());
        cmds.push("post".to_string());
        cmds.push(if setup.ponder { "hard" } else { "easy" }.to_string());
        Ok(cmds)
    }

    fn time_control_commands(&self, tc: &TimeControl) -> Vec<String> {
        let mut cmds = Vec::new();
        match (tc.node_limit, self.caps.nps) {
            (Some(nodes), true) => {
                cmds.push(format!("nps {nodes}"));
                cmds.push("st 1".to_string());
            }
            (limit, _) => {
                if limit.is_some() {
                    log::warn!("{}: node limits need the nps feature, ignoring", self.engine);
                }
                match tc.budget {
                    TimeBudget::Conventional {
                        moves,
                        base,
                        increment,
                    } => {
                        let secs = base.as_secs();
                        let base_str = if secs % 60 == 0 {
                            format!("{}", secs / 60)
                        } else {
                            format!("{}:{:02}", secs / 60, secs % 60)
                        };
                        cmds.push(format!(
                            "level {} {base_str} {}",
                            moves.unwrap_or(0),
                            seconds_str(increment)
                        ));
                    }
                    TimeBudget::FixedPerMove(t) => cmds.push(format!("st {}", seconds_str(t))),
                    TimeBudget::Infinite => cmds.push("st 86400".to_string()),
                }
            }
        }
        if let Some(depth) = tc.ply_limit {
            cmds.push(format!("sd {depth}"));
        }
        cmds
    }

    fn unsupported(&self, request: String) -> ProtocolError {
        ProtocolError::Unsupported {
            engine: self.engine.clone(),
            request,
        }
    }

    pub fn set_position(&mut self, position: PositionView<'_>) {
        if position.moves.len() < self.known_moves {
            log::warn!(
                "{}: position went backwards ({} < {} known moves)",
                self.engine,
                position.moves.len(),
                self.known_moves
            );
            self.known_moves = 0;
        }
        self.moves = position.moves.to_vec();
    }

    pub fn request_move(&mut self, clock: &ClockSnapshot) -> Vec<String> {
        let mut cmds = Vec::new();
        if !self.forced {
            cmds.push("force".to_string());
            self.forced = true;
        }
        for mv in &self.moves[self.known_moves..] {
            if self.caps.usermove {
                cmds.push(format!("usermove {mv}"));
            } else {
                cmds.push(mv.clone());
            }
        }
        self.known_moves = self.moves.len();
        if let TimeBudget::Conventional { .. } = clock.budget {
            cmds.push(format!("time {}", centis(clock.own().remaining)));
            cmds.push(format!("otim {}", centis(clock.opponent().remaining)));
        }
        cmds.push("go".to_string());
        self.forced = false;
        self.thinking = true;
        self.late_move = false;
        cmds
    }

    pub fn start_ponder(&mut self, _ponder_move: &str, _clock: &ClockSnapshot) -> Vec<String> {
        Vec::new()
    }

    pub fn resolve_ponder(&mut self, _actual: &str) -> (Vec<String>, bool) {
        (Vec::new(), false)
    }

    pub fn is_pondering(&self) -> bool {
        false
    }

    #[cfg(test)]
    fn is_thinking(&self) -> bool {
        self.thinking
    }

    pub fn stop_commands(&mut self) -> Vec<String> {
        if self.thinking {
            vec!["?".to_string()]
        } else {
            Vec::new()
        }
    }

    pub fn draw_offer_commands(&self) -> Vec<String> {
        if self.caps.draw_offers {
            vec!["draw".to_string()]
        } else {
            Vec::new()
        }
    }

    pub fn game_end_commands(&mut self, outcome: Outcome, comment: &str) -> Vec<String> {
        self.late_move |= self.thinking;
        self.thinking = false;
        self.forced = true;
        vec![
            format!("result {} {{{comment}}}", outcome.pgn_token()),
            "force".to_string(),
        ]
    }

    pub fn parse_line(&mut self, line: &str) -> EngineEvent {
        let line = line.trim();
        if line.is_empty() {
            return EngineEvent::Ignorable;
        }
        let (command, args) = match line.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };
        match command {
            "move" => {
                if !self.thinking {
                    if self.late_move {
                        self.late_move = false;
                        log::debug!("{}: discarding `{line}` from the previous game", self.engine);
                        return EngineEvent::Ignorable;
                    }
                    return EngineEvent::Violation(format!("unexpected `{line}` while not thinking"));
                }
                let Some(mv) = args.split_whitespace().next() else {
                    return EngineEvent::Violation(format!("`{line}` carries no move"));
                };
                self.thinking = false;
                self.known_moves += 1;
                EngineEvent::BestMove {
                    mv: mv.to_string(),
                    ponder: None,
                }
            }
            "pong" => {
                let n = args.parse::<u32>().ok();
                if n.is_some() && n == self.pending_ping {
                    self.pending_ping = None;
                    EngineEvent::Ready
                } else {
                    EngineEvent::Ignorable
                }
            }
            "resign" => EngineEvent::Claim(Claim::Resign),
            "offer" if args == "draw" => EngineEvent::DrawOffer,
            "1-0" | "0-1" | "1/2-1/2" | "*" => {
                let outcome = match command {
                    "1-0" => Outcome::WhiteWins,
                    "0-1" => Outcome::BlackWins,
                    "1/2-1/2" => Outcome::Draw,
                    _ => Outcome::Unresolved,
                };
                let comment = args.trim_start_matches('{').trim_end_matches('}').trim();
                EngineEvent::Claim(Claim::Result {
                    outcome,
                    comment: comment.to_string(),
                })
            }
            "Illegal" if line.starts_with("Illegal move") => {
                let mv = line
                    .rsplit_once(':')
                    .map(|(_, m)| m.trim().to_string())
                    .filter(|m| !m.is_empty());
                EngineEvent::IllegalMoveReport {
                    mv,
                    reason: line.to_string(),
                }
            }
            "Error" | "Error:" => {
                log::warn!("{}: {line}", self.engine);
                EngineEvent::Ignorable
            }
            _ => {
                if self.thinking && command.starts_with(|c: char| c.is_ascii_digit()) {
                    if let Some(eval) = self.parse_thinking(line) {
                        return EngineEvent::Info(eval);
                    }
                }
                EngineEvent::Ignorable
            }
        }
    }

    /// `ply score time nodes pv...` 形式の思考出力
    fn parse_thinking(&self, line: &str) -> Option<EvalLog> {
        let mut tokens = line.split_whitespace();
        let ply = tokens
            .next()?
            .trim_end_matches(|c: char| !c.is_ascii_digit())
            .parse::<u32>()
            .ok()?;
        let mut score = tokens.next()?.parse::<i32>().ok()?;
        let centis = tokens.next()?.parse::<u64>().ok()?;
        let nodes = tokens.next()?.parse::<u64>().ok()?;
        if self.white_pov && self.own_side == Side::Black {
            score = -score;
        }
        let pv: Vec<String> = tokens.map(str::to_string).collect();
        let time_ms = centis * 10;
        Some(EvalLog {
            score_cp: Some(score),
            depth: Some(ply),
            nodes: Some(nodes),
            time_ms: Some(time_ms),
            nps: (time_ms > 0).then(|| nodes * 1000 / time_ms),
            pv: (!pv.is_empty()).then_some(pv),
            ..Default::default()
        })
    }
}

fn centis(d: Duration) -> u64 {
    (d.as_millis() / 10).min(u128::from(u32::MAX)) as u64
}

fn seconds_str(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        d.as_secs().to_string()
    } else {
        let s = format!("{:.3}", d.as_secs_f64());
        s.trim_end_matches('0').to_string()
    }
}

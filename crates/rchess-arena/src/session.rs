use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;

use crate::clock::ClockSnapshot;
use crate::config::{EngineConfiguration, RestartMode};
use crate::error::ProtocolError;
use crate::options::find_option;
use crate::process::{DEFAULT_GRACE, EngineProcess, ProcessEvent, ProcessSpec, WireTap};
use crate::protocol::{
    Capabilities, EngineEvent, GameSetup, Handshake, PositionView, ProtocolAdapter,
};
use crate::types::Outcome;

pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// 対局者。コーディネータはこのトレイト越しにエンジンを操作する。
pub trait Player: Send {
    fn name(&self) -> &str;

    fn new_game(&mut self, setup: &GameSetup<'_>) -> Result<(), ProtocolError>;

    /// 手番を渡す。先読みが当たっていれば `ponderhit` だけ送る。
    fn request_move(&mut self, position: PositionView<'_>, clock: &ClockSnapshot);

    /// 自分の手が受理された直後に呼ばれる（先読みの開始）
    fn after_own_move(&mut self, position: PositionView<'_>, ponder: Option<&str>, clock: &ClockSnapshot);

    /// `timeout` まで待って次のイベントを返す。時間切れなら None。
    fn wait_event(&mut self, timeout: Duration) -> Option<EngineEvent>;

    /// 待たずに取れるイベントだけ返す
    fn try_event(&mut self) -> Option<EngineEvent>;

    /// 相手からの引き分け提案を伝える
    fn draw_offered(&mut self);

    fn end_game(&mut self, outcome: Outcome, comment: &str);

    fn is_alive(&self) -> bool;
}

/// 起動中のエンジン 1 本（プロセス + アダプタ）
pub struct EngineSession {
    config: Arc<EngineConfiguration>,
    process: EngineProcess,
    adapter: ProtocolAdapter,
    ponder: bool,
    crashed: bool,
    games_played: u32,
}

impl EngineSession {
    /// プロセスを起動してハンドシェイク・オプション設定まで済ませる。
    pub fn start(
        config: Arc<EngineConfiguration>,
        tap: Option<Arc<dyn WireTap>>,
    ) -> Result<Self, ProtocolError> {
        let spec = ProcessSpec {
            label: config.name.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            workdir: config.workdir.clone(),
        };
        let process = EngineProcess::start(&spec, tap)?;
        let adapter = ProtocolAdapter::new(config.protocol, &config.name, config.white_pov);
        let mut session = Self {
            ponder: config.ponder,
            config,
            process,
            adapter,
            crashed: false,
            games_played: 0,
        };
        session.handshake()?;
        session.configure()?;
        Ok(session)
    }

    fn send_all(&self, lines: &[String]) {
        for line in lines {
            self.process.send(line);
        }
    }

    fn exited_error(&self, code: Option<i32>) -> ProtocolError {
        ProtocolError::Exited {
            engine: self.config.name.clone(),
            code,
        }
    }

    fn handshake(&mut self) -> Result<(), ProtocolError> {
        let (cmds, timeout) = self.adapter.start_commands();
        self.send_all(&cmds);
        let started = Instant::now();
        let mut deadline = started + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.process.recv_timeout(remaining) {
                Ok(ProcessEvent::Line(line)) => match self.adapter.handshake_line(&line) {
                    Handshake::Pending => {}
                    Handshake::Reply(lines) => self.send_all(&lines),
                    Handshake::Extend(lines, extra) => {
                        self.send_all(&lines);
                        deadline = Instant::now() + extra;
                    }
                    Handshake::Complete(lines) => {
                        self.send_all(&lines);
                        break;
                    }
                },
                Ok(ProcessEvent::Exited(code)) => {
                    self.crashed = true;
                    return Err(self.exited_error(code));
                }
                Err(RecvTimeoutError::Timeout) => {
                    let lines = self.adapter.handshake_timeout(started.elapsed())?;
                    self.send_all(&lines);
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => return Err(self.exited_error(None)),
            }
        }
        let caps = self.adapter.capabilities();
        log::info!(
            "{}: ready ({}, {} options)",
            self.config.name,
            caps.name.as_deref().unwrap_or("unnamed engine"),
            caps.options.len()
        );
        if !caps.unknown.is_empty() {
            log::debug!("{}: unrecognised declarations {:?}", self.config.name, caps.unknown);
        }
        Ok(())
    }

    /// 初期化文字列と設定値を送り、同期を取る。
    fn configure(&mut self) -> Result<(), ProtocolError> {
        for line in &self.config.init_strings {
            self.process.send(line);
        }
        let schema = &self.adapter.capabilities().options;
        self.config.check_options(schema);
        for (name, value) in self.config.option_values() {
            // エンジンが報告した正式な綴りを使う
            let name = find_option(schema, &name).map_or(name.clone(), |o| o.name.clone());
            let cmds = self.adapter.option_commands(&name, &value);
            self.send_all(&cmds);
        }
        self.sync()
    }

    /// `isready` / `ping` を送り応答を待つ。
    pub fn sync(&mut self) -> Result<(), ProtocolError> {
        let Some(cmd) = self.adapter.sync_command() else {
            return Ok(());
        };
        self.process.send(&cmd);
        let deadline = Instant::now() + ENGINE_READY_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.process.recv_timeout(remaining) {
                Ok(ProcessEvent::Line(line)) => {
                    if self.adapter.parse_line(&line) == EngineEvent::Ready {
                        return Ok(());
                    }
                }
                Ok(ProcessEvent::Exited(code)) => {
                    self.crashed = true;
                    return Err(self.exited_error(code));
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ProtocolError::HandshakeTimeout {
                        engine: self.config.name.clone(),
                        waiting_for: cmd,
                        timeout: ENGINE_READY_TIMEOUT,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => return Err(self.exited_error(None)),
            }
        }
    }

    pub fn config(&self) -> &Arc<EngineConfiguration> {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.adapter.capabilities()
    }

    pub fn games_played(&self) -> u32 {
        self.games_played
    }

    /// 次の対局の前にプロセスを作り直すべきか
    pub fn needs_restart(&self) -> bool {
        if self.crashed || self.process.has_exited() {
            return true;
        }
        match self.config.restart {
            RestartMode::On => true,
            RestartMode::Off => false,
            RestartMode::Auto => !self.adapter.capabilities().reuse,
        }
    }

    /// `quit` を送って終了させる（猶予後に強制終了）
    pub fn quit(mut self, grace: Duration) {
        let cmds = self.adapter.stop_commands();
        self.send_all(&cmds);
        let cmds = self.adapter.quit_commands();
        self.send_all(&cmds);
        self.process.terminate(grace);
    }

    fn translate(&mut self, event: ProcessEvent) -> EngineEvent {
        match event {
            ProcessEvent::Line(line) => self.adapter.parse_line(&line),
            ProcessEvent::Exited(code) => {
                self.crashed = true;
                EngineEvent::Crash(code)
            }
        }
    }
}

impl Player for EngineSession {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn new_game(&mut self, setup: &GameSetup<'_>) -> Result<(), ProtocolError> {
        if !self.config.supports_variant(setup.variant)
            || !self.adapter.capabilities().supports_variant(setup.variant)
        {
            return Err(ProtocolError::Unsupported {
                engine: self.config.name.clone(),
                request: format!("variant {}", setup.variant),
            });
        }
        self.ponder = self.config.ponder && setup.ponder;
        let setup = GameSetup {
            ponder: self.ponder,
            ..setup.clone()
        };
        let cmds = self.adapter.new_game_commands(&setup)?;
        self.send_all(&cmds);
        self.sync()?;
        self.games_played += 1;
        Ok(())
    }

    fn request_move(&mut self, position: PositionView<'_>, clock: &ClockSnapshot) {
        if self.adapter.is_pondering() {
            let last = position.moves.last().map(String::as_str).unwrap_or_default();
            let (cmds, hit) = self.adapter.resolve_ponder(last);
            self.send_all(&cmds);
            if hit {
                log::debug!("{}: ponderhit on {last}", self.config.name);
                return;
            }
        }
        self.adapter.set_position(position);
        let cmds = self.adapter.request_move(clock);
        self.send_all(&cmds);
    }

    fn after_own_move(&mut self, position: PositionView<'_>, ponder: Option<&str>, clock: &ClockSnapshot) {
        let Some(ponder_move) = ponder.filter(|_| self.ponder) else {
            return;
        };
        self.adapter.set_position(position);
        let cmds = self.adapter.start_ponder(ponder_move, clock);
        self.send_all(&cmds);
    }

    fn wait_event(&mut self, timeout: Duration) -> Option<EngineEvent> {
        match self.process.recv_timeout(timeout) {
            Ok(event) => Some(self.translate(event)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.crashed = true;
                Some(EngineEvent::Crash(None))
            }
        }
    }

    fn try_event(&mut self) -> Option<EngineEvent> {
        let event = self.process.try_recv()?;
        Some(self.translate(event))
    }

    fn draw_offered(&mut self) {
        let cmds = self.adapter.draw_offer_commands();
        self.send_all(&cmds);
    }

    fn end_game(&mut self, outcome: Outcome, comment: &str) {
        let cmds = self.adapter.game_end_commands(outcome, comment);
        self.send_all(&cmds);
    }

    fn is_alive(&self) -> bool {
        !self.crashed && !self.process.has_exited()
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        if !self.process.has_exited() {
            for line in self.adapter.quit_commands() {
                self.process.send(&line);
            }
        }
        self.process.terminate(DEFAULT_GRACE);
    }
}

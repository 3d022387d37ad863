use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as chan;

use crate::error::SpawnError;

pub const WIRE_TARGET: &str = "rchess_arena::wire";
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_GRACE: Duration = Duration::from_millis(1000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireDirection {
    ToEngine,
    FromEngine,
}

/// 送受信した全行を受け取る外部コレクタ
pub trait WireTap: Send + Sync {
    fn on_line(&self, engine: &str, direction: WireDirection, line: &str);
}

impl<F> WireTap for F
where
    F: Fn(&str, WireDirection, &str) + Send + Sync,
{
    fn on_line(&self, engine: &str, direction: WireDirection, line: &str) {
        self(engine, direction, line)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    Line(String),
    /// プロセス終了。シグナルで終了した場合は `None`。1プロセスにつき必ず1回だけ届く。
    Exited(Option<i32>),
}

#[derive(Clone, Debug)]
pub struct ProcessSpec {
    pub label: String,
    pub command: PathBuf,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
}

/// 終了通知を一度だけ送るための共有状態
struct ExitNotifier {
    sent: AtomicBool,
    tx: chan::Sender<ProcessEvent>,
    label: String,
}

impl ExitNotifier {
    fn notify(&self, code: Option<i32>) {
        if !self.sent.swap(true, Ordering::AcqRel) {
            log::debug!("{}: process exited with {:?}", self.label, code);
            let _ = self.tx.send(ProcessEvent::Exited(code));
        }
    }

    fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }
}

/// 1本のエンジンプロセスとその標準入出力を所有する。
///
/// 送信は書き込みスレッドへのキュー経由なので呼び出し側をブロックしない。
/// 受信行と終了通知は 1 本のイベントチャネルに流れる。
pub struct EngineProcess {
    label: String,
    child: Arc<Mutex<Child>>,
    outbound: Option<chan::Sender<String>>,
    events: chan::Receiver<ProcessEvent>,
    exit: Arc<ExitNotifier>,
    tap: Option<Arc<dyn WireTap>>,
    terminated: bool,
}

impl EngineProcess {
    pub fn start(spec: &ProcessSpec, tap: Option<Arc<dyn WireTap>>) -> Result<Self, SpawnError> {
        let command_str = spec.command.display().to_string();
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                SpawnError::NotFound(spec.command.clone())
            } else {
                SpawnError::Io {
                    command: command_str.clone(),
                    source,
                }
            }
        })?;
        let stdin = child.stdin.take().ok_or_else(|| SpawnError::MissingPipe {
            command: command_str.clone(),
            pipe: "stdin",
        })?;
        let stdout = child.stdout.take().ok_or_else(|| SpawnError::MissingPipe {
            command: command_str.clone(),
            pipe: "stdout",
        })?;
        log::debug!("{}: started {} (pid {})", spec.label, command_str, child.id());

        let child = Arc::new(Mutex::new(child));
        let (event_tx, event_rx) = chan::unbounded::<ProcessEvent>();
        let (out_tx, out_rx) = chan::unbounded::<String>();
        let exit = Arc::new(ExitNotifier {
            sent: AtomicBool::new(false),
            tx: event_tx.clone(),
            label: spec.label.clone(),
        });

        // 書き込みスレッド
        {
            let label = spec.label.clone();
            thread::spawn(move || {
                let mut writer = BufWriter::new(stdin);
                for line in out_rx {
                    let res = writer
                        .write_all(line.as_bytes())
                        .and_then(|_| writer.write_all(b"\n"))
                        .and_then(|_| writer.flush());
                    if let Err(e) = res {
                        log::debug!("{label}: write failed: {e}");
                        break;
                    }
                }
            });
        }

        // 読み込みスレッド: EOF 後は終了コードが取れるまでポーリングする
        {
            let label = spec.label.clone();
            let tap = tap.clone();
            let child = Arc::clone(&child);
            let exit = Arc::clone(&exit);
            thread::spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    let line = line.trim_end_matches('\r').to_string();
                    log::trace!(target: WIRE_TARGET, "{label} < {line}");
                    if let Some(tap) = &tap {
                        tap.on_line(&label, WireDirection::FromEngine, &line);
                    }
                    if event_tx.send(ProcessEvent::Line(line)).is_err() {
                        break;
                    }
                }
                loop {
                    if exit.is_sent() {
                        return;
                    }
                    match lock_child(&child).try_wait() {
                        Ok(Some(status)) => {
                            exit.notify(status.code());
                            return;
                        }
                        Ok(None) => {}
                        Err(_) => {
                            exit.notify(None);
                            return;
                        }
                    }
                    thread::sleep(EXIT_POLL_INTERVAL);
                }
            });
        }

        Ok(Self {
            label: spec.label.clone(),
            child,
            outbound: Some(out_tx),
            events: event_rx,
            exit,
            tap,
            terminated: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 1行送る。プロセスが既に終了していれば黙って捨てる（終了はイベントで届く）。
    pub fn send(&self, line: &str) {
        log::trace!(target: WIRE_TARGET, "{} > {line}", self.label);
        if let Some(tap) = &self.tap {
            tap.on_line(&self.label, WireDirection::ToEngine, line);
        }
        if let Some(tx) = &self.outbound {
            if tx.send(line.to_string()).is_err() {
                log::debug!("{}: dropped `{line}` (writer closed)", self.label);
            }
        }
    }

    pub fn events(&self) -> &chan::Receiver<ProcessEvent> {
        &self.events
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<ProcessEvent, chan::RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<ProcessEvent> {
        self.events.try_recv().ok()
    }

    pub fn has_exited(&self) -> bool {
        if self.exit.is_sent() {
            return true;
        }
        matches!(lock_child(&self.child).try_wait(), Ok(Some(_)))
    }

    /// 標準入力を閉じて終了を待ち、`grace` を過ぎたら強制終了する。
    ///
    /// 終了を頼むコマンド（`quit` など）は呼び出し側が事前に送っておく。
    pub fn terminate(&mut self, grace: Duration) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        // 送信キューを閉じると書き込みスレッドが stdin を閉じる
        self.outbound = None;

        let deadline = Instant::now() + grace;
        loop {
            let status = lock_child(&self.child).try_wait();
            match status {
                Ok(Some(status)) => {
                    self.exit.notify(status.code());
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("{}: try_wait failed: {e}", self.label);
                    break;
                }
            }
        }
        log::warn!("{}: did not exit within {:?}, killing", self.label, grace);
        let mut child = lock_child(&self.child);
        let _ = child.kill();
        let code = child.wait().ok().and_then(|s| s.code());
        drop(child);
        self.exit.notify(code);
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.terminate(DEFAULT_GRACE);
    }
}

fn lock_child(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_executable_is_reported_as_not_found() {
        let spec = ProcessSpec {
            label: "ghost".into(),
            command: PathBuf::from("/nonexistent/definitely-not-an-engine"),
            args: Vec::new(),
            workdir: None,
        };
        let err = EngineProcess::start(&spec, None).err().unwrap();
        assert!(matches!(err, SpawnError::NotFound(_)));
    }

    #[test]
    fn closure_can_be_used_as_wire_tap() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tap: Arc<dyn WireTap> = Arc::new(move |engine: &str, dir: WireDirection, line: &str| {
            sink.lock().unwrap().push(format!("{engine} {dir:?} {line}"));
        });
        tap.on_line("e", WireDirection::ToEngine, "uci");
        assert_eq!(seen.lock().unwrap().as_slice(), ["e ToEngine uci"]);
    }
}

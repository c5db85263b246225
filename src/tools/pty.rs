//! Interactive command relay through a pseudo-terminal.
//!
//! The child runs on a fresh PTY while the local terminal is switched to raw
//! mode; keystrokes are re-encoded and forwarded to the child and its output
//! is echoed to the screen and captured as a transcript. Full-screen programs
//! that need terminal capability negotiation may render poorly.

use std::io::{IsTerminal, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use regex::Regex;
use serde_json::{json, Value};

use super::{str_arg, truncate_output, Tool, ToolContext, MAX_OUTPUT_CHARS};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long to keep draining output once the child has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Result of a relayed session.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub exit_code: i32,
    pub transcript: String,
}

/// Run `command` on a PTY, relaying the user's terminal to it until it exits.
///
/// Blocking; call from a blocking-capable thread.
pub fn run_interactive(command: &str, cwd: &Path) -> anyhow::Result<RelayOutcome> {
    let pty_system = native_pty_system();
    let pair = pty_system.openpty(terminal_size())?;

    let mut cmd = match std::env::var("SHELL").ok().filter(|s| Path::new(s).exists()) {
        Some(shell) => {
            let mut cmd = CommandBuilder::new(shell);
            cmd.args(["-i", "-c", command]);
            cmd
        }
        None => {
            let mut cmd = CommandBuilder::new("sh");
            cmd.args(["-c", command]);
            cmd
        }
    };
    cmd.cwd(cwd);

    let mut child = pair.slave.spawn_command(cmd)?;
    // Our copy of the slave must go, or the master never sees EOF.
    drop(pair.slave);

    let mut reader = pair.master.try_clone_reader()?;
    let writer = pair.master.take_writer()?;
    let master = pair.master;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });

    // Declared after `raw`: the pump is stopped and joined before raw mode
    // is lifted, on every exit path including `?`.
    let raw = RawModeGuard::enable();
    let (pump, _idle) = if raw.is_some() {
        let pump = InputPump::spawn(move |stop| relay_terminal_input(stop, writer, master));
        (Some(pump), None)
    } else {
        (None, Some((writer, master)))
    };

    let mut stdout = std::io::stdout();
    let mut transcript = Vec::new();
    let mut exited_at: Option<Instant> = None;
    let mut status = None;

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => {
                let _ = stdout.write_all(&chunk);
                let _ = stdout.flush();
                transcript.extend_from_slice(&chunk);
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if status.is_none() {
            if let Some(s) = child.try_wait()? {
                status = Some(s);
                exited_at = Some(Instant::now());
            }
        }
        // Background jobs can keep the PTY open after the child is gone.
        if exited_at.is_some_and(|t| t.elapsed() >= DRAIN_GRACE) {
            break;
        }
    }

    let status = match status {
        Some(s) => s,
        None => child.wait()?,
    };
    drop(pump);
    drop(raw);

    Ok(RelayOutcome {
        exit_code: i32::try_from(status.exit_code()).unwrap_or(-1),
        transcript: String::from_utf8_lossy(&transcript).into_owned(),
    })
}

fn terminal_size() -> PtySize {
    match terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        },
        _ => PtySize::default(),
    }
}

/// Puts the controlling terminal in raw mode; restores it on drop.
struct RawModeGuard;

impl RawModeGuard {
    /// `None` when stdin is not a terminal or raw mode is unavailable.
    fn enable() -> Option<Self> {
        if !std::io::stdin().is_terminal() {
            return None;
        }
        match terminal::enable_raw_mode() {
            Ok(()) => Some(Self),
            Err(e) => {
                tracing::debug!(error = %e, "Raw mode unavailable, relaying output only");
                None
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "Failed to restore terminal mode");
        }
    }
}

/// Background input thread; dropping it signals stop and joins.
struct InputPump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl InputPump {
    fn spawn<F>(body: F) -> Self
    where
        F: FnOnce(&AtomicBool) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || body(&stop))
        };
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for InputPump {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Forward terminal events to the child until `stop` is set.
fn relay_terminal_input(
    stop: &AtomicBool,
    mut writer: Box<dyn Write + Send>,
    master: Box<dyn MasterPty + Send>,
) {
    while !stop.load(Ordering::Relaxed) {
        match event::poll(POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!(error = %e, "Terminal input unavailable");
                break;
            }
        }

        let bytes = match event::read() {
            Ok(Event::Key(key)) => encode_key(key),
            Ok(Event::Paste(text)) => Some(text.into_bytes()),
            Ok(Event::Resize(cols, rows)) => {
                let _ = master.resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                });
                None
            }
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => None,
            Err(_) => break,
        };

        if let Some(bytes) = bytes {
            if writer.write_all(&bytes).and_then(|_| writer.flush()).is_err() {
                break;
            }
        }
    }
}

/// Bytes a VT100-style terminal would send for `key`.
fn encode_key(key: KeyEvent) -> Option<Vec<u8>> {
    if key.kind == KeyEventKind::Release {
        return None;
    }

    let mut bytes = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            match c.to_ascii_lowercase() {
                c @ 'a'..='z' => vec![c as u8 - b'a' + 1],
                ' ' | '@' => vec![0],
                '[' => vec![0x1b],
                '\\' => vec![0x1c],
                ']' => vec![0x1d],
                _ => return None,
            }
        }
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        KeyCode::F(n) => match n {
            1 => b"\x1bOP".to_vec(),
            2 => b"\x1bOQ".to_vec(),
            3 => b"\x1bOR".to_vec(),
            4 => b"\x1bOS".to_vec(),
            5..=12 => {
                let code = [15, 17, 18, 19, 20, 21, 23, 24][usize::from(n) - 5];
                format!("\x1b[{}~", code).into_bytes()
            }
            _ => return None,
        },
        _ => return None,
    };

    if key.modifiers.contains(KeyModifiers::ALT) {
        bytes.insert(0, 0x1b);
    }
    Some(bytes)
}

/// Tool wrapper around [`run_interactive`].
pub struct InteractiveCommand;

#[async_trait]
impl Tool for InteractiveCommand {
    fn name(&self) -> &str {
        "run_interactive"
    }

    fn description(&self) -> &str {
        "Run a command that needs a real terminal (prompts, pagers, REPLs). The user interacts with it directly until it exits; returns the exit code and the captured terminal output. Full-screen curses programs may not display correctly."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to run interactively"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let command = str_arg(&args, "command")?.to_string();
        let cwd = ctx.working_dir.clone();

        tracing::info!("Relaying interactive command: {}", command);

        let outcome =
            tokio::task::spawn_blocking(move || run_interactive(&command, &cwd)).await??;

        let transcript = strip_ansi(&outcome.transcript);
        Ok(truncate_output(
            format!("Exit code: {}\n\n{}", outcome.exit_code, transcript.trim_end()),
            MAX_OUTPUT_CHARS,
        ))
    }
}

/// Remove terminal escape sequences and carriage returns from a transcript.
fn strip_ansi(text: &str) -> String {
    static ESCAPES: OnceLock<Regex> = OnceLock::new();
    let escapes = ESCAPES.get_or_init(|| {
        // CSI, OSC (BEL or ST terminated), charset designation, other two-byte escapes
        Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[()#][0-9A-Za-z]|\x1b[@-Z\\-_]|\r")
            .expect("static regex")
    });
    escapes.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_escape_sequences() {
        let raw = "\u{1b}[1;32mok\u{1b}[0m\r\n\u{1b}]0;title\u{7}done";
        assert_eq!(strip_ansi(raw), "ok\ndone");
    }

    #[test]
    fn strips_st_terminated_osc_and_charset_switches() {
        let raw = "\u{1b}]8;;http://x\u{1b}\\link\u{1b}(B\u{1b}[?25h text";
        assert_eq!(strip_ansi(raw), "link text");
    }

    #[test]
    fn keys_encode_like_a_terminal() {
        let key = |code, modifiers| encode_key(KeyEvent::new(code, modifiers));
        assert_eq!(key(KeyCode::Char('x'), KeyModifiers::NONE), Some(b"x".to_vec()));
        assert_eq!(key(KeyCode::Char('c'), KeyModifiers::CONTROL), Some(vec![3]));
        assert_eq!(key(KeyCode::Enter, KeyModifiers::NONE), Some(b"\r".to_vec()));
        assert_eq!(key(KeyCode::Up, KeyModifiers::NONE), Some(b"\x1b[A".to_vec()));
        assert_eq!(key(KeyCode::Char('b'), KeyModifiers::ALT), Some(b"\x1bb".to_vec()));
        assert_eq!(key(KeyCode::F(5), KeyModifiers::NONE), Some(b"\x1b[15~".to_vec()));
        assert_eq!(key(KeyCode::Char('é'), KeyModifiers::NONE), Some("é".as_bytes().to_vec()));
    }

    #[test]
    fn input_thread_is_joined_when_relay_bails_out() {
        fn relay_that_fails(finished: Arc<AtomicBool>) -> anyhow::Result<()> {
            let _pump = InputPump::spawn(move |stop| {
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(5));
                }
                finished.store(true, Ordering::SeqCst);
            });
            Err(anyhow::anyhow!("child wait failed"))
        }

        let finished = Arc::new(AtomicBool::new(false));
        assert!(relay_that_fails(Arc::clone(&finished)).is_err());
        assert!(finished.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[test]
    fn relays_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_interactive("echo relay-ok; exit 3", dir.path()).expect("pty session");
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.transcript.contains("relay-ok"));
    }
}

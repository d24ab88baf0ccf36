//! PTY-backed terminal processes.
//!
//! Each session owns a reader thread that forwards output as `TerminalOutput` and, when
//! the process exits on its own, removes the session and emits `TerminalClosed`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::backend::{BackendEvent, TerminalSize};
use crate::error::{Result, SyncError};

const READ_BUFFER_SIZE: usize = 4096;

struct PtySession {
    writer: Box<dyn Write + Send>,
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

type SessionTable = Arc<Mutex<HashMap<String, PtySession>>>;

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn user_shell() -> String {
    if cfg!(windows) {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
    }
}

/// bash / zsh get `-li` so the user's profile is loaded.
fn is_login_shell(shell: &str) -> bool {
    let shell = shell.to_ascii_lowercase();
    shell.ends_with("/zsh") || shell.ends_with("/bash")
}

/// Shell invocation: interactive login shell, or `-c "<cmd>; exec <shell>"` so the
/// terminal stays usable after the command finishes.
pub fn build_command(cwd: &str, command: Option<(&str, &[String])>) -> CommandBuilder {
    let shell = user_shell();
    let mut cmd = CommandBuilder::new(&shell);
    let login = !cfg!(windows) && is_login_shell(&shell);

    match command {
        None => {
            if login {
                cmd.arg("-li");
            }
        }
        Some((program, args)) => {
            let mut line = program.to_string();
            for arg in args {
                line.push(' ');
                line.push_str(arg);
            }
            if cfg!(windows) {
                cmd.args(["/K", &line]);
            } else {
                if login {
                    cmd.arg("-li");
                }
                cmd.arg("-c");
                cmd.arg(format!("{}; exec {}", line, shell));
            }
        }
    }

    cmd.cwd(cwd);
    if !cfg!(windows) {
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd.env("TERM_PROGRAM", "Autopilot");
    }
    cmd
}

/// Decode as much of `pending` as forms complete UTF-8, keeping a trailing partial
/// sequence for the next read. Invalid bytes are replaced.
pub fn decode_chunk(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(s) => {
            let out = s.to_string();
            pending.clear();
            out
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let out = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            out
        }
        Err(_) => {
            let out = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            out
        }
    }
}

pub struct PtyManager {
    sessions: SessionTable,
    events: broadcast::Sender<BackendEvent>,
}

impl PtyManager {
    pub fn new(events: broadcast::Sender<BackendEvent>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn spawn(&self, cmd: CommandBuilder, size: TerminalSize) -> Result<String> {
        let terminal_id = uuid::Uuid::new_v4().to_string();

        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| SyncError::process(format!("Failed to open pty: {}", e)))?;
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SyncError::process(format!("Failed to spawn shell: {}", e)))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SyncError::process(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SyncError::process(e.to_string()))?;

        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                terminal_id.clone(),
                PtySession {
                    writer,
                    master: pair.master,
                    child,
                },
            );

        let sessions = Arc::clone(&self.sessions);
        let events = self.events.clone();
        let id = terminal_id.clone();
        thread::spawn(move || forward_output(id, reader, sessions, events));

        debug!(terminal = %terminal_id, "terminal spawned");
        Ok(terminal_id)
    }

    pub fn write(&self, terminal_id: &str, data: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get_mut(terminal_id)
            .ok_or_else(|| SyncError::process(format!("Terminal not found: {}", terminal_id)))?;
        session.writer.write_all(data.as_bytes())?;
        session.writer.flush()?;
        Ok(())
    }

    pub fn resize(&self, terminal_id: &str, size: TerminalSize) -> Result<()> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get(terminal_id)
            .ok_or_else(|| SyncError::process(format!("Terminal not found: {}", terminal_id)))?;
        session
            .master
            .resize(pty_size(size))
            .map_err(|e| SyncError::process(format!("Failed to resize: {}", e)))
    }

    /// Terminate the process group. Unknown ids are not an error.
    pub fn close(&self, terminal_id: &str) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(terminal_id);
        let Some(mut session) = session else {
            debug!(terminal = %terminal_id, "close: already gone");
            return Ok(());
        };
        terminate(&mut session);
        debug!(terminal = %terminal_id, "terminal closed");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn close_all(&self) {
        let drained: Vec<PtySession> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, s)| s)
            .collect();
        for mut session in drained {
            terminate(&mut session);
        }
    }
}

impl Drop for PtyManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(unix)]
fn terminate(session: &mut PtySession) {
    let Some(pid) = session.child.process_id() else {
        let _ = session.child.kill();
        return;
    };
    // the shell leads its own process group; signal the whole group
    let group = -(pid as libc::pid_t);
    unsafe {
        libc::kill(group, libc::SIGTERM);
    }
    thread::sleep(std::time::Duration::from_millis(100));
    unsafe {
        libc::kill(group, libc::SIGKILL);
    }
    let _ = session.child.try_wait();
}

#[cfg(not(unix))]
fn terminate(session: &mut PtySession) {
    if let Err(e) = session.child.kill() {
        warn!("failed to kill terminal process: {}", e);
    }
}

fn forward_output(
    terminal_id: String,
    mut reader: Box<dyn Read + Send>,
    sessions: SessionTable,
    events: broadcast::Sender<BackendEvent>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut pending = Vec::new();

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let data = decode_chunk(&mut pending);
                if !data.is_empty() {
                    let _ = events.send(BackendEvent::TerminalOutput {
                        terminal_id: terminal_id.clone(),
                        data,
                    });
                }
            }
            Err(e) => {
                debug!(terminal = %terminal_id, "pty read ended: {}", e);
                break;
            }
        }
    }

    // still registered means nobody asked for the close: the process exited by itself
    let exited = sessions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&terminal_id);
    if let Some(mut session) = exited {
        if let Err(e) = session.child.wait() {
            warn!(terminal = %terminal_id, "failed to reap terminal process: {}", e);
        }
        let _ = events.send(BackendEvent::TerminalClosed { terminal_id });
    }
}

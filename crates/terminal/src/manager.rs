//! Interactive terminal lifecycle.
//!
//! Every terminal is a real PTY. A reader thread drains the master side
//! into the ring buffer and fans out to attached listeners; a waiter
//! thread reaps the child and broadcasts the exit. The manager enforces
//! per-session and global caps and a periodic reaper kills idle and
//! over-age terminals.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use serde::Serialize;
use tokio::sync::broadcast;

use prizm_domain::config::TerminalConfig;
use prizm_domain::error::{Error, Result};

use crate::ring::OutputRing;
use crate::sanitize::sanitized_env;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events fanned out to attached clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalEvent {
    Output { data: String },
    Exit { exit_code: Option<u32> },
}

#[derive(Debug, Clone, Serialize)]
pub struct TerminalInfo {
    pub id: String,
    pub agent_session_id: String,
    pub shell: String,
    pub created_at: DateTime<Utc>,
    pub exited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<u32>,
}

/// Returned by `attach`: the full scrollback, the live event stream, and
/// the exit code when the terminal already finished.
pub struct AttachReplay {
    pub buffered: String,
    pub receiver: broadcast::Receiver<TerminalEvent>,
    pub exited: Option<Option<u32>>,
}

struct Terminal {
    id: String,
    agent_session_id: String,
    shell: String,
    created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    ring: Mutex<OutputRing>,
    writer: Mutex<Box<dyn Write + Send>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    events: broadcast::Sender<TerminalEvent>,
    exited: AtomicBool,
    exit_code: Mutex<Option<u32>>,
}

impl Terminal {
    fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    fn info(&self) -> TerminalInfo {
        TerminalInfo {
            id: self.id.clone(),
            agent_session_id: self.agent_session_id.clone(),
            shell: self.shell.clone(),
            created_at: self.created_at,
            exited: self.exited.load(Ordering::Acquire),
            exit_code: *self.exit_code.lock(),
        }
    }

    fn kill(&self) {
        let _ = self.killer.lock().kill();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TerminalManager {
    config: TerminalConfig,
    log_dir: PathBuf,
    terminals: Mutex<HashMap<String, Arc<Terminal>>>,
}

impl TerminalManager {
    pub fn new(config: TerminalConfig, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            log_dir: data_dir.into().join("terminal-logs"),
            terminals: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    /// Spawn a new interactive terminal for an agent session.
    pub fn create(
        &self,
        agent_session_id: &str,
        shell: Option<&str>,
        cols: u16,
        rows: u16,
    ) -> Result<TerminalInfo> {
        let shell = match shell {
            Some(s) => {
                if !self.config.allowed_shells.iter().any(|a| a == s) {
                    return Err(Error::Validation(format!("shell not allowed: {s}")));
                }
                s.to_owned()
            }
            None => self
                .config
                .allowed_shells
                .first()
                .cloned()
                .ok_or_else(|| Error::Internal("no shells configured".into()))?,
        };

        {
            let terminals = self.terminals.lock();
            let live = |t: &&Arc<Terminal>| !t.exited.load(Ordering::Acquire);
            let session_count = terminals
                .values()
                .filter(live)
                .filter(|t| t.agent_session_id == agent_session_id)
                .count();
            if session_count >= self.config.max_per_session {
                return Err(Error::ConcurrencyLimit(format!(
                    "terminal limit per session reached ({})",
                    self.config.max_per_session
                )));
            }
            if terminals.values().filter(live).count() >= self.config.max_global {
                return Err(Error::ConcurrencyLimit(format!(
                    "global terminal limit reached ({})",
                    self.config.max_global
                )));
            }
        }

        let pty = native_pty_system();
        let pair = pty
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Internal(format!("openpty: {e}")))?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.env_clear();
        for (k, v) in sanitized_env() {
            cmd.env(k, v);
        }
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Internal(format!("spawn {shell}: {e}")))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::Internal(format!("clone reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Internal(format!("take writer: {e}")))?;

        let id = format!("term-{}", uuid::Uuid::new_v4());
        let (events, _) = broadcast::channel(256);
        let terminal = Arc::new(Terminal {
            id: id.clone(),
            agent_session_id: agent_session_id.to_owned(),
            shell,
            created_at: Utc::now(),
            last_activity: Mutex::new(Utc::now()),
            ring: Mutex::new(OutputRing::new(self.config.output_ring_bytes)),
            writer: Mutex::new(writer),
            master: Mutex::new(pair.master),
            killer: Mutex::new(child.clone_killer()),
            events,
            exited: AtomicBool::new(false),
            exit_code: Mutex::new(None),
        });

        self.spawn_reader(terminal.clone(), reader);
        self.spawn_waiter(terminal.clone(), child);

        let info = terminal.info();
        self.terminals.lock().insert(id, terminal);
        Ok(info)
    }

    fn spawn_reader(&self, terminal: Arc<Terminal>, mut reader: Box<dyn Read + Send>) {
        let log_path = self.log_dir.join(format!(
            "interactive_{}_{}.log",
            terminal.id,
            terminal.created_at.format("%Y-%m-%dT%H-%M-%SZ")
        ));
        std::thread::spawn(move || {
            let _ = std::fs::create_dir_all(log_path.parent().unwrap_or(std::path::Path::new(".")));
            let mut log = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .ok();
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                        terminal.ring.lock().push(&text);
                        terminal.touch();
                        if let Some(log) = log.as_mut() {
                            let _ = log.write_all(text.as_bytes());
                        }
                        let _ = terminal.events.send(TerminalEvent::Output { data: text });
                    }
                }
            }
        });
    }

    fn spawn_waiter(
        &self,
        terminal: Arc<Terminal>,
        mut child: Box<dyn portable_pty::Child + Send + Sync>,
    ) {
        std::thread::spawn(move || {
            let status = child.wait();
            let code = status.ok().map(|s| s.exit_code());
            *terminal.exit_code.lock() = code;
            terminal.exited.store(true, Ordering::Release);
            let _ = terminal.events.send(TerminalEvent::Exit { exit_code: code });
            tracing::debug!(terminal_id = %terminal.id, exit_code = ?code, "terminal exited");
        });
    }

    // ── operations ──────────────────────────────────────────────────

    fn get(&self, terminal_id: &str) -> Result<Arc<Terminal>> {
        self.terminals
            .lock()
            .get(terminal_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("terminal {terminal_id}")))
    }

    /// Exclusive write into the PTY.
    pub fn write(&self, terminal_id: &str, data: &str) -> Result<()> {
        let terminal = self.get(terminal_id)?;
        terminal.touch();
        let mut writer = terminal.writer.lock();
        writer
            .write_all(data.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(Error::Io)
    }

    pub fn resize(&self, terminal_id: &str, cols: u16, rows: u16) -> Result<()> {
        let terminal = self.get(terminal_id)?;
        terminal.touch();
        let result = terminal
            .master
            .lock()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Internal(format!("resize: {e}")));
        result
    }

    /// Attach a listener. The caller replays `buffered` as one output
    /// frame before consuming the live receiver; an already-exited
    /// terminal carries its exit code in `exited`.
    pub fn attach(&self, terminal_id: &str) -> Result<AttachReplay> {
        let terminal = self.get(terminal_id)?;
        terminal.touch();
        let receiver = terminal.events.subscribe();
        let buffered = terminal.ring.lock().snapshot();
        let exited = if terminal.exited.load(Ordering::Acquire) {
            Some(*terminal.exit_code.lock())
        } else {
            None
        };
        Ok(AttachReplay {
            buffered,
            receiver,
            exited,
        })
    }

    pub fn kill(&self, terminal_id: &str) -> Result<()> {
        let terminal = self.get(terminal_id)?;
        terminal.kill();
        Ok(())
    }

    /// Kill (if needed) and forget a terminal.
    pub fn remove(&self, terminal_id: &str) -> bool {
        if let Some(terminal) = self.terminals.lock().remove(terminal_id) {
            terminal.kill();
            true
        } else {
            false
        }
    }

    pub fn get_info(&self, terminal_id: &str) -> Option<TerminalInfo> {
        self.terminals
            .lock()
            .get(terminal_id)
            .map(|t| t.info())
    }

    pub fn list(&self, agent_session_id: Option<&str>) -> Vec<TerminalInfo> {
        self.terminals
            .lock()
            .values()
            .filter(|t| agent_session_id.map_or(true, |sid| t.agent_session_id == sid))
            .map(|t| t.info())
            .collect()
    }

    // ── reaping & shutdown ──────────────────────────────────────────

    /// One reaper pass: kill idle and over-age terminals, drop exited
    /// ones. Returns the ids that were removed.
    pub fn reap_once(&self) -> Vec<String> {
        let now = Utc::now();
        let idle_cutoff = Duration::milliseconds(self.config.idle_timeout_ms as i64);
        let age_cutoff = Duration::milliseconds(self.config.max_lifetime_ms as i64);

        let doomed: Vec<Arc<Terminal>> = {
            let terminals = self.terminals.lock();
            terminals
                .values()
                .filter(|t| {
                    t.exited.load(Ordering::Acquire)
                        || now - *t.last_activity.lock() > idle_cutoff
                        || now - t.created_at > age_cutoff
                })
                .cloned()
                .collect()
        };

        let mut removed = Vec::new();
        for terminal in doomed {
            terminal.kill();
            self.terminals.lock().remove(&terminal.id);
            removed.push(terminal.id.clone());
        }
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "reaped terminals");
        }
        removed
    }

    /// Spawn the periodic reaper task.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let interval = std::time::Duration::from_millis(manager.config.reap_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                manager.reap_once();
            }
        })
    }

    /// Kill every PTY, give children 3 s to die, then drop all state.
    pub async fn shutdown(&self) {
        let terminals: Vec<Arc<Terminal>> =
            self.terminals.lock().values().cloned().collect();
        for terminal in &terminals {
            terminal.kill();
        }
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        self.terminals.lock().clear();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, Arc<TerminalManager>) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = Arc::new(TerminalManager::new(
            TerminalConfig {
                allowed_shells: vec!["/bin/sh".into()],
                ..Default::default()
            },
            dir.path(),
        ));
        (dir, mgr)
    }

    #[tokio::test]
    async fn create_write_attach_roundtrip() {
        let (_dir, mgr) = manager();
        let info = mgr.create("sess-1", None, 80, 24).unwrap();
        assert!(!info.exited);

        mgr.write(&info.id, "echo terminal_probe_42\n").unwrap();

        // Poll the ring until the echo lands.
        let mut saw = false;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            let replay = mgr.attach(&info.id).unwrap();
            if replay.buffered.contains("terminal_probe_42") {
                saw = true;
                break;
            }
        }
        assert!(saw, "expected echoed output in the ring buffer");

        mgr.kill(&info.id).unwrap();
    }

    #[tokio::test]
    async fn attach_after_exit_reports_exit() {
        let (_dir, mgr) = manager();
        let info = mgr.create("sess-1", None, 80, 24).unwrap();
        mgr.write(&info.id, "exit 3\n").unwrap();

        let mut exited = None;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            let replay = mgr.attach(&info.id).unwrap();
            if replay.exited.is_some() {
                exited = replay.exited;
                break;
            }
        }
        assert!(exited.is_some(), "terminal should have exited");
    }

    #[tokio::test]
    async fn per_session_cap_enforced() {
        let (_dir, mgr) = manager();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(mgr.create("sess-cap", None, 80, 24).unwrap().id);
        }
        let err = mgr.create("sess-cap", None, 80, 24).unwrap_err();
        assert!(matches!(err, Error::ConcurrencyLimit(_)));
        // Another session still has room.
        assert!(mgr.create("sess-other", None, 80, 24).is_ok());
        for id in ids {
            mgr.remove(&id);
        }
    }

    #[tokio::test]
    async fn disallowed_shell_rejected() {
        let (_dir, mgr) = manager();
        let err = mgr
            .create("sess-1", Some("/bin/evil"), 80, 24)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}

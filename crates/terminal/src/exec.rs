//! One-shot command execution over reusable PTY workers.
//!
//! A worker is a live shell keyed by `(agent session, workspace kind)`.
//! Commands are written with split start/end markers so the shell's echo
//! of the command line never matches the assembled marker; the exit code
//! rides an `:N` trailer on the end-marker line. A timed-out worker is
//! destroyed so the next call rebuilds a fresh one.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use prizm_domain::config::TerminalConfig;
use prizm_domain::error::{Error, Result};

use crate::sanitize::{sanitized_env, strip_ansi};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which working tree a worker operates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceKind {
    Main,
    Session,
    Workflow,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecResult {
    pub timed_out: bool,
    pub exit_code: i32,
    pub output: String,
}

struct ExecWorker {
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    /// Keeps the PTY alive for the worker's lifetime.
    _master: Mutex<Box<dyn portable_pty::MasterPty + Send>>,
    /// Raw PTY output chunks from the reader thread.
    output_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    /// Serializes commands: one at a time per worker.
    busy: tokio::sync::Mutex<()>,
    last_used: Mutex<Instant>,
}

impl ExecWorker {
    fn kill(&self) {
        let _ = self.killer.lock().kill();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ExecWorkerPool {
    config: TerminalConfig,
    workers: Mutex<HashMap<(String, WorkspaceKind), Arc<ExecWorker>>>,
}

impl ExecWorkerPool {
    pub fn new(config: TerminalConfig) -> Self {
        Self {
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Run one command on the worker for `(agent_session_id, kind)`,
    /// creating the worker if needed. Timeout destroys the worker and
    /// yields `{timed_out: true, exit_code: -1}`.
    pub async fn exec(
        &self,
        agent_session_id: &str,
        kind: WorkspaceKind,
        command: &str,
        cwd: &str,
        timeout: Duration,
    ) -> Result<ExecResult> {
        let key = (agent_session_id.to_owned(), kind);
        let worker = self.get_or_spawn(&key)?;

        let _busy = worker.busy.lock().await;
        *worker.last_used.lock() = Instant::now();

        let token = uuid::Uuid::new_v4().simple().to_string();
        let begin_marker = format!("__PRIZM_BEGIN_{token}__");
        let end_marker = format!("__PRIZM_END_{token}__");

        // `git` output is for the model, not a pager.
        let command = if command.trim_start().starts_with("git ") {
            command.trim_start().replacen("git ", "git --no-pager ", 1)
        } else {
            command.to_owned()
        };

        // Split-quoted markers: the echoed input contains
        // `'__PRIZM_BEGIN_''<token>__'`, which never matches the joined
        // marker we scan for in the output.
        let wrapped = format!(
            "cd '{cwd}' && printf '%s\\n' '__PRIZM_BEGIN_''{token}__'; {command}\nprintf '%s:%d\\n' '__PRIZM_END_''{token}__' $?\n",
        );

        {
            let mut writer = worker.writer.lock();
            writer.write_all(wrapped.as_bytes()).map_err(Error::Io)?;
            writer.flush().map_err(Error::Io)?;
        }

        let deadline = Instant::now() + timeout;
        let mut raw = String::new();
        let result = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break None;
            }
            let chunk = {
                let mut rx = worker.output_rx.lock().await;
                tokio::time::timeout(remaining, rx.recv()).await
            };
            match chunk {
                Ok(Some(text)) => {
                    raw.push_str(&text);
                    if let Some(parsed) = parse_marked_output(&raw, &begin_marker, &end_marker) {
                        break Some(parsed);
                    }
                }
                Ok(None) => break None, // worker died
                Err(_) => break None,   // timed out
            }
        };

        *worker.last_used.lock() = Instant::now();

        match result {
            Some((output, exit_code)) => Ok(ExecResult {
                timed_out: false,
                exit_code,
                output,
            }),
            None => {
                // Destroy the worker; the next exec rebuilds a fresh one.
                self.destroy(&key);
                Ok(ExecResult {
                    timed_out: true,
                    exit_code: -1,
                    output: strip_ansi(&raw),
                })
            }
        }
    }

    fn get_or_spawn(&self, key: &(String, WorkspaceKind)) -> Result<Arc<ExecWorker>> {
        if let Some(worker) = self.workers.lock().get(key) {
            return Ok(worker.clone());
        }

        let shell = self
            .config
            .allowed_shells
            .first()
            .cloned()
            .ok_or_else(|| Error::Internal("no shells configured".into()))?;

        let pty = native_pty_system();
        let pair = pty
            .openpty(PtySize {
                rows: 40,
                cols: 200,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Internal(format!("openpty: {e}")))?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.env_clear();
        for (k, v) in sanitized_env() {
            cmd.env(k, v);
        }
        // Plain prompt and no rc noise keeps marker scanning clean.
        cmd.env("PS1", "");
        cmd.env("TERM", "dumb");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Internal(format!("spawn {shell}: {e}")))?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::Internal(format!("clone reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Internal(format!("take writer: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if tx.send(text).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let worker = Arc::new(ExecWorker {
            writer: Mutex::new(writer),
            killer: Mutex::new(child.clone_killer()),
            _master: Mutex::new(pair.master),
            output_rx: tokio::sync::Mutex::new(rx),
            busy: tokio::sync::Mutex::new(()),
            last_used: Mutex::new(Instant::now()),
        });

        self.workers.lock().insert(key.clone(), worker.clone());
        Ok(worker)
    }

    fn destroy(&self, key: &(String, WorkspaceKind)) {
        if let Some(worker) = self.workers.lock().remove(key) {
            worker.kill();
        }
    }

    /// Reap workers idle past the configured timeout. Busy workers are
    /// never reaped.
    pub fn reap_idle(&self) -> usize {
        let cutoff = Duration::from_millis(self.config.exec_idle_timeout_ms);
        let doomed: Vec<(String, WorkspaceKind)> = {
            let workers = self.workers.lock();
            workers
                .iter()
                .filter(|(_, w)| {
                    w.busy.try_lock().is_ok() && w.last_used.lock().elapsed() > cutoff
                })
                .map(|(k, _)| k.clone())
                .collect()
        };
        for key in &doomed {
            self.destroy(key);
        }
        doomed.len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Kill every worker (shutdown).
    pub fn shutdown(&self) {
        let keys: Vec<_> = self.workers.lock().keys().cloned().collect();
        for key in keys {
            self.destroy(&key);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Marker parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Slice the command output from between the markers and parse the exit
/// code from the `:N` trailer. Returns `None` until both markers (and
/// the trailer) are present in `raw`.
fn parse_marked_output(raw: &str, begin_marker: &str, end_marker: &str) -> Option<(String, i32)> {
    let clean = strip_ansi(raw);
    let begin_at = clean.find(begin_marker)?;
    let after_begin = &clean[begin_at + begin_marker.len()..];
    // Output starts after the marker's own newline.
    let after_begin = after_begin.strip_prefix('\n').unwrap_or(after_begin);

    let end_at = after_begin.find(end_marker)?;
    let trailer = &after_begin[end_at + end_marker.len()..];
    let code_text = trailer.strip_prefix(':')?;
    let code_end = code_text
        .find(|c: char| c != '-' && !c.is_ascii_digit())
        .unwrap_or(code_text.len());
    if code_end == 0 {
        return None;
    }
    let exit_code: i32 = code_text[..code_end].parse().ok()?;

    Some((after_begin[..end_at].to_owned(), exit_code))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── marker parsing (pure) ───────────────────────────────────────

    #[test]
    fn parses_output_between_markers() {
        let raw = "echo noise\n__PRIZM_BEGIN_abc__\nhello_from_test\n__PRIZM_END_abc__:0\n";
        let (output, code) =
            parse_marked_output(raw, "__PRIZM_BEGIN_abc__", "__PRIZM_END_abc__").unwrap();
        assert_eq!(output, "hello_from_test\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn echoed_split_marker_does_not_match() {
        // The PTY echoes the command line with the quote-split markers.
        let raw = "printf '%s\\n' '__PRIZM_BEGIN_''abc__'; ls\n__PRIZM_BEGIN_abc__\nfile.txt\n__PRIZM_END_abc__:0\n";
        let (output, code) =
            parse_marked_output(raw, "__PRIZM_BEGIN_abc__", "__PRIZM_END_abc__").unwrap();
        assert_eq!(output, "file.txt\n");
        assert_eq!(code, 0);
    }

    #[test]
    fn nonzero_exit_code_parsed() {
        let raw = "__PRIZM_BEGIN_x__\nboom\n__PRIZM_END_x__:127\n";
        let (_, code) = parse_marked_output(raw, "__PRIZM_BEGIN_x__", "__PRIZM_END_x__").unwrap();
        assert_eq!(code, 127);
    }

    #[test]
    fn incomplete_output_is_none() {
        let raw = "__PRIZM_BEGIN_x__\npartial out";
        assert!(parse_marked_output(raw, "__PRIZM_BEGIN_x__", "__PRIZM_END_x__").is_none());
        // End marker present but trailer not yet flushed.
        let raw2 = "__PRIZM_BEGIN_x__\nout\n__PRIZM_END_x__:";
        assert!(parse_marked_output(raw2, "__PRIZM_BEGIN_x__", "__PRIZM_END_x__").is_none());
    }

    #[test]
    fn ansi_noise_is_stripped_before_matching() {
        let raw = "\x1b[32m__PRIZM_BEGIN_x__\x1b[0m\r\nout\r\n\x1b[1m__PRIZM_END_x__:0\x1b[0m\r\n";
        let (output, code) =
            parse_marked_output(raw, "__PRIZM_BEGIN_x__", "__PRIZM_END_x__").unwrap();
        assert_eq!(output, "out\n");
        assert_eq!(code, 0);
    }

    // ── live workers (unix only) ────────────────────────────────────

    #[cfg(unix)]
    fn pool() -> ExecWorkerPool {
        ExecWorkerPool::new(TerminalConfig {
            allowed_shells: vec!["/bin/bash".into(), "/bin/sh".into()],
            ..Default::default()
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_echo_round_trip() {
        let pool = pool();
        let result = pool
            .exec(
                "sess-1",
                WorkspaceKind::Main,
                "echo hello_from_test",
                "/tmp",
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert!(!result.timed_out);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output.trim(), "hello_from_test");
        pool.shutdown();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_timeout_destroys_worker() {
        let pool = pool();
        let started = Instant::now();
        let result = pool
            .exec(
                "sess-1",
                WorkspaceKind::Main,
                "sleep 100",
                "/tmp",
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert!(result.timed_out);
        assert_eq!(result.exit_code, -1);
        assert!(started.elapsed() < Duration::from_secs(5));
        // Worker was destroyed; a fresh exec still works.
        assert_eq!(pool.worker_count(), 0);
        let retry = pool
            .exec(
                "sess-1",
                WorkspaceKind::Main,
                "echo recovered",
                "/tmp",
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert_eq!(retry.output.trim(), "recovered");
        pool.shutdown();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn workers_are_reused_per_key() {
        let pool = pool();
        pool.exec(
            "sess-1",
            WorkspaceKind::Main,
            "echo one",
            "/tmp",
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        pool.exec(
            "sess-1",
            WorkspaceKind::Main,
            "echo two",
            "/tmp",
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert_eq!(pool.worker_count(), 1);

        pool.exec(
            "sess-1",
            WorkspaceKind::Workflow,
            "echo three",
            "/tmp",
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert_eq!(pool.worker_count(), 2);
        pool.shutdown();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_reported() {
        let pool = pool();
        let result = pool
            .exec(
                "sess-1",
                WorkspaceKind::Main,
                "false",
                "/tmp",
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert!(!result.timed_out);
        assert_eq!(result.exit_code, 1);
        pool.shutdown();
    }
}

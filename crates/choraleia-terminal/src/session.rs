//! One interactive session: a byte duplex, its scrollback, and the WebSocket
//! forwarding contract.
//!
//! Every byte read from the backend is appended to the bounded scrollback and
//! forwarded to the attached WebSocket (when any) in frames of at most 8 KiB.
//! A single reader task per session plus the ordered mpsc to the socket writer
//! keep binary frames from interleaving.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use choraleia_ssh::BoxedDuplex;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, TerminalError};
use crate::scrollback::Scrollback;
use crate::types::SessionKind;

/// Frame size cap for WebSocket forwarding.
const WS_CHUNK_BYTES: usize = 8 * 1024;

enum SessionInput {
    /// PTY writer (blocking, but PTY writes don't stall).
    Pty(Mutex<Box<dyn Write + Send>>),
    /// Write half of an SSH channel stream.
    Stream(tokio::sync::Mutex<WriteHalf<BoxedDuplex>>),
}

pub struct TermSession {
    kind: SessionKind,
    asset_id: Option<String>,
    scrollback: Arc<Mutex<Scrollback>>,
    input: SessionInput,
    /// PTY master for resize; stream-backed sessions cannot resize.
    master: Option<Mutex<Box<dyn MasterPty + Send>>>,
    /// PID of the PTY child, for the hard-kill path.
    child_pid: Option<u32>,
    last_command: Mutex<Option<String>>,
    ws_tx: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
    paused: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    created_at: u64,
}

impl TermSession {
    /// Spawn a local PTY running `shell` (optionally as a login shell) and
    /// start its reader thread.
    pub fn new_local_pty(
        shell: &str,
        login: bool,
        env: &[(String, String)],
        cwd: Option<&str>,
    ) -> Result<Self> {
        let mut cmd = CommandBuilder::new(shell);
        if login {
            cmd.arg("-l");
        }
        for (k, v) in env {
            cmd.env(k, v);
        }
        if let Some(cwd) = cwd {
            cmd.cwd(cwd);
        }
        Self::spawn_pty(SessionKind::LocalPty, None, cmd)
    }

    /// `docker exec -it <container> <shell>` on the local daemon, under a PTY.
    pub fn new_docker_exec_local(container: &str, shell: &str) -> Result<Self> {
        let mut cmd = CommandBuilder::new("docker");
        cmd.args(["exec", "-it", container, shell]);
        Self::spawn_pty(SessionKind::DockerExec, None, cmd)
    }

    fn spawn_pty(
        kind: SessionKind,
        asset_id: Option<String>,
        cmd: CommandBuilder,
    ) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::PtySpawn(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::PtySpawn(e.to_string()))?;
        let child_pid = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::PtySpawn(e.to_string()))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::PtySpawn(e.to_string()))?;

        let scrollback = Arc::new(Mutex::new(Scrollback::new()));
        let ws_tx: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>> = Arc::new(Mutex::new(None));
        let paused = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));

        // Blocking PTY reads run on a dedicated OS thread so they never block
        // the Tokio runtime.
        {
            let scrollback = Arc::clone(&scrollback);
            let ws_tx = Arc::clone(&ws_tx);
            let paused = Arc::clone(&paused);
            let alive = Arc::clone(&alive);
            std::thread::spawn(move || {
                let mut buf = [0u8; WS_CHUNK_BYTES];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if let Some(tx) = record_chunk(&buf[..n], &scrollback, &ws_tx, &paused)
                            {
                                // Blocking is fine here: this is an OS thread,
                                // and back-pressure preserves byte order.
                                let _ = tx.blocking_send(buf[..n].to_vec());
                            }
                        }
                        Err(e) => {
                            warn!("PTY reader error: {e}");
                            break;
                        }
                    }
                }
                alive.store(false, Ordering::Release);
                debug!("PTY reader thread exited");
            });
        }

        Ok(Self {
            kind,
            asset_id,
            scrollback,
            input: SessionInput::Pty(Mutex::new(writer)),
            master: Some(Mutex::new(pair.master)),
            child_pid,
            last_command: Mutex::new(None),
            ws_tx,
            paused,
            alive,
            created_at: now_secs(),
        })
    }

    /// Wrap an already-open byte duplex (SSH shell channel, remote docker
    /// exec) and start its reader task.
    pub fn new_from_stream(
        kind: SessionKind,
        asset_id: Option<String>,
        stream: BoxedDuplex,
    ) -> Self {
        let (mut read_half, write_half) = tokio::io::split(stream);

        let scrollback = Arc::new(Mutex::new(Scrollback::new()));
        let ws_tx: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>> = Arc::new(Mutex::new(None));
        let paused = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));

        {
            let scrollback = Arc::clone(&scrollback);
            let ws_tx = Arc::clone(&ws_tx);
            let paused = Arc::clone(&paused);
            let alive = Arc::clone(&alive);
            tokio::spawn(async move {
                let mut buf = [0u8; WS_CHUNK_BYTES];
                loop {
                    match read_half.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            if let Some(tx) = record_chunk(&buf[..n], &scrollback, &ws_tx, &paused)
                            {
                                let _ = tx.send(buf[..n].to_vec()).await;
                            }
                        }
                        Err(e) => {
                            warn!("stream reader error: {e}");
                            break;
                        }
                    }
                }
                alive.store(false, Ordering::Release);
                debug!("stream reader task exited");
            });
        }

        Self {
            kind,
            asset_id,
            scrollback,
            input: SessionInput::Stream(tokio::sync::Mutex::new(write_half)),
            master: None,
            child_pid: None,
            last_command: Mutex::new(None),
            ws_tx,
            paused,
            alive,
            created_at: now_secs(),
        }
    }

    // -----------------------------------------------------------------------
    // I/O
    // -----------------------------------------------------------------------

    /// Relay client input to the backend verbatim. When the write carries a
    /// line terminator the trimmed text is recorded as `last_command`
    /// (best-effort; a paste or multi-line write records everything).
    pub async fn write(&self, data: &str) -> Result<()> {
        if data.contains('\n') || data.contains('\r') {
            let trimmed = data.trim();
            if !trimmed.is_empty() {
                *self.last_command.lock().unwrap() = Some(trimmed.to_string());
            }
        }
        match &self.input {
            SessionInput::Pty(writer) => {
                let mut guard = writer.lock().unwrap();
                guard.write_all(data.as_bytes())?;
                guard.flush()?;
                Ok(())
            }
            SessionInput::Stream(writer) => {
                let mut guard = writer.lock().await;
                guard.write_all(data.as_bytes()).await?;
                guard.flush().await?;
                Ok(())
            }
        }
    }

    /// Resize the PTY. A no-op for stream-backed sessions, whose window is
    /// fixed at open time.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        if let Some(master) = &self.master {
            master
                .lock()
                .unwrap()
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| TerminalError::IoError(std::io::Error::other(e.to_string())))?;
        }
        Ok(())
    }

    /// Ask the backend to exit: Ctrl-D first (clean shell EOF), then SIGKILL
    /// on the child if the reader is still alive shortly after.
    pub async fn kill(&self) -> Result<()> {
        let _ = self.write("\x04").await;
        if let Some(pid) = self.child_pid {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            if self.is_alive() {
                #[cfg(unix)]
                // Safety: pid is our direct PTY child.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGKILL);
                }
                #[cfg(not(unix))]
                let _ = pid;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scrollback access
    // -----------------------------------------------------------------------

    pub fn scrollback_end(&self) -> u64 {
        self.scrollback.lock().unwrap().end_offset()
    }

    pub fn scrollback_window(&self, from: u64) -> Vec<u8> {
        self.scrollback.lock().unwrap().window_from(from)
    }

    pub fn scrollback_tail(&self, bytes: usize) -> Vec<u8> {
        self.scrollback.lock().unwrap().tail(bytes)
    }

    pub fn scrollback_len(&self) -> usize {
        self.scrollback.lock().unwrap().len()
    }

    // -----------------------------------------------------------------------
    // Attachment
    // -----------------------------------------------------------------------

    /// Attach a WebSocket sender; backend bytes are forwarded to it from now
    /// on. Replaces any previous attachment.
    pub fn attach_ws(&self, tx: mpsc::Sender<Vec<u8>>) {
        *self.ws_tx.lock().unwrap() = Some(tx);
    }

    pub fn detach_ws(&self) {
        *self.ws_tx.lock().unwrap() = None;
    }

    /// Pause/resume WS forwarding. Scrollback keeps recording while paused.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn asset_id(&self) -> Option<&str> {
        self.asset_id.as_deref()
    }

    pub fn last_command(&self) -> Option<String> {
        self.last_command.lock().unwrap().clone()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }
}

/// Shared by both reader flavors: record to scrollback, then hand back the
/// socket sender (if attached and not paused) for the caller to forward on —
/// the PTY thread blocks on it, the async task awaits it.
fn record_chunk(
    data: &[u8],
    scrollback: &Arc<Mutex<Scrollback>>,
    ws_tx: &Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
    paused: &Arc<AtomicBool>,
) -> Option<mpsc::Sender<Vec<u8>>> {
    scrollback.lock().unwrap().append(data);
    if paused.load(Ordering::Acquire) {
        return None;
    }
    ws_tx.lock().unwrap().clone()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

//! ClipboardSession - one secret on the system clipboard, for a bounded time
//!
//! States: `Idle -> Armed(handle) -> Idle`. Arming a new session wipes the
//! previous value before the new one is written. Each arm schedules one
//! timer; when it fires it clears the clipboard only if the session is still
//! armed with the same handle, so a stale timer never touches a newer
//! secret. The handle comparison and the wipe happen under one lock.

use qpass_core::process::command_exists;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::error::{QpassError, Result};

/// Access to a clipboard
pub trait ClipboardBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Replace the clipboard content
    fn write(&self, value: &str) -> Result<()>;

    /// Current content, `None` when this backend cannot read it back
    fn read(&self) -> Result<Option<String>>;

    /// Empty the clipboard
    fn clear(&self) -> Result<()>;
}

/// Clipboard tools driven as child processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClipboard {
    /// macOS pbcopy/pbpaste
    Pbcopy,
    /// Wayland wl-copy/wl-paste
    WlCopy,
    /// X11 xclip
    Xclip,
    /// X11 xsel
    Xsel,
}

impl CommandClipboard {
    /// Detect the best available clipboard tool for the current session
    pub fn detect() -> Option<Self> {
        #[cfg(target_os = "macos")]
        {
            command_exists("pbcopy").then_some(Self::Pbcopy)
        }

        #[cfg(not(target_os = "macos"))]
        {
            if std::env::var_os("WAYLAND_DISPLAY").is_some() && command_exists("wl-copy") {
                return Some(Self::WlCopy);
            }
            if std::env::var_os("DISPLAY").is_some() {
                if command_exists("xclip") {
                    return Some(Self::Xclip);
                }
                if command_exists("xsel") {
                    return Some(Self::Xsel);
                }
            }
            None
        }
    }

    fn copy_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Pbcopy => ("pbcopy", &[]),
            Self::WlCopy => ("wl-copy", &[]),
            Self::Xclip => ("xclip", &["-selection", "clipboard", "-in"]),
            Self::Xsel => ("xsel", &["--clipboard", "--input"]),
        }
    }

    fn paste_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Pbcopy => ("pbpaste", &[]),
            Self::WlCopy => ("wl-paste", &["--no-newline"]),
            Self::Xclip => ("xclip", &["-selection", "clipboard", "-out"]),
            Self::Xsel => ("xsel", &["--clipboard", "--output"]),
        }
    }

    fn failed(&self, action: &str, detail: impl std::fmt::Display) -> QpassError {
        QpassError::Clipboard(format!("{} {} failed: {}", self.name(), action, detail))
    }
}

impl ClipboardBackend for CommandClipboard {
    fn name(&self) -> &str {
        match self {
            Self::Pbcopy => "pbcopy",
            Self::WlCopy => "wl-copy",
            Self::Xclip => "xclip",
            Self::Xsel => "xsel",
        }
    }

    fn write(&self, value: &str) -> Result<()> {
        let (program, args) = self.copy_command();
        // The value goes through stdin, never the argument list
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| self.failed("copy", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(value.as_bytes())
                .map_err(|e| self.failed("copy", e))?;
        }

        let status = child.wait().map_err(|e| self.failed("copy", e))?;
        if !status.success() {
            return Err(self.failed("copy", status));
        }
        Ok(())
    }

    fn read(&self) -> Result<Option<String>> {
        let (program, args) = self.paste_command();
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|e| self.failed("paste", e))?;

        if !output.status.success() {
            // An empty selection and a broken display look the same here
            debug!(backend = self.name(), status = %output.status, "clipboard not readable");
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    fn clear(&self) -> Result<()> {
        match self {
            Self::WlCopy => run_quietly("wl-copy", &["--clear"]).map_err(|e| self.failed("clear", e)),
            Self::Xsel => {
                run_quietly("xsel", &["--clipboard", "--delete"]).map_err(|e| self.failed("clear", e))
            }
            Self::Pbcopy | Self::Xclip => self.write(""),
        }
    }
}

fn run_quietly(program: &str, args: &[&str]) -> std::io::Result<()> {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{} exited with {}", program, status),
        ))
    }
}

/// In-process clipboard for headless use and tests
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    content: Mutex<String>,
    writes: Mutex<Vec<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> String {
        lock(&self.content).clone()
    }

    /// Every value written through the backend, clears included as `""`
    pub fn writes(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    /// Simulate another application replacing the content
    pub fn set_external(&self, value: &str) {
        *lock(&self.content) = value.to_string();
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&self, value: &str) -> Result<()> {
        *lock(&self.content) = value.to_string();
        lock(&self.writes).push(value.to_string());
        Ok(())
    }

    fn read(&self) -> Result<Option<String>> {
        Ok(Some(self.content()))
    }

    fn clear(&self) -> Result<()> {
        self.write("")
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identity of one armed session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Armed {
        handle: SessionHandle,
        armed_at: Instant,
        timeout: Duration,
        expected_hash: [u8; 32],
    },
}

struct Inner {
    backend: Arc<dyn ClipboardBackend>,
    state: Mutex<SessionState>,
    next_handle: AtomicU64,
}

/// Time-bounded holder of one secret on the clipboard
///
/// Cloning shares the same session; a process should create one.
#[derive(Clone)]
pub struct ClipboardSession {
    inner: Arc<Inner>,
}

impl ClipboardSession {
    pub fn new(backend: Arc<dyn ClipboardBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                state: Mutex::new(SessionState::Idle),
                next_handle: AtomicU64::new(1),
            }),
        }
    }

    /// Session on the system clipboard, `None` when no clipboard tool is usable
    pub fn detect() -> Option<Self> {
        let backend = CommandClipboard::detect()?;
        debug!(backend = backend.name(), "clipboard backend detected");
        Some(Self::new(Arc::new(backend)))
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.inner.state)
    }

    /// Handle of the armed session, if any
    pub fn current(&self) -> Option<SessionHandle> {
        match *self.state() {
            SessionState::Armed { handle, .. } => Some(handle),
            SessionState::Idle => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.current().is_some()
    }

    /// Time left before the armed session expires
    pub fn remaining(&self) -> Option<Duration> {
        match *self.state() {
            SessionState::Armed {
                armed_at, timeout, ..
            } => Some(timeout.saturating_sub(armed_at.elapsed())),
            SessionState::Idle => None,
        }
    }

    /// Put `value` on the clipboard and schedule its removal after `timeout`
    ///
    /// Any armed session is wiped first, so a superseded secret is never
    /// left behind even if writing the new one fails.
    pub fn hold(&self, value: &str, timeout: Duration) -> Result<SessionHandle> {
        let handle = {
            let mut state = self.state();
            if let SessionState::Armed { handle, .. } = *state {
                self.inner.backend.clear()?;
                *state = SessionState::Idle;
                info!(session = handle.0, "superseded clipboard session cleared");
            }

            self.inner.backend.write(value)?;
            let handle = SessionHandle(self.inner.next_handle.fetch_add(1, Ordering::SeqCst));
            *state = SessionState::Armed {
                handle,
                armed_at: Instant::now(),
                timeout,
                expected_hash: fingerprint(value),
            };
            handle
        };

        info!(
            session = handle.0,
            backend = self.backend_name(),
            timeout = ?timeout,
            "clipboard session armed"
        );
        self.schedule_expiry(handle, timeout);
        Ok(handle)
    }

    /// Clear the clipboard if `handle` is still the armed session
    ///
    /// Returns whether the clipboard was wiped. A stale handle is a no-op.
    /// When the clipboard can be read and no longer holds the armed value
    /// (the user copied something else), the session ends without wiping.
    pub fn clear_if_current(&self, handle: SessionHandle) -> Result<bool> {
        let mut state = self.state();
        let expected_hash = match *state {
            SessionState::Armed {
                handle: current,
                expected_hash,
                ..
            } if current == handle => expected_hash,
            _ => return Ok(false),
        };

        let replaced = match self.inner.backend.read() {
            Ok(Some(mut content)) => {
                let still_ours = fingerprint(&content) == expected_hash
                    || fingerprint(content.trim_end_matches('\n')) == expected_hash;
                content.zeroize();
                !still_ours
            }
            Ok(None) => false,
            Err(e) => {
                debug!("clipboard not readable, clearing anyway: {}", e);
                false
            }
        };

        if !replaced {
            self.inner.backend.clear()?;
        }
        *state = SessionState::Idle;
        Ok(!replaced)
    }

    /// Wipe the clipboard unconditionally and go idle
    pub fn clear_now(&self) -> Result<()> {
        let mut state = self.state();
        self.inner.backend.clear()?;
        if let SessionState::Armed { handle, .. } = *state {
            info!(session = handle.0, "clipboard session cleared");
        }
        *state = SessionState::Idle;
        Ok(())
    }

    /// Guard that clears an armed session when dropped
    pub fn guard(&self) -> ClipboardGuard {
        ClipboardGuard {
            session: self.clone(),
        }
    }

    fn schedule_expiry(&self, handle: SessionHandle, timeout: Duration) {
        let session = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = tokio::task::spawn_blocking(move || session.expire(handle)).await;
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    std::thread::sleep(timeout);
                    session.expire(handle);
                });
            }
        }
    }

    fn expire(&self, handle: SessionHandle) {
        match self.clear_if_current(handle) {
            Ok(true) => info!(session = handle.0, "clipboard cleared after timeout"),
            Ok(false) => debug!(session = handle.0, "clipboard timer found nothing to clear"),
            Err(e) => warn!(session = handle.0, "failed to clear clipboard: {}", e),
        }
    }
}

/// Clears an armed session on drop
pub struct ClipboardGuard {
    session: ClipboardSession,
}

impl Drop for ClipboardGuard {
    fn drop(&mut self) {
        if self.session.is_armed() {
            if let Err(e) = self.session.clear_now() {
                warn!("failed to clear clipboard on exit: {}", e);
            }
        }
    }
}

fn fingerprint(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

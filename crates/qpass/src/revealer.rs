//! Revealer - decrypt one entry with the external decryption program
//!
//! The program (gpg by default) gets the absolute path of the encrypted file
//! as its last argument and prints the plaintext on stdout. Only stdout is
//! treated as content; stderr becomes the failure reason. A wrong passphrase
//! or missing key is reported once and never retried here.

use chrono::{DateTime, Utc};
use qpass_core::format;
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::entry::Entry;
use crate::error::{QpassError, Result};
use crate::store::Ciphertext;

/// Longest failure reason passed back to the caller
pub const MAX_REASON_CHARS: usize = 400;

const REDACTED: &str = "[redacted]";
const WITHHELD: &str = "diagnostics withheld, they repeated decrypted content";

/// Decrypted content of one entry
///
/// Owned by whoever asked for it. The lines are wiped when the value is
/// dropped or [`discard`](Self::discard)ed, and `Debug` never prints them.
pub struct RevealedSecret {
    entry: Entry,
    lines: Vec<String>,
    created_at: DateTime<Utc>,
}

impl RevealedSecret {
    pub fn new(entry: Entry, lines: Vec<String>) -> Self {
        Self {
            entry,
            lines,
            created_at: Utc::now(),
        }
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The password line (the first line, by `pass` convention)
    pub fn password(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    /// Extract one field as an owned, self-wiping string
    pub fn field(&self, selector: &FieldSelector) -> Result<Zeroizing<String>> {
        let value = match selector {
            FieldSelector::FirstLine => self.password(),
            FieldSelector::Label(label) => self.lines.iter().find_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case(label.trim())
                    .then(|| value.trim())
            }),
        };

        value
            .map(|v| Zeroizing::new(v.to_string()))
            .ok_or_else(|| QpassError::MissingField {
                entry: self.entry.name().to_string(),
                field: selector.to_string(),
            })
    }

    /// Lines after the password line, minus any line matching a filter
    ///
    /// Leading and trailing blank lines are dropped.
    pub fn details(&self, filters: &[Regex]) -> Vec<&str> {
        let mut details: Vec<&str> = self
            .lines
            .iter()
            .skip(1)
            .map(String::as_str)
            .filter(|line| !filters.iter().any(|f| f.is_match(line)))
            .collect();

        while details.first().is_some_and(|l| l.trim().is_empty()) {
            details.remove(0);
        }
        while details.last().is_some_and(|l| l.trim().is_empty()) {
            details.pop();
        }
        details
    }

    /// Wipe the plaintext now
    pub fn discard(self) {
        drop(self);
    }
}

impl Drop for RevealedSecret {
    fn drop(&mut self) {
        for line in &mut self.lines {
            line.zeroize();
        }
        self.lines.clear();
    }
}

impl fmt::Debug for RevealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevealedSecret")
            .field("entry", &self.entry)
            .field("lines", &format_args!("<{} redacted>", self.lines.len()))
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Which part of a revealed entry to copy
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldSelector {
    /// The password line
    #[default]
    FirstLine,
    /// The value of the first `label: value` line
    Label(String),
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstLine => f.write_str("password"),
            Self::Label(label) => f.write_str(label),
        }
    }
}

/// Compile detail filters as case-insensitive patterns
pub fn compile_filters<S: AsRef<str>>(patterns: &[S]) -> std::result::Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|p| RegexBuilder::new(p.as_ref()).case_insensitive(true).build())
        .collect()
}

/// Runs the external decryption program
#[derive(Debug, Clone)]
pub struct Revealer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Revealer {
    /// `command` is the program followed by its leading arguments
    pub fn new(command: &[String], timeout: Duration) -> Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| {
            QpassError::Configuration("decryption command is empty".to_string())
        })?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Decrypt one entry
    ///
    /// Spawns exactly one process. A process still running after the
    /// timeout is killed and reported as [`QpassError::DecryptionTimeout`].
    pub async fn reveal(&self, ciphertext: &Ciphertext) -> Result<RevealedSecret> {
        let entry = ciphertext.entry();
        debug!(entry = %entry.name(), program = %self.program, "decrypting");

        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(ciphertext.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                QpassError::DecryptionFailed(format!("failed to start {}: {}", self.program, e))
            })?;

        // On timeout the child is dropped, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(QpassError::DecryptionFailed(format!(
                    "failed to wait for {}: {}",
                    self.program, e
                )))
            }
            Err(_) => {
                warn!(entry = %entry.name(), timeout = ?self.timeout, "decryption timed out");
                return Err(QpassError::DecryptionTimeout {
                    timeout: self.timeout,
                });
            }
        };

        let mut stdout = Zeroizing::new(output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = if stderr.trim().is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                scrub_reason(&stderr, &stdout)
            };
            return Err(QpassError::DecryptionFailed(reason));
        }

        let text = match String::from_utf8(std::mem::take(&mut *stdout)) {
            Ok(text) => Zeroizing::new(text),
            Err(e) => {
                e.into_bytes().zeroize();
                return Err(QpassError::DecryptionFailed(
                    "decrypted content is not valid UTF-8 text".to_string(),
                ));
            }
        };

        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        debug!(entry = %entry.name(), lines = lines.len(), "decrypted");
        Ok(RevealedSecret::new(entry.clone(), lines))
    }
}

/// `password: x`, `token=x` and friends in diagnostic output
fn secret_assignment() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(pass(?:word|phrase)?|secret|token|pin|otp)\s*[:=]\s*\S+")
            .expect("secret assignment pattern is valid")
    })
}

/// Turn diagnostic output into a reason safe to show and log
///
/// Anything that also appeared on stdout is removed (or the whole text is
/// withheld when a short stdout line shows up in it), then likely secrets
/// are masked and the result is cut to [`MAX_REASON_CHARS`].
fn scrub_reason(stderr: &str, stdout: &[u8]) -> String {
    let mut reason = stderr.to_string();

    let plaintext = String::from_utf8_lossy(stdout);
    let (long, short): (Vec<&str>, Vec<&str>) = plaintext
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .partition(|l| l.chars().count() >= 4);
    for line in long {
        reason = reason.replace(line, REDACTED);
    }
    // Short values cannot be cut out without mangling the rest of the text
    if short.iter().any(|line| reason.contains(line)) {
        reason.zeroize();
        return WITHHELD.to_string();
    }
    drop(plaintext);

    let reason = secret_assignment().replace_all(&reason, format!("$1: {}", REDACTED));
    let reason = reason
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ");

    format::truncate(&reason, MAX_REASON_CHARS)
}

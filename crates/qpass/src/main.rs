//! qpass - Quick search for one or more `pass` password stores
//!
//! Keywords select an entry by fuzzy search across every configured store.
//! The entry is decrypted, its details are shown and the password is held
//! on the clipboard until the timeout expires (or Ctrl-C).
//!
//! Exit codes:
//! - 0: success
//! - 1: no entry, several entries or a missing field
//! - 2: decryption failed or timed out
//! - 3: configuration problem (no usable store, bad config or options)
//! - 4: clipboard failure

use anyhow::{bail, Context, Result};
use clap::{ArgAction, CommandFactory, Parser};
use qpass::{
    compile_filters, select_entry, select_entry_interactive, Aggregator, ClipboardSession, Entry,
    FieldSelector, QpassError, Revealer,
};
use qpass_core::paths::STORE_DIR_VARIABLE;
use qpass_core::{format, Config, Paths};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process::{self, Command};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

#[derive(Parser, Debug)]
#[command(name = "qpass")]
#[command(about = "Quick search frontend for pass password stores")]
#[command(version)]
#[command(after_help = r#"SEARCHING:
    Every keyword must match the entry name. Exact substrings are preferred;
    when none exist the keywords are matched fuzzily, so "gh" finds
    "web/github". Keywords that spell out a full entry name select it
    directly. When several entries match and qpass runs on a terminal,
    it lists them and asks for a number or some narrowing text.

STORES:
    -p DIR (repeatable), then "stores" in the config file, then
    $PASSWORD_STORE_DIR, then ~/.password-store. Entries that exist in
    several stores are shown as "[label] name".

EXAMPLES:
    qpass github                  # Show web/github, copy its password
    qpass -l mail                 # List entries matching "mail"
    qpass -n -f '^url' bank       # Print everything except url lines
    qpass -F login github         # Copy the "login: ..." value instead
    qpass -s work vpn             # Search only the store labelled "work"
    qpass -e github               # Edit the entry with "pass edit""#)]
struct Cli {
    /// Keywords selecting the entry
    keywords: Vec<String>,

    /// List the matching entries instead of showing one
    #[arg(short, long)]
    list: bool,

    /// Edit the matching entry with `pass edit`
    #[arg(short, long, conflicts_with = "list")]
    edit: bool,

    /// Print the password instead of copying it to the clipboard
    #[arg(short, long)]
    no_clipboard: bool,

    /// Password store directory (repeatable)
    #[arg(short, long = "password-store", value_name = "DIR")]
    password_store: Vec<PathBuf>,

    /// Only search the store with this label or id
    #[arg(short, long, value_name = "SELECTOR")]
    store: Option<String>,

    /// Hide detail lines matching this case-insensitive regex (repeatable)
    #[arg(short, long, value_name = "PATTERN")]
    filter: Vec<String>,

    /// Copy the value of a "LABEL: value" line instead of the password
    #[arg(short = 'F', long, value_name = "LABEL")]
    field: Option<String>,

    /// Seconds the clipboard holds the secret
    #[arg(short, long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Less output; once hides the entry details (repeatable)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,
}

impl Cli {
    fn log_level(&self) -> &'static str {
        match (self.verbose, self.quiet) {
            (0, 0) => "warn",
            (1, _) => "info",
            (2, _) => "debug",
            (v, _) if v > 2 => "trace",
            (_, 1) => "error",
            _ => "off",
        }
    }

    fn field_selector(&self) -> FieldSelector {
        match &self.field {
            Some(label) => FieldSelector::Label(label.clone()),
            None => FieldSelector::FirstLine,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            process::exit(3);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(exit_code(&e));
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<QpassError>()
        .map(QpassError::exit_code)
        .unwrap_or(3)
}

fn run(cli: Cli) -> Result<()> {
    if cli.keywords.is_empty() && !cli.list {
        Cli::command().print_help()?;
        return Ok(());
    }

    let paths = Paths::new();
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());
    let mut config = Config::load(&config_path)?;
    config.apply_env();
    if let Some(secs) = cli.timeout {
        config.clipboard_timeout_secs = secs;
    }

    let specs = config.store_specs(&cli.password_store, &paths);
    let mut aggregator = Aggregator::configure(&specs)?;
    if let Some(selector) = &cli.store {
        aggregator.restrict(selector)?;
    }

    if cli.list {
        cmd_list(&aggregator, &cli.keywords);
        Ok(())
    } else if cli.edit {
        cmd_edit(&aggregator, &cli.keywords)
    } else {
        cmd_show(&aggregator, &config, &cli)
    }
}

/// Print the matching entry names
fn cmd_list(aggregator: &Aggregator, keywords: &[String]) {
    for ranked in aggregator.smart_search(keywords) {
        println!("{}", aggregator.label(&ranked.entry));
    }
}

/// Hand the matching entry to `pass edit`
fn cmd_edit(aggregator: &Aggregator, keywords: &[String]) -> Result<()> {
    let entry = pick_entry(aggregator, keywords)?;
    let store = aggregator
        .store(entry.store_id())
        .context("entry belongs to no configured store")?;

    debug!(entry = entry.name(), store = store.label(), "running pass edit");
    let status = Command::new("pass")
        .arg("edit")
        .arg(entry.name())
        .env(STORE_DIR_VARIABLE, store.root())
        .status()
        .context("Failed to run pass")?;

    if !status.success() {
        bail!("pass edit exited with {}", status);
    }
    Ok(())
}

/// Show the matching entry and copy (or print) its password
fn cmd_show(aggregator: &Aggregator, config: &Config, cli: &Cli) -> Result<()> {
    let mut patterns = config.filters.clone();
    patterns.extend(cli.filter.iter().cloned());
    let filters = compile_filters(&patterns).context("Invalid filter pattern")?;
    let revealer = Revealer::new(&config.decrypt_command, config.decrypt_timeout())?;
    let selector = cli.field_selector();
    let timeout = config.clipboard_timeout();

    let clipboard = if cli.no_clipboard {
        None
    } else {
        let session = ClipboardSession::detect();
        if session.is_none() {
            info!("no clipboard available, printing the password instead");
        }
        session
    };

    let entry = pick_entry(aggregator, &cli.keywords)?;
    let ciphertext = aggregator.read(&entry)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let secret = revealer.reveal(&ciphertext).await?;
        let value = secret.field(&selector)?;

        // Printed only when it is not going to the clipboard
        let password_line = clipboard.is_none().then(|| {
            Zeroizing::new(format!("{}: {}", capitalize(&selector.to_string()), value.as_str()))
        });
        let mut stdout = io::stdout().lock();
        if cli.quiet == 0 {
            write_entry(
                &mut stdout,
                &entry.title(),
                password_line.as_deref().map(String::as_str),
                &secret.details(&filters),
            )?;
        } else if let Some(line) = &password_line {
            writeln!(stdout, "{}", line.as_str())?;
        }
        drop(stdout);

        let Some(session) = clipboard else {
            return Ok(());
        };

        let guard = session.guard();
        let handle = session.hold(&value, timeout)?;
        drop(value);
        secret.discard();

        eprintln!(
            "Copied {} to the clipboard ({}), clearing in {}",
            selector,
            session.backend_name(),
            format::duration(timeout)
        );
        wait_for_expiry(timeout).await;

        session.clear_if_current(handle)?;
        drop(guard);
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

/// Select an entry, asking on the terminal when several match
fn pick_entry(aggregator: &Aggregator, keywords: &[String]) -> qpass::Result<Entry> {
    if io::stdin().is_terminal() && io::stderr().is_terminal() {
        select_entry_interactive(aggregator, keywords, &mut io::stdin().lock(), &mut io::stderr())
    } else {
        select_entry(aggregator, keywords)
    }
}

/// Title, then the password line when it is not copied, then the details
fn write_entry<W: Write>(
    out: &mut W,
    title: &str,
    password_line: Option<&str>,
    details: &[&str],
) -> io::Result<()> {
    writeln!(out, "{}", title)?;
    if password_line.is_some() || !details.is_empty() {
        writeln!(out)?;
    }
    if let Some(line) = password_line {
        writeln!(out, "{}", line)?;
    }
    for line in details {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

async fn wait_for_expiry(timeout: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(timeout) => {}
        _ = tokio::signal::ctrl_c() => debug!("interrupted, clearing clipboard early"),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["qpass", "--help"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_show_parsing() {
        let cli = Cli::try_parse_from([
            "qpass", "-p", "/a", "-p", "/b", "-f", "^url", "-F", "login", "-t", "10", "web", "git",
        ])
        .unwrap();
        assert_eq!(cli.keywords, vec!["web", "git"]);
        assert_eq!(cli.password_store, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(cli.filter, vec!["^url"]);
        assert_eq!(cli.field_selector(), FieldSelector::Label("login".to_string()));
        assert_eq!(cli.timeout, Some(10));
        assert!(!cli.list && !cli.edit && !cli.no_clipboard);
    }

    #[test]
    fn test_list_and_flags() {
        let cli = Cli::try_parse_from(["qpass", "-l", "-s", "work", "-vv"]).unwrap();
        assert!(cli.list);
        assert!(cli.keywords.is_empty());
        assert_eq!(cli.store.as_deref(), Some("work"));
        assert_eq!(cli.log_level(), "debug");
        assert_eq!(cli.field_selector(), FieldSelector::FirstLine);
    }

    #[test]
    fn test_invalid_combinations() {
        assert!(Cli::try_parse_from(["qpass", "-l", "-e", "x"]).is_err());
        assert!(Cli::try_parse_from(["qpass", "-v", "-q", "x"]).is_err());
        assert!(Cli::try_parse_from(["qpass", "-t", "0", "x"]).is_err());
    }

    #[test]
    fn test_log_levels() {
        let level = |args: &[&str]| Cli::try_parse_from(args.iter().copied()).unwrap().log_level();
        assert_eq!(level(&["qpass", "x"]), "warn");
        assert_eq!(level(&["qpass", "-v", "x"]), "info");
        assert_eq!(level(&["qpass", "-vvvv", "x"]), "trace");
        assert_eq!(level(&["qpass", "-q", "x"]), "error");
        assert_eq!(level(&["qpass", "-qq", "x"]), "off");
    }

    #[test]
    fn test_exit_codes() {
        let err = anyhow::Error::new(QpassError::NoMatch { query: "x".into() });
        assert_eq!(exit_code(&err), 1);
        let err = anyhow::Error::new(QpassError::DecryptionFailed("no key".into()));
        assert_eq!(exit_code(&err.context("while showing")), 2);
        assert_eq!(exit_code(&anyhow::anyhow!("bad config")), 3);
    }

    #[test]
    fn test_password_line_precedes_details() {
        let mut out = Vec::new();
        write_entry(
            &mut out,
            "some / random / password",
            Some("Password: hunter2"),
            &["user: bob", "url: https://example.com"],
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "some / random / password\n\nPassword: hunter2\nuser: bob\nurl: https://example.com\n"
        );

        let mut out = Vec::new();
        write_entry(&mut out, "bank", None, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "bank\n");
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("password"), "Password");
        assert_eq!(capitalize(""), "");
    }
}

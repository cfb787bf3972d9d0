//! RaptorKV console
//!
//! Reads commands from stdin one line at a time, runs them through the
//! command layer and prints the replies the way `redis-cli` does. EOF, `QUIT`
//! or `SHUTDOWN` saves the snapshot (when a data file is configured) and
//! exits.

use anyhow::Context as _;
use bytes::Bytes;
use clap::Parser;
use raptorkv::storage::snapshot::run_periodic_flush;
use raptorkv::storage::{ExpiryConfig, ExpirySweeper, Storage, StorageEngine};
use raptorkv::{CommandHandler, Config};
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn print_banner(config: &Config) {
    let storage = match &config.data_file {
        Some(path) => path.display().to_string(),
        None => "in-memory".to_string(),
    };
    println!(
        r#"
RaptorKV v{} - Redis-style data structures over an ordered KV engine
──────────────────────────────────────────────────────────────────────
Storage: {}
Type commands as you would in redis-cli. QUIT or Ctrl+D to exit.
"#,
        raptorkv::VERSION,
        storage
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Logs go to stderr so replies on stdout stay clean
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let interactive = std::io::stdin().is_terminal();
    if interactive {
        print_banner(&config);
    }

    let engine = match &config.data_file {
        Some(path) => Arc::new(
            StorageEngine::open(path)
                .with_context(|| format!("failed to open data file {}", path.display()))?,
        ),
        None => Arc::new(StorageEngine::new()),
    };
    let store: Arc<dyn Storage> = engine.clone();

    let sweeper = ExpirySweeper::start(
        Arc::clone(&engine),
        ExpiryConfig::with_interval(config.sweep_interval()),
    );
    let flusher = config
        .flush_interval()
        .map(|interval| tokio::spawn(run_periodic_flush(Arc::clone(&store), interval)));

    let handler = CommandHandler::with_password(Arc::clone(&store), config.requirepass.clone());

    tokio::select! {
        result = console_loop(handler, interactive) => {
            if let Err(e) = result {
                error!(error = %e, "Console error");
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    if let Some(flusher) = flusher {
        flusher.abort();
    }
    drop(sweeper);

    store.sync().context("failed to save snapshot on shutdown")?;
    info!("Shutdown complete");
    Ok(())
}

/// Reads stdin on a detached thread so a pending read never holds up
/// runtime shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Runs commands until EOF, `QUIT` or `SHUTDOWN`.
async fn console_loop(handler: CommandHandler, interactive: bool) -> anyhow::Result<()> {
    let mut session = handler.session();
    let mut lines = spawn_stdin_reader();
    let mut stdout = tokio::io::stdout();

    loop {
        if interactive {
            stdout.write_all(b"raptorkv> ").await?;
            stdout.flush().await?;
        }

        let Some(line) = lines.recv().await else {
            break;
        };

        let args = match tokenize(&line) {
            Ok(args) if args.is_empty() => continue,
            Ok(args) => args,
            Err(e) => {
                stdout.write_all(format!("(error) ERR {}\n", e).as_bytes()).await?;
                continue;
            }
        };

        if args[0].eq_ignore_ascii_case(b"quit") || args[0].eq_ignore_ascii_case(b"shutdown") {
            break;
        }

        let reply = handler.execute(&mut session, &args);
        stdout.write_all(format!("{}\n", reply).as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

/// Splits a console line into arguments. Double quotes support `\n`, `\t`,
/// `\\` and `\"` escapes; single quotes only `\'`.
fn tokenize(line: &str) -> Result<Vec<Bytes>, &'static str> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut current = String::new();
        if first == '"' || first == '\'' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    c if c == first => {
                        closed = true;
                        break;
                    }
                    '\\' if first == '"' => match chars.next() {
                        Some('n') => current.push('\n'),
                        Some('t') => current.push('\t'),
                        Some('r') => current.push('\r'),
                        Some(other) => current.push(other),
                        None => return Err("unbalanced quotes"),
                    },
                    '\\' if chars.peek() == Some(&'\'') => {
                        chars.next();
                        current.push('\'');
                    }
                    c => current.push(c),
                }
            }
            if !closed {
                return Err("unbalanced quotes");
            }
            if chars.peek().is_some_and(|c| !c.is_whitespace()) {
                return Err("closing quote must be followed by a space");
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                current.push(c);
            }
        }
        args.push(Bytes::from(current));
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(line: &str) -> Vec<String> {
        tokenize(line)
            .unwrap()
            .into_iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_tokenize_plain() {
        assert_eq!(words("  SET  k   v "), vec!["SET", "k", "v"]);
        assert!(words("   ").is_empty());
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(words(r#"SET k "hello world""#), vec!["SET", "k", "hello world"]);
        assert_eq!(words(r#"SET k "a\"b\n""#), vec!["SET", "k", "a\"b\n"]);
        assert_eq!(words(r"SET k 'it\'s'"), vec!["SET", "k", "it's"]);
        assert_eq!(words(r#"SET k """#), vec!["SET", "k", ""]);
    }

    #[test]
    fn test_tokenize_errors() {
        assert!(tokenize(r#"SET k "open"#).is_err());
        assert!(tokenize(r#"SET k "a"b"#).is_err());
    }
}

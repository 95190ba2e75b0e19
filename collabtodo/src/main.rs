//! `CollabTodo` line-oriented terminal front end.
//!
//! Reads commands from stdin and prints the task list and notifications to
//! stdout. Logs go to a file so they never interleave with the list.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/collabtodo/config.toml`).
//!
//! ```bash
//! # In-process store, no hosted backend settings needed
//! cargo run --bin collabtodo -- --offline
//!
//! # With store settings (validated before start)
//! COLLABTODO_STORE_URL=https://abcd.store.co COLLABTODO_ANON_KEY=... cargo run
//! ```

use std::path::Path;
use std::sync::Arc;

use chrono::TimeDelta;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use collabtodo::app::{App, Level, Notification};
use collabtodo::config::{CliArgs, ClientConfig, ConfigError};
use collabtodo::remote::memory::MemoryStore;
use collabtodo::tasks::Filter;
use collabtodo_proto::policy::DEFAULT_DELETE_CUTOFF;
use collabtodo_proto::task::{Priority, TaskId};

type TerminalApp = App<MemoryStore, MemoryStore>;

const HELP: &str = "\
commands:
  signup <email> <password>   create an account
  login <email> <password>    sign in
  oauth <provider>            third-party sign-in
  logout                      sign out
  add <text>                  add a task (medium priority)
  addp <low|medium|high> <text>
  done <n>                    toggle task n
  edit <n> <text>             replace the text of task n
  rm <n>                      delete task n
  mv <from> <to>              move task from one place to another
  filter <all|active|completed>
  ls | stats | reload | export | help | quit";

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            print_config_error(&e);
            std::process::exit(1);
        }
    };
    if !cli.offline {
        if let Err(e) = config.validate() {
            print_config_error(&e);
            std::process::exit(1);
        }
    }

    // Logs go to a file; stdout belongs to the task list.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    install_panic_hook();

    tracing::info!(offline = cli.offline, "collabtodo starting");

    let session_ttl = TimeDelta::from_std(config.session_timeout).unwrap_or(TimeDelta::hours(1));
    let store = Arc::new(MemoryStore::with_settings(
        DEFAULT_DELETE_CUTOFF,
        session_ttl,
        config.channel_capacity,
        config.max_task_length,
    ));
    let (mut app, mut notifications) = App::new(Arc::clone(&store), store, config);
    app.start().await;

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !run_command(&mut app, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "stdin read failed");
                    break;
                }
            },
            incoming = app.next_incoming() => {
                app.apply_incoming(incoming).await;
            }
            Some(notification) = notifications.recv() => {
                print_notification(&notification);
            }
        }
    }

    app.shutdown();
    tracing::info!("collabtodo exiting");
}

/// Runs one command line. Returns `false` to quit.
async fn run_command(app: &mut TerminalApp, line: &str) -> bool {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match cmd {
        "" => {}
        "quit" | "exit" => return false,
        "help" => println!("{HELP}"),
        "signup" | "login" => {
            let (email, password) = rest.split_once(' ').unwrap_or((rest, ""));
            if cmd == "signup" {
                app.sign_up(email, password.trim()).await;
            } else {
                app.sign_in(email, password.trim()).await;
            }
        }
        "oauth" => app.sign_in_with_oauth(rest).await,
        "logout" => app.sign_out().await,
        "add" => {
            app.add_task(rest, Priority::Medium);
        }
        "addp" => {
            let (priority, text) = rest.split_once(' ').unwrap_or((rest, ""));
            match priority.parse::<Priority>() {
                Ok(priority) => {
                    app.add_task(text, priority);
                }
                Err(e) => println!("{e}"),
            }
        }
        "done" | "rm" | "edit" => {
            let (index, text) = rest.split_once(' ').unwrap_or((rest, ""));
            let Some(id) = visible_id(app, index) else {
                println!("no task {index}");
                return true;
            };
            match cmd {
                "done" => app.toggle_task(&id),
                "rm" => app.delete_task(&id),
                _ => app.edit_task(&id, text),
            };
        }
        "mv" => {
            let mut parts = rest.split_whitespace().map(str::parse::<usize>);
            match (parts.next(), parts.next()) {
                (Some(Ok(from)), Some(Ok(to))) if from > 0 && to > 0 => {
                    app.move_task(from - 1, to - 1);
                }
                _ => println!("usage: mv <from> <to>"),
            }
        }
        "filter" => match rest.parse::<Filter>() {
            Ok(filter) => {
                app.set_filter(filter);
                print_list(app);
            }
            Err(e) => println!("{e}"),
        },
        "ls" => print_list(app),
        "stats" => {
            let stats = app.stats();
            println!(
                "total {}  completed {}  pending {}",
                stats.total, stats.completed, stats.pending
            );
        }
        "reload" => app.reload().await,
        "export" => match serde_json::to_string_pretty(app.tasks()) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::error!(error = %e, "export failed"),
        },
        other => println!("unknown command: {other} (try help)"),
    }
    true
}

fn visible_id(app: &TerminalApp, index: &str) -> Option<TaskId> {
    let n = index.parse::<usize>().ok()?.checked_sub(1)?;
    app.visible().get(n).map(|t| t.id.clone())
}

fn print_list(app: &TerminalApp) {
    let Some(session) = app.session() else {
        println!("(signed out)");
        return;
    };
    println!("{} [{}]", session.user.email, app.filter());
    for (i, task) in app.visible().iter().enumerate() {
        let mark = if task.completed { "x" } else { " " };
        let saving = if task.id.is_provisional() { " (saving)" } else { "" };
        println!("{:>3}. [{mark}] {} ({}){saving}", i + 1, task.text, task.priority);
    }
}

fn print_notification(notification: &Notification) {
    let tag = match notification.level {
        Level::Success => "ok",
        Level::Info => "info",
        Level::Warning => "warn",
        Level::Error => "error",
    };
    println!("[{tag}] {}", notification.message);
}

/// Shown instead of starting when the configuration is unusable.
fn print_config_error(err: &ConfigError) {
    eprintln!("CollabTodo cannot start: configuration error");
    eprintln!();
    match err {
        ConfigError::Invalid { problems } => {
            for problem in problems {
                eprintln!("  - {problem}");
            }
        }
        other => eprintln!("  - {other}"),
    }
    eprintln!();
    eprintln!(
        "Set COLLABTODO_STORE_URL and COLLABTODO_ANON_KEY, edit \
         ~/.config/collabtodo/config.toml, or run with --offline."
    );
}

/// Logs the panic and shows a generic message instead of a backtrace.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "unhandled panic");
        eprintln!("An unexpected error occurred");
    }));
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("collabtodo.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

//! Parley terminal chat client

mod args;

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;
use parley_common::validators;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use args::Args;
use parley_client::auth;
use parley_client::constants::{DEBUG_LOG_FILTER, DEFAULT_LOG_FILTER, LOG_FILE_PREFIX};
use parley_client::session::{Action, ChatSession};
use parley_client::store::{self, ConversationStore};
use parley_client::transport::{Transport, TransportError, reconnect_unless_closed};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = validators::validate_username(&args.username) {
        fail(&format!("invalid username: {:?}", e));
    }

    let db_path = match args.database.clone() {
        Some(path) => path,
        None => store::default_database_path().unwrap_or_else(|e| fail(&e.to_string())),
    };
    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| db_path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let log_guard = init_logging(args.debug, &log_dir, &args.username);
    info!(version = env!("CARGO_PKG_VERSION"), username = %args.username, "starting parley");

    let token = match args.token.clone() {
        Some(token) => token,
        None => {
            let result = if args.signup {
                auth::signup(&args.server, &args.username, &args.password).await
            } else {
                auth::login(&args.server, &args.username, &args.password).await
            };
            result.unwrap_or_else(|e| {
                error!(error = %e, "authentication failed");
                fail(&format!("authentication failed: {}", e))
            })
        }
    };

    let pool = store::init_db(&db_path).await.unwrap_or_else(|e| {
        error!(path = %db_path.display(), error = %e, "failed to open database");
        fail(&format!("failed to open {}: {}", db_path.display(), e))
    });
    let store = ConversationStore::new(pool.clone());

    let conversations = match store.get_conversations(&args.username, &args.password).await {
        Ok(conversations) => conversations,
        Err(e) if e.is_decryption_failure() => {
            fail("could not unlock local history: wrong password or damaged record")
        }
        Err(e) => {
            error!(error = %e, "failed to load conversations");
            fail(&format!("failed to load conversations: {}", e))
        }
    };
    info!(count = conversations.len(), "loaded conversations");

    let (transport, mut inbound) = match Transport::connect(&args.server, &token).await {
        Ok(connected) => connected,
        Err(e) => {
            error!(server = %args.server, error = %e, "failed to connect");
            fail(&format!("failed to connect to {}: {}", args.server, e))
        }
    };

    let (cancel_tx, mut cancel) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let mut session = ChatSession::new(args.username.clone(), conversations);
    print_lines(&[format!(
        "* connected to {} as {} ({} conversations, /help for commands)",
        transport.uri(),
        session.username(),
        session.conversations().len()
    )]);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                };

                let outcome = session.handle_input(&line);
                print_lines(&outcome.lines);
                match outcome.action {
                    Action::None => {}
                    Action::Quit => break,
                    Action::Send { message, metadata, recipients } => {
                        if let Err(e) = transport.send_chat_message(message, metadata, recipients).await {
                            warn!(error = %e, "send failed");
                            print_lines(&[format!("! not delivered: {}", e)]);
                        }
                    }
                }
            }
            next = inbound.next(&mut cancel) => match next {
                Ok(envelope) => print_lines(&session.handle_envelope(envelope)),
                Err(TransportError::Cancelled) => break,
                Err(e) if reconnect_unless_closed(&e) => {
                    print_lines(&[format!("* connection lost ({}), reconnecting", e)]);
                    if let Err(e) = transport.reconnect().await {
                        error!(error = %e, "reconnect failed");
                        print_lines(&[format!("! {}", e)]);
                        break;
                    }
                    print_lines(&["* reconnected".to_string()]);
                }
                Err(e) => {
                    print_lines(&[format!("* disconnected: {}", e)]);
                    break;
                }
            },
        }
    }

    if let Err(e) = transport.close().await {
        warn!(error = %e, "close failed");
    }

    let conversations = session.into_conversations();
    match store
        .update_conversations(&args.username, &args.password, &conversations)
        .await
    {
        Ok(()) => info!(count = conversations.len(), "saved conversations"),
        Err(e) => {
            error!(error = %e, "failed to save conversations");
            eprintln!("failed to save conversations: {}", e);
        }
    }
    pool.close().await;

    // The stdin reader thread blocks until the next line; exit without waiting for it
    drop(log_guard);
    std::process::exit(0);
}

/// Log to `client_<username>.log`; stdout belongs to the chat
///
/// `RUST_LOG` wins over the built-in default filter.
fn init_logging(debug: bool, log_dir: &Path, username: &str) -> WorkerGuard {
    let default = if debug {
        DEBUG_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(format!("{}{}", LOG_FILE_PREFIX, username))
        .filename_suffix("log")
        .build(log_dir)
        .unwrap_or_else(|e| fail(&format!("cannot open log file in {}: {}", log_dir.display(), e)));
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    guard
}

fn print_lines(lines: &[String]) {
    let mut stdout = std::io::stdout().lock();
    for line in lines {
        let _ = writeln!(stdout, "{}", line);
    }
    let _ = stdout.flush();
}

fn fail(message: &str) -> ! {
    eprintln!("parley: {}", message);
    std::process::exit(1);
}

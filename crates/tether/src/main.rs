// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use tether::broadcast::TracingNavigator;
use tether::config::SessionConfig;
use tether::storage::FileStore;
use tether::types::{RegisterRequest, ResetPasswordRequest, Theme};
use tether::{Session, SessionEvent};

/// Command-line client for a token-authenticated API.
#[derive(Debug, Parser)]
#[command(name = "tether", version)]
struct Cli {
    #[command(flatten)]
    session: SessionConfig,

    /// Log format (json or text).
    #[arg(long, env = "TETHER_LOG_FORMAT", default_value = "text", global = true)]
    log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TETHER_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and store the token pair.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TETHER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Log out and discard the stored tokens.
    Logout,
    /// Show the stored session state.
    Status,
    /// Fetch the current user.
    Me,
    /// GET an arbitrary API path through the authenticated pipeline.
    Get { path: String },
    /// Create an account.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long, env = "TETHER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Request a password reset email.
    ForgotPassword {
        #[arg(long)]
        email: String,
    },
    /// Set a new password with a reset token.
    ResetPassword {
        #[arg(long)]
        token: String,
        #[arg(long, env = "TETHER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Confirm an email address with a verification token.
    VerifyEmail {
        #[arg(long)]
        token: String,
    },
    /// Set the color scheme preference.
    Theme {
        #[arg(value_enum)]
        theme: Theme,
    },
    /// Set the language preference.
    Language { language: String },
    /// Remove the current avatar.
    DeleteAvatar,
    /// Delete the account and end the local session.
    DeleteAccount {
        #[arg(long, env = "TETHER_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.session.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = Arc::new(FileStore::open(cli.session.session_file()));
    info!(path = %store.path().display(), "session file");
    let navigator = Arc::new(TracingNavigator::new("/"));
    let session = Session::new(&cli.session, store, navigator);

    let mut events = session.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Logout { reason, message }) => {
                    warn!(reason = reason.as_str(), "{message}");
                }
                Ok(SessionEvent::Forbidden { message }) => warn!("{message}"),
                Ok(SessionEvent::ServerError { status, message }) => {
                    warn!(status, "{message}");
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "session event subscriber lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    match cli.command {
        Command::Login { email, password } => {
            let resp = session.login(&email, &password).await?;
            print_json(&resp.user)?;
        }
        Command::Logout => {
            session.logout().await?;
        }
        Command::Status => {
            let authenticated = session.is_authenticated();
            let record = session.token_record();
            print_json(&json!({
                "authenticated": authenticated,
                "accessTokenExpired": session.is_access_token_expired(),
                "shouldRefresh": session.should_refresh_token(),
                "accessTokenExpiry": record.as_ref().map(|r| r.access_token_expiry),
                "refreshTokenExpiry": record.as_ref().map(|r| r.refresh_token_expiry),
            }))?;
        }
        Command::Me => {
            print_json(&session.current_user().await?)?;
        }
        Command::Get { path } => {
            let resp = session.api().send(tether::pipeline::ApiRequest::get(path)).await?;
            match serde_json::from_slice::<serde_json::Value>(resp.body()) {
                Ok(value) => print_json(&value)?,
                Err(_) => println!("{}", String::from_utf8_lossy(resp.body())),
            }
        }
        Command::Register { email, name, password } => {
            let req = RegisterRequest {
                email,
                name,
                confirm_password: Some(password.clone()),
                password,
            };
            print_json(&session.register(&req).await?)?;
        }
        Command::ForgotPassword { email } => {
            session.forgot_password(&email).await?;
        }
        Command::ResetPassword { token, password } => {
            let req = ResetPasswordRequest { token, confirm_password: password.clone(), password };
            session.reset_password(&req).await?;
        }
        Command::VerifyEmail { token } => {
            session.verify_email(&token).await?;
        }
        Command::Theme { theme } => {
            print_json(&session.update_theme(theme).await?)?;
        }
        Command::Language { language } => {
            print_json(&session.update_language(&language).await?)?;
        }
        Command::DeleteAvatar => {
            print_json(&session.delete_avatar().await?.user)?;
        }
        Command::DeleteAccount { password } => {
            session.delete_account(&password).await?;
            session.logout().await?;
        }
    }

    // Let a scheduled login redirect land before the process exits.
    tokio::time::sleep(cli.session.redirect_delay()).await;
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

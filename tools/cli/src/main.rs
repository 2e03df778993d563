//! NutriVault CLI - Command line interface for the record service.
//!
//! Loads the store configuration, reads the field key, validates it against
//! stored data, and runs one operation. Responses are printed as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use nutrivault_records::{
    CoreConfig, CoreContext, DeleteHistoryRequest, Gateway, LoginRequest, RegisterRequest,
    Response, UpdateDobRequest, UpdateHealthIssuesRequest, CONFIG_FILENAME, KEY_ENV,
};
use nutrivault_common::UserId;
use nutrivault_storage::create_default_registry;

#[derive(Parser)]
#[command(name = "nutrivault")]
#[command(about = "NutriVault - Encrypted health profile and scan history store")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: ./nutrivault.json, falling back to a
    /// file store under ./data).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the key against stored data and exit.
    CheckKey,

    /// Register a new user.
    Register {
        #[arg(short = 'n', long)]
        full_name: String,

        #[arg(short, long)]
        email: String,

        /// Health issue; repeat for several.
        #[arg(long = "issue")]
        health_issues: Vec<String>,

        /// Date of birth (YYYY-MM-DD).
        #[arg(short, long)]
        dob: Option<String>,
    },

    /// Log in and print the decrypted profile.
    Login {
        #[arg(short, long)]
        email: String,
    },

    /// Replace a user's health issues.
    UpdateHealth {
        #[arg(short, long)]
        user: u64,

        /// Health issue; repeat for several, omit to clear.
        #[arg(long = "issue")]
        health_issues: Vec<String>,
    },

    /// Set or clear a user's date of birth.
    UpdateDob {
        #[arg(short, long)]
        user: u64,

        /// Date of birth (YYYY-MM-DD); omit to clear.
        #[arg(short, long)]
        dob: Option<String>,
    },

    /// List a user's scan history.
    History {
        #[arg(short, long)]
        user: u64,
    },

    /// Delete one history entry by its position in the user's list.
    DeleteHistory {
        #[arg(short, long)]
        user: u64,

        /// Zero-based position.
        #[arg(short, long, allow_negative_numbers = true)]
        index: i64,
    },

    /// Record an analysis result in a user's history.
    RecordAnalysis {
        #[arg(short, long)]
        user: u64,

        /// Label text that was analyzed.
        #[arg(short, long)]
        input: String,

        /// Analysis narrative.
        #[arg(short, long)]
        analysis: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;
    let key = read_key()?;

    let ctx = CoreContext::from_config(&config, &create_default_registry(), &key)
        .await
        .context("Failed to start: key or store rejected")?;
    let gateway = Gateway::new(&ctx);

    match cli.command {
        Commands::CheckKey => {
            println!("Key OK ({} backend)", ctx.store().name());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Register {
            full_name,
            email,
            health_issues,
            dob,
        } => {
            let password = prompt_password("Choose password: ")?;
            let request = RegisterRequest {
                full_name,
                email,
                password: password.to_string(),
                health_issues,
                dob,
            };
            print_response(&gateway.register(request).await)
        }

        Commands::Login { email } => {
            let password = prompt_password("Password: ")?;
            let request = LoginRequest {
                email,
                password: password.to_string(),
            };
            print_response(&gateway.login(request).await)
        }

        Commands::UpdateHealth {
            user,
            health_issues,
        } => {
            let request = UpdateHealthIssuesRequest {
                user_id: Some(user),
                health_issues: Some(health_issues),
            };
            print_response(&gateway.update_health_issues(request).await)
        }

        Commands::UpdateDob { user, dob } => {
            let request = UpdateDobRequest {
                user_id: Some(user),
                dob,
            };
            print_response(&gateway.update_dob(request).await)
        }

        Commands::History { user } => print_response(&gateway.history(Some(user)).await),

        Commands::DeleteHistory { user, index } => {
            let request = DeleteHistoryRequest {
                user_id: Some(user),
                index: Some(index),
            };
            print_response(&gateway.delete_history(request).await)
        }

        Commands::RecordAnalysis {
            user,
            input,
            analysis,
        } => {
            let user_id = UserId::new(user).context("Invalid user id")?;
            let response = match ctx.history().record_analysis(user_id, &input, &analysis).await {
                Ok(()) => Response::ok(()),
                Err(e) => Response::fail(&e),
            };
            print_response(&response)
        }
    }
}

/// Load configuration from `path`, or from the default file if present.
fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    match path {
        Some(path) => CoreConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None if Path::new(CONFIG_FILENAME).exists() => {
            CoreConfig::load(CONFIG_FILENAME).context("Failed to load default config")
        }
        None => {
            debug!("No config file; using default file store");
            Ok(CoreConfig::default())
        }
    }
}

/// Read the field key from the environment, or prompt for it.
fn read_key() -> Result<Zeroizing<Vec<u8>>> {
    if let Ok(key) = std::env::var(KEY_ENV) {
        info!("Using key from {}", KEY_ENV);
        return Ok(Zeroizing::new(key.into_bytes()));
    }
    let key = prompt_password("Enter key (16 bytes): ")?;
    Ok(Zeroizing::new(key.as_bytes().to_vec()))
}

/// Prompt for a secret without echo.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let secret = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(secret))
}

/// Print a response as JSON; failures exit non-zero.
fn print_response<T: Serialize>(response: &Response<T>) -> Result<ExitCode> {
    let json = serde_json::to_string_pretty(response).context("Failed to encode response")?;
    println!("{}", json);
    Ok(if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

mod commands;
mod render;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hydrate_core::Hydrate;
use hydrate_core::config::HydrateConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hydrate")]
#[command(about = "Log hydration offline and sync it with the hydrate cloud")]
struct Cli {
    /// Show debug logs on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show who is signed in and what is stored locally
    Status,
    /// Keep using hydrate without an account
    Guest,
    /// Create an account
    Signup { email: String },
    /// Sign in to an existing account
    Login { email: String },
    /// Sign out and remove this account's local data
    Logout,
    /// Log a glass of water
    Log {
        /// poor, fair, good or great
        #[arg(short, long, default_value = "fair")]
        quality: String,

        #[arg(short, long)]
        note: Option<String>,

        /// When it happened (e.g., "2025-03-20T15:00"), defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// List logged events
    Events {
        /// Show at most this many, newest first
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Print as JSON, one event per line
        #[arg(long)]
        json: bool,
    },
    /// Delete an event by id (or unique id prefix)
    Delete { id: String },
    /// Show stats
    Stats {
        /// week, month, all or custom
        #[arg(short, long)]
        period: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Only this section (overview, trend, hourly, distribution, weekly, insights)
        #[arg(short, long)]
        section: Option<String>,
    },
    /// Push local events and pull the account's events
    Sync,
    /// Quick-add queue shared with companion apps
    Intake {
        #[command(subcommand)]
        action: IntakeAction,
    },
}

#[derive(Subcommand)]
enum IntakeAction {
    /// Queue a quick add without opening the store
    Add {
        #[arg(short, long, default_value = "fair")]
        quality: String,

        #[arg(short, long)]
        note: Option<String>,
    },
    /// Ingest every queued quick add now
    Drain,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "hydrate_cli=debug,hydrate_core=debug"
    } else {
        "hydrate_cli=warn,hydrate_core=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = HydrateConfig::load().context("Failed to load config")?;
    if config.time_zone.is_none() {
        config.time_zone = iana_time_zone::get_timezone().ok();
    }

    // Queuing must not drain the queue it writes to.
    if let Commands::Intake {
        action: IntakeAction::Add { quality, note },
    } = &cli.command
    {
        return commands::intake::add(&config, quality, note.clone());
    }

    let app = Hydrate::open(config).context("Failed to open local data")?;
    app.start().await.context("Failed to restore session")?;

    // A link left pending by an earlier run must be decided before anything
    // reads or writes events as the account.
    let deciding = !matches!(
        cli.command,
        Commands::Status | Commands::Logout | Commands::Login { .. } | Commands::Signup { .. }
    );
    if deciding && let Some(link) = app.identity.pending_link() {
        commands::auth::decide_link(&app, &link).await?;
    }

    match cli.command {
        Commands::Status => commands::status::run(&app).await,
        Commands::Guest => commands::auth::guest(&app).await,
        Commands::Signup { email } => commands::auth::signup(&app, email).await,
        Commands::Login { email } => commands::auth::login(&app, email).await,
        Commands::Logout => commands::auth::logout(&app).await,
        Commands::Log { quality, note, at } => {
            commands::events::log(&app, &quality, note, at.as_deref()).await
        }
        Commands::Events { limit, json } => commands::events::list(&app, limit, json).await,
        Commands::Delete { id } => commands::events::delete(&app, &id).await,
        Commands::Stats {
            period,
            from,
            to,
            section,
        } => {
            commands::stats::run(
                &app,
                period.as_deref(),
                from.as_deref(),
                to.as_deref(),
                section.as_deref(),
            )
            .await
        }
        Commands::Sync => commands::sync::run(&app).await,
        Commands::Intake { action } => match action {
            IntakeAction::Drain => commands::intake::drain(&app).await,
            IntakeAction::Add { .. } => Ok(()),
        },
    }
}

mod bot;
mod config;
mod db;
mod domain;
mod export;
mod import_utils;
mod middleware;
mod state;
mod time_utils;
mod token;
mod web;

use crate::config::Config;
use crate::domain::prizes::PrizePool;
use crate::middleware::AttemptLimiter;
use anyhow::{bail, Context};
use axum::Router;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BILL_ATTEMPTS: usize = 5;
const BILL_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Restaurant feedback bot with a prize wheel.
#[derive(Parser)]
#[command(name = "feedback-bot")]
#[command(about = "Guest feedback bot for Telegram", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server and the background jobs (default).
    Serve,

    /// Print the signed deep link for a visit.
    #[command(name = "sign-visit")]
    SignVisit {
        /// Table or bill identifier, no underscores or spaces
        visit_id: String,
    },

    /// Import till bills as delayed survey invitations.
    ///
    /// Expects a CSV with a `chat_id,bill_id,visited_at` header.
    #[command(name = "import-visits")]
    ImportVisits {
        /// Path to the CSV file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::SignVisit { visit_id } => sign_visit(&config, &visit_id),
        Commands::ImportVisits { path } => import_visits(&config, &path).await,
    }
}

fn sign_visit(config: &Config, visit_id: &str) -> anyhow::Result<()> {
    let visit_id = visit_id.trim();
    if visit_id.is_empty() || visit_id.contains(|c: char| c == '_' || c.is_whitespace()) {
        bail!("visit id must be non-empty and contain no underscores or spaces");
    }
    println!(
        "{}",
        token::deep_link(&config.bot_username, visit_id, &config.secret_key)?
    );
    Ok(())
}

async fn import_visits(config: &Config, path: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let records = import_utils::parse_bills(&raw)?;

    let pool = db::connect(&config.database_url).await?;
    db::migrate(&pool).await?;
    let imported = import_utils::import_bills(
        &pool,
        &records,
        config.survey_delay_minutes,
        time_utils::now(),
    )
    .await?;
    println!("Imported {imported} bills");
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let bot_token = config.require_server_settings()?.to_string();

    tracing::info!("Connecting to database...");
    let pool = db::connect(&config.database_url).await.map_err(|e| {
        tracing::error!("Failed to connect to database: {}", e);
        e
    })?;
    tracing::info!("Running database migrations...");
    db::migrate(&pool).await.map_err(|e| {
        tracing::error!("Failed to run database migrations: {}", e);
        e
    })?;
    tracing::info!("Database ready");

    let prizes = match &config.prizes_file {
        Some(path) => PrizePool::from_json_file(path).with_context(|| format!("loading {path}"))?,
        None => PrizePool::default_pool(),
    };
    tracing::info!("Prize pool:\n{}", prizes.describe());

    if !config.alerts_enabled() {
        tracing::warn!("MANAGERS_CHAT_ID not set, staff alerts are disabled");
    }

    let addr = config.bind_addr.clone();
    let shared: state::SharedState = Arc::new(state::AppState {
        pool,
        config: Arc::new(config),
        prizes: Arc::new(prizes),
        bill_limiter: AttemptLimiter::new(BILL_ATTEMPTS, BILL_WINDOW),
        bot: teloxide::Bot::new(bot_token),
    });

    let _scheduler = bot::jobs::start_scheduler(shared.clone()).await?;

    let app = Router::new()
        .merge(web::routes(shared))
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

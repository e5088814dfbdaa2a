//! `discord-relay` CLI entry point.
//!
//! Provides `send`, `edit`, `show`, and `health` subcommands on top of the
//! library's [`MessageRelay`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use discord_relay::config::Config;
use discord_relay::content::{Embed, RenderedContent};
use discord_relay::credentials::load_default_credentials;
use discord_relay::logging::{self, LoggingGuard};
use discord_relay::publisher::discord::DiscordPublisher;
use discord_relay::relay::MessageRelay;
use discord_relay::store::sqlite::SqliteMessageStore;
use discord_relay::store::{MessageId, RequestToken};

/// Discord relay: idempotent message writes with background publishing.
#[derive(Parser)]
#[command(name = "discord-relay", version, about)]
struct Cli {
    /// Path to `config.toml` (overrides `$RELAY_CONFIG_PATH`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Create a message and publish it.
    Send {
        /// Idempotency token for this submission.
        #[arg(long)]
        token: String,
        /// Message text.
        #[arg(long, default_value = "")]
        text: String,
        /// Embeds as a JSON array.
        #[arg(long)]
        embeds: Option<String>,
    },
    /// Append a new version to a message and publish it.
    Edit {
        /// Message id returned by `send`.
        #[arg(long)]
        id: String,
        /// Idempotency token for this submission.
        #[arg(long)]
        token: String,
        /// Message text.
        #[arg(long, default_value = "")]
        text: String,
        /// Embeds as a JSON array.
        #[arg(long)]
        embeds: Option<String>,
    },
    /// Print a message and its version history as JSON.
    Show {
        /// Message id.
        #[arg(long)]
        id: String,
    },
    /// Start the scheduler and print its health report.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let config = &loaded.config;
    config.validate().context("invalid configuration")?;
    let _logging_guard = init_logging(config)?;
    loaded.log();

    match cli.command {
        Command::Send {
            token,
            text,
            embeds,
        } => handle_send(config, token, text, embeds).await,
        Command::Edit {
            id,
            token,
            text,
            embeds,
        } => handle_edit(config, id, token, text, embeds).await,
        Command::Show { id } => handle_show(config, id).await,
        Command::Health => handle_health(config).await,
    }
}

fn init_logging(config: &Config) -> anyhow::Result<Option<LoggingGuard>> {
    match &config.logging.logs_dir {
        Some(dir) => Ok(Some(logging::init_production(dir, &config.logging.level)?)),
        None => {
            logging::init_cli(&config.logging.level);
            Ok(None)
        }
    }
}

fn parse_content(text: String, embeds: Option<String>) -> anyhow::Result<RenderedContent> {
    let embeds: Vec<Embed> = match embeds {
        Some(raw) => serde_json::from_str(&raw).context("--embeds must be a JSON array of embeds")?,
        None => Vec::new(),
    };
    Ok(RenderedContent::text(text).with_embeds(embeds))
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteMessageStore>> {
    let path = config.database_path()?;
    let store = SqliteMessageStore::open(&path, config.database.busy_timeout()).await?;
    Ok(Arc::new(store))
}

async fn build_relay(config: &Config) -> anyhow::Result<MessageRelay> {
    let store = open_store(config).await?;

    let credentials = load_default_credentials().context("failed to load credentials")?;
    let bot_token = credentials.require(&config.discord.bot_token_env)?;
    let publisher = DiscordPublisher::new(config.discord.client_config(bot_token)?)
        .context("failed to build Discord client")?;

    Ok(MessageRelay::new(
        store,
        Arc::new(publisher),
        config.queue.scheduler_config(),
    ))
}

async fn handle_send(
    config: &Config,
    token: String,
    text: String,
    embeds: Option<String>,
) -> anyhow::Result<()> {
    let content = parse_content(text, embeds)?;
    let relay = build_relay(config).await?;

    let result = relay.create(&RequestToken::new(token), &content).await;
    relay.wait_idle().await;
    let id = result.context("send failed")?;

    report_publish_state(&relay, &id).await?;
    relay.shutdown().await;
    Ok(())
}

async fn handle_edit(
    config: &Config,
    id: String,
    token: String,
    text: String,
    embeds: Option<String>,
) -> anyhow::Result<()> {
    let content = parse_content(text, embeds)?;
    let relay = build_relay(config).await?;
    let id = MessageId::from(id);

    let result = relay
        .append_version(&id, &RequestToken::new(token), &content)
        .await;
    relay.wait_idle().await;
    result.context("edit failed")?;

    report_publish_state(&relay, &id).await?;
    relay.shutdown().await;
    Ok(())
}

async fn report_publish_state(relay: &MessageRelay, id: &MessageId) -> anyhow::Result<()> {
    let message = relay
        .get(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("message {id} disappeared"))?;

    println!("message_id: {}", message.id);
    match &message.remote_id {
        Some(remote_id) => println!("remote_id:  {remote_id}"),
        None => println!("remote_id:  (not published)"),
    }
    if !message.is_up_to_date() {
        println!("warning: latest version has not been published; see logs");
    }
    Ok(())
}

async fn handle_show(config: &Config, id: String) -> anyhow::Result<()> {
    use discord_relay::store::MessageStore;

    let store = open_store(config).await?;
    let id = MessageId::from(id);
    let message = store
        .get_by_id(&id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("message not found: {id}"))?;

    println!("{}", serde_json::to_string_pretty(&message)?);
    Ok(())
}

async fn handle_health(config: &Config) -> anyhow::Result<()> {
    let relay = build_relay(config).await?;
    if !relay.readiness().wait_ready().await {
        anyhow::bail!("publish scheduler failed to start");
    }

    let report = relay.health();
    info!(status = ?report.status, outstanding = report.outstanding, "health checked");
    println!("{}", serde_json::to_string_pretty(&report)?);

    relay.shutdown().await;
    Ok(())
}

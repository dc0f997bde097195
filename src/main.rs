// This is the entry point of the leveling bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases, config files)
// - `discord/` = Discord-specific adapters (commands, events, role changes)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Start the maintenance loop

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::leveling::{JobOutcome, LevelingService, MaintenanceJobs};
use crate::discord::leveling::message_events::handle_message;
use crate::discord::leveling::SerenityRoleGateway;
use crate::discord::{Data, Error};
use crate::infra::leveling::config_loader::DEFAULT_CONFIG_PATH;
use crate::infra::leveling::{load_config, SqliteLevelingStore};
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_DATABASE_PATH: &str = "data/leveling.db";
const MAINTENANCE_TICK: Duration = Duration::from_secs(10 * 60);

/// Event handler for non-command Discord events.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        handle_message(ctx, new_message, data).await;
    }
    Ok(())
}

/// Both jobs guard themselves, so a slow pass simply makes the next tick skip.
fn spawn_maintenance(jobs: Arc<MaintenanceJobs<SqliteLevelingStore>>, http: Arc<serenity::Http>) {
    tokio::spawn(async move {
        let gateway = SerenityRoleGateway::new(http);
        let mut ticker = tokio::time::interval(MAINTENANCE_TICK);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();

            match jobs.run_reconciliation(now).await {
                Ok(JobOutcome::Ran(repaired)) => {
                    tracing::debug!(repaired, "Reconciliation tick finished")
                }
                Ok(JobOutcome::Skipped(reason)) => {
                    tracing::debug!(?reason, "Reconciliation skipped")
                }
                Err(e) => tracing::error!("Reconciliation failed: {e}"),
            }

            match jobs.run_season_rollover(&gateway, now).await {
                Ok(JobOutcome::Ran(synced)) => tracing::info!(synced, "Season rolled over"),
                Ok(JobOutcome::Skipped(_)) => {}
                Err(e) => tracing::error!("Season rollover failed: {e}"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let token = std::env::var("DISCORD_TOKEN").context(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    )?;
    let config_path =
        std::env::var("LEVELING_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let database_path =
        std::env::var("LEVELING_DB").unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string());

    // ========================================================================
    // SERVICES
    // ========================================================================

    let config = load_config(&config_path).await?;
    let store = SqliteLevelingStore::new(&database_path).await?;
    let leveling = Arc::new(LevelingService::new(store, config));
    let maintenance = Arc::new(MaintenanceJobs::new(Arc::clone(&leveling)));
    tracing::info!(
        max_level = leveling.level_curve().max_level(),
        config = %config_path,
        "Leveling service initialized"
    );

    let data = Data {
        leveling,
        maintenance,
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: discord::commands::all(),
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            on_error: |error| {
                Box::pin(async move {
                    if let Err(e) = poise::builtins::on_error(error).await {
                        tracing::error!("Error while handling error: {}", e);
                    }
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up...");

                // Register slash commands globally (can take up to an hour to propagate)
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered");

                spawn_maintenance(Arc::clone(&data.maintenance), ctx.http.clone());

                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    client.start().await.context("Error running bot")?;
    Ok(())
}

use guild_warden::moderation::{
    CommandRegistry, DiscordEntityResolver, DiscordPunishmentApplier, GuildModerationStore,
    YamlSettingsStore,
};
use guild_warden::{BOT_NAME, BotConfig, CONSOLE_TARGET, Data, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity, GatewayIntents, Http};
use std::sync::Arc;
use tracing::{error, info};

async fn async_main() -> Result<(), Error> {
    let config = BotConfig::from_env()?;
    logging::init(&config.log_dir)?;
    info!(target: CONSOLE_TARGET, config = ?config, "Configuration loaded");

    let http = Arc::new(Http::new(&config.discord_token));
    let store = Arc::new(GuildModerationStore::new(
        CommandRegistry::new(commands::COMMANDS),
        Arc::new(DiscordPunishmentApplier::new(Arc::clone(&http))),
        Arc::new(DiscordEntityResolver::new(Arc::clone(&http))),
        Arc::new(YamlSettingsStore::new(config.data_dir.clone())),
    ));

    let data = Data::new(Arc::clone(&store), config.clone());

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::commands(),
            command_check: Some(|ctx| Box::pin(commands::gate_check(ctx))),
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| Box::pin(commands::on_error(error)),
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands globally");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .event_handler(handlers::Handler::new(Arc::clone(&store)))
        .framework(framework)
        .await?;

    let shard_manager = Arc::clone(&client.shard_manager);
    let shutdown_store = Arc::clone(&store);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target: CONSOLE_TARGET, error = %err, "Could not listen for shutdown signal");
            return;
        }
        info!(target: CONSOLE_TARGET, "Shutting down");
        // Pending reversals are in memory only and are dropped here
        for guild_id in shutdown_store.attached_guilds() {
            shutdown_store.detach(guild_id);
        }
        shard_manager.shutdown_all().await;
    });

    info!(target: CONSOLE_TARGET, bot = BOT_NAME, "Starting bot...");
    client.start().await?;
    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: could not start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

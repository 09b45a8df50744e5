use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info, warn};

mod bot;

use airhorn_dispatch::{
    audio::{
        collections, pipeline::ProcessLauncher, songbird_bridge::SongbirdConnector, DispatchRegistry,
        SourceResolver,
    },
    config::Config,
};

use crate::bot::{status::PresenceStatus, AirhornBot};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("airhorn_dispatch=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎺 Iniciando Airhorn Dispatch v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    let collections = collections::load_builtin(&config.audio_dir).await;

    let manager = Songbird::serenity();
    let status = Arc::new(PresenceStatus::default());
    let resolver = SourceResolver::new(
        Arc::new(ProcessLauncher::new(config.pipe_buffer_size)),
        config.stage_programs(),
        &config.audio_dir,
        config.pipe_buffer_size,
    );
    let registry = DispatchRegistry::new(
        config.dispatch_settings(),
        resolver,
        Arc::new(SongbirdConnector::new(manager.clone())),
        status.clone(),
        config.rng(),
    );

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = AirhornBot::new(&config, collections, registry, status);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(manager)
        .await?;

    // Manejar shutdown graceful
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("⚠️ No se pudo registrar Ctrl+C: {}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        std::process::exit(0);
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

/// Verifies that every external stage can be launched.
async fn health_check(config: &Config) -> Result<()> {
    let programs = config.stage_programs();
    let checks = [
        (&programs.fetch, "--version"),
        (&programs.transcode, "-version"),
        (&programs.encode, "-h"),
    ];

    let mut missing = Vec::new();
    for (program, arg) in checks {
        match async_process::Command::new(program).arg(arg).output().await {
            Ok(_) => info!("✅ {} disponible", program),
            Err(e) => {
                error!("❌ {} no se puede ejecutar: {}", program, e);
                missing.push(program.as_str());
            }
        }
    }

    if missing.is_empty() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes: {}", missing.join(", "));
    }
}

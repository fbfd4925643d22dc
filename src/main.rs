use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info};

use otoha::{
    audio::{source::HttpDecoder, PlaybackEngine},
    bot::Handler,
    config::Config,
    sources::{
        allow_list::AllowList,
        ytdlp::{self, YtDlpBackend},
        ResolverClient,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("otoha=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Otoha v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("⚙️ Configuración:\n{}", config.summary());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    // Resolución: allow-list + yt-dlp
    let allow_list = AllowList::new(config.allowed_domains.clone(), config.allow_list_cache_size);
    let backend = Arc::new(YtDlpBackend::new(&config));
    let resolver = Arc::new(ResolverClient::new(allow_list, backend));

    // Motor de reproducción
    let decoder = Arc::new(HttpDecoder::new(config.source_open_timeout())?);
    let engine: Arc<PlaybackEngine<_>> = Arc::new(PlaybackEngine::new(&config, resolver.clone(), decoder));

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let handler = Handler::new(Arc::clone(&config), Arc::clone(&engine), resolver);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Error al registrar Ctrl+C");
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        engine.shutdown_all().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    let version = ytdlp::verify_available(&config.ytdlp_path).await?;
    println!("OK (yt-dlp {})", version);
    Ok(())
}

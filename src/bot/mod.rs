//! # Bot Module
//!
//! Thin Discord front-end over the playback engine.
//!
//! - Slash command registration (`/play`, `/skip`, `/loop`, `/shuffle`, `/queue`, `/now`)
//! - Persistent player buttons sharing the same actions
//! - Voice state tracking: the guild is deactivated when the bot is left alone
//!   or is disconnected
//!
//! All user-facing text lives here and in [`crate::ui`]; the engine only
//! returns typed outcomes.

use anyhow::Result;
use serenity::{
    all::{ActivityData, ChannelId, Context, EventHandler, GuildId, Interaction, Ready, UserId, VoiceState},
    async_trait,
};
use serenity::http::Http;
use songbird::input::Input;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod cooldown;
pub mod handlers;

use crate::{
    audio::{EngineEvent, PlaybackEngine},
    config::Config,
    sources::ResolverClient,
};
use cooldown::Cooldowns;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(600);

/// Event handler de serenity que traduce interacciones a operaciones del engine
pub struct Handler {
    config: Arc<Config>,
    engine: Arc<PlaybackEngine<Input>>,
    /// Para validar URLs antes de hacer esperar al usuario
    resolver: Arc<ResolverClient>,
    cooldowns: Arc<Cooldowns>,
    maintenance_started: AtomicBool,
}

impl Handler {
    pub fn new(config: Arc<Config>, engine: Arc<PlaybackEngine<Input>>, resolver: Arc<ResolverClient>) -> Self {
        let cooldowns = Cooldowns::new(
            Duration::from_secs(config.command_cooldown_secs),
            Duration::from_secs(config.loop_cooldown_secs),
        );

        Self {
            config,
            engine,
            resolver,
            cooldowns: Arc::new(cooldowns),
            maintenance_started: AtomicBool::new(false),
        }
    }

    /// Registra comandos globales o por guild según configuración
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Refleja el loop en el apodo del bot
    async fn update_loop_nickname(&self, ctx: &Context, guild_id: GuildId, looping: bool) {
        let nickname = loop_nickname(&self.config.bot_nickname, looping);
        if let Err(e) = guild_id.edit_nickname(&ctx.http, nickname.as_deref()).await {
            warn!("No se pudo cambiar el apodo en guild {}: {:?}", guild_id, e);
        }
    }

    /// Desactiva la guild y restaura el apodo
    async fn release_guild(&self, ctx: &Context, guild_id: GuildId) {
        if self.engine.deactivate(guild_id).await {
            self.update_loop_nickname(ctx, guild_id, false).await;
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("❌ Error al registrar comandos: {:?}", e);
        }

        ctx.set_activity(Some(ActivityData::custom(self.config.presence_text.clone())));

        // `ready` se repite en cada reconexión
        if !self.maintenance_started.swap(true, Ordering::SeqCst) {
            let cooldowns = Arc::clone(&self.cooldowns);
            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move {
                maintenance_tasks(cooldowns, engine).await;
            });

            let events = self.engine.subscribe();
            let http = Arc::clone(&ctx.http);
            tokio::spawn(async move {
                forward_engine_events(events, http).await;
            });
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component_interaction) => {
                if let Err(e) = handlers::handle_component(&ctx, component_interaction, self).await {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id.or_else(|| old.as_ref().and_then(|o| o.guild_id)) else {
            return;
        };
        let bot_id = ctx.cache.current_user().id;

        // Detectar si el bot fue desconectado
        if new.user_id == bot_id && new.channel_id.is_none() {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.release_guild(&ctx, guild_id).await;
            return;
        }

        // Auto-desconectar si el bot se quedó solo en el canal
        let Some(listeners) = listeners_with_bot(&ctx, guild_id, bot_id) else {
            return;
        };
        debug!("👥 {} oyentes en el canal del bot en guild {}", listeners, guild_id);
        if self.engine.on_listeners_changed(guild_id, listeners).await {
            self.update_loop_nickname(&ctx, guild_id, false).await;
        }
    }
}

/// Oyentes humanos en el canal del bot, `None` si el bot no está en voz
fn listeners_with_bot(ctx: &Context, guild_id: GuildId, bot_id: UserId) -> Option<usize> {
    let guild = ctx.cache.guild(guild_id)?;
    let bot_channel: ChannelId = guild.voice_states.get(&bot_id)?.channel_id?;

    let listeners = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(bot_channel) && state.user_id != bot_id)
        .filter(|state| {
            let is_bot = state
                .member
                .as_ref()
                .map(|member| member.user.bot)
                .or_else(|| ctx.cache.user(state.user_id).map(|user| user.bot));
            !is_bot.unwrap_or(false)
        })
        .count();

    Some(listeners)
}

/// Apodo del bot según el estado de loop; `None` restaura el apodo por defecto
pub fn loop_nickname(base: &str, looping: bool) -> Option<String> {
    looping.then(|| format!("{} 🔁", base))
}

/// Refleja en Discord los cambios que el engine hace por su cuenta
async fn forward_engine_events(mut events: broadcast::Receiver<EngineEvent>, http: Arc<Http>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::LoopCleared(guild_id)) => {
                if let Err(e) = guild_id.edit_nickname(&http, None).await {
                    warn!("No se pudo restaurar el apodo en guild {}: {:?}", guild_id, e);
                }
            }
            Err(RecvError::Lagged(missed)) => warn!("⚠️ Se perdieron {} eventos del engine", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Tareas periódicas: limpieza de cooldowns y estadísticas
async fn maintenance_tasks(cooldowns: Arc<Cooldowns>, engine: Arc<PlaybackEngine<Input>>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);

    loop {
        interval.tick().await;
        cooldowns.purge();

        let stats = engine.stats();
        info!(
            "🧹 Mantenimiento: {} guilds activas, {} workers iniciados",
            stats.active_guilds, stats.workers_started
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_loop_nickname() {
        assert_eq!(loop_nickname("音葉", true), Some("音葉 🔁".to_string()));
        assert_eq!(loop_nickname("音葉", false), None);
    }
}

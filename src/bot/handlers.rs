use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::time::Duration;
use tracing::{info, warn};

use super::Handler;
use crate::{
    audio::{sink::VoiceConnector, EnqueueOutcome},
    error::{PlayError, QueueError, ResolveError, SinkError},
    ui::{
        buttons::{self, PlayerAction},
        embeds::{self, TrackStatus},
    },
};

/// Respuesta lista para enviar, como mensaje nuevo o como edición de un defer
pub struct Reply {
    content: Option<String>,
    embed: Option<CreateEmbed>,
    with_buttons: bool,
    ephemeral: bool,
}

impl Reply {
    fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embed: None,
            with_buttons: false,
            ephemeral: false,
        }
    }

    fn error(content: impl Into<String>) -> Self {
        Self::text(format!("❌ {}", content.into())).ephemeral()
    }

    fn embed(embed: CreateEmbed) -> Self {
        Self {
            content: None,
            embed: Some(embed),
            with_buttons: false,
            ephemeral: false,
        }
    }

    fn with_buttons(mut self) -> Self {
        self.with_buttons = true;
        self
    }

    fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    fn into_message(self) -> CreateInteractionResponseMessage {
        let mut message = CreateInteractionResponseMessage::new().ephemeral(self.ephemeral);
        if let Some(content) = self.content {
            message = message.content(content);
        }
        if let Some(embed) = self.embed {
            message = message.embed(embed);
        }
        if self.with_buttons {
            message = message.components(buttons::create_player_buttons());
        }
        message
    }

    fn into_edit(self) -> EditInteractionResponse {
        let mut edit = EditInteractionResponse::new();
        if let Some(content) = self.content {
            edit = edit.content(content);
        }
        if let Some(embed) = self.embed {
            edit = edit.embed(embed);
        }
        if self.with_buttons {
            edit = edit.components(buttons::create_player_buttons());
        }
        edit
    }
}

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &Handler) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let Some(action) = PlayerAction::from_command(&command.data.name) else {
        return respond_command(ctx, &command, Reply::error("Comando no reconocido")).await;
    };

    if let Err(remaining) = bot.cooldowns.try_acquire(guild_id, command.user.id, action) {
        return respond_command(ctx, &command, cooldown_reply(remaining)).await;
    }

    if action == PlayerAction::Play {
        return handle_play(ctx, &command, bot, guild_id).await;
    }

    let reply = run_action(ctx, bot, guild_id, action).await;
    respond_command(ctx, &command, reply).await
}

/// Maneja los botones persistentes del reproductor
pub async fn handle_component(ctx: &Context, component: ComponentInteraction, bot: &Handler) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Componente usado fuera de un servidor"))?;

    info!(
        "🔘 Botón {} presionado por {} en guild {}",
        component.data.custom_id, component.user.name, guild_id
    );

    let reply = match PlayerAction::from_custom_id(&component.data.custom_id) {
        None => Reply::error("Acción no reconocida"),
        Some(action) => match bot.cooldowns.try_acquire(guild_id, component.user.id, action) {
            Err(remaining) => cooldown_reply(remaining),
            Ok(()) => run_action(ctx, bot, guild_id, action).await,
        },
    };

    component
        .create_response(&ctx.http, CreateInteractionResponse::Message(reply.into_message()))
        .await?;

    Ok(())
}

async fn respond_command(ctx: &Context, command: &CommandInteraction, reply: Reply) -> Result<()> {
    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(reply.into_message()))
        .await?;
    Ok(())
}

async fn handle_play(ctx: &Context, command: &CommandInteraction, bot: &Handler, guild_id: GuildId) -> Result<()> {
    let url = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "url")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("URL no proporcionada"))?
        .trim();

    // Validaciones baratas antes del defer, para poder responder en privado
    let Some(channel_id) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        return respond_command(ctx, command, Reply::error("Debes estar en un canal de voz")).await;
    };
    if !bot.resolver.allow_list().is_allowed(url) {
        return respond_command(ctx, command, Reply::error("Esa URL no está permitida")).await;
    }

    // Defer la respuesta ya que puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;
    let connector = VoiceConnector::new(manager, channel_id, bot.config.default_volume);

    let reply = match bot.engine.play(guild_id, url, &connector).await {
        Ok(outcome) => track_reply(&outcome),
        Err(e) => {
            warn!("⚠️ /play falló en guild {}: {}", guild_id, e);
            Reply::embed(embeds::create_error_embed("No se pudo reproducir", &play_error_message(&e)))
        }
    };

    command.edit_response(&ctx.http, reply.into_edit()).await?;
    Ok(())
}

/// Acciones compartidas por slash commands y botones
async fn run_action(ctx: &Context, bot: &Handler, guild_id: GuildId, action: PlayerAction) -> Reply {
    match action {
        PlayerAction::Skip => match bot.engine.skip(guild_id) {
            Ok(outcome) => {
                if outcome.was_looping {
                    bot.update_loop_nickname(ctx, guild_id, false).await;
                }
                Reply::text("⏭️ Saltado")
            }
            Err(e) => Reply::error(queue_error_message(&e)),
        },
        PlayerAction::Loop => match bot.engine.toggle_loop(guild_id) {
            Ok(looping) => {
                bot.update_loop_nickname(ctx, guild_id, looping).await;
                Reply::text(if looping {
                    "🔂 Repetir canción activado"
                } else {
                    "➡️ Repetición desactivada"
                })
            }
            Err(e) => Reply::error(queue_error_message(&e)),
        },
        PlayerAction::Shuffle => match bot.engine.shuffle(guild_id) {
            Ok(count) => Reply::text(format!("🔀 Cola mezclada ({} canciones)", count)),
            Err(e) => Reply::error(queue_error_message(&e)),
        },
        PlayerAction::Now => match bot.engine.now_playing(guild_id) {
            Some(track) => Reply::embed(embeds::create_track_embed(&track, TrackStatus::NowPlaying)).with_buttons(),
            None => Reply::error(queue_error_message(&QueueError::NothingPlaying)),
        },
        PlayerAction::Queue => Reply::embed(embeds::create_queue_embed(&bot.engine.snapshot(guild_id))),
        PlayerAction::Play => Reply::embed(embeds::create_info_embed("Reproducir", "Usa `/play <url>`")),
    }
}

fn track_reply(outcome: &EnqueueOutcome) -> Reply {
    let status = if outcome.was_idle {
        TrackStatus::NowPlaying
    } else {
        TrackStatus::Queued {
            position: outcome.position,
        }
    };
    Reply::embed(embeds::create_track_embed(&outcome.track, status)).with_buttons()
}

fn cooldown_reply(remaining: Duration) -> Reply {
    Reply::text(format!(
        "⏳ Espera {}s antes de volver a usar este comando",
        remaining.as_secs_f64().ceil() as u64
    ))
    .ephemeral()
}

pub fn queue_error_message(error: &QueueError) -> String {
    match error {
        QueueError::NothingPlaying => "No hay nada reproduciéndose actualmente".to_string(),
        QueueError::QueueTooSmall => "Se necesitan al menos dos canciones en la cola".to_string(),
        QueueError::QueueFull(max) => format!("La cola está llena (máximo {} canciones)", max),
        QueueError::Inactive => "El reproductor se está desconectando, inténtalo de nuevo".to_string(),
    }
}

pub fn play_error_message(error: &PlayError) -> String {
    match error {
        PlayError::Resolve(ResolveError::InvalidLocator(_)) => "Esa URL no está permitida".to_string(),
        PlayError::Resolve(ResolveError::Resolution { reason, .. }) => {
            format!("No se pudo obtener la canción ({})", reason)
        }
        PlayError::Sink(SinkError::Connect(_)) | PlayError::Sink(SinkError::Disconnected) => {
            "No pude conectarme al canal de voz".to_string()
        }
        PlayError::Sink(SinkError::Play(_)) => "Error al iniciar la reproducción".to_string(),
        PlayError::Queue(e) => queue_error_message(e),
    }
}

/// Canal de voz del usuario según la caché
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

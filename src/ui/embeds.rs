use num_format::{Locale, ToFormattedString};
use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{audio::QueueSnapshot, sources::Track};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Otoha";

/// Límite práctico para títulos dentro de un field
const MAX_TITLE_CHARS: usize = 80;

/// Cómo se presenta un track recién pedido
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    NowPlaying,
    Queued { position: usize },
}

/// Embed de un track: título con enlace, uploader, duración, vistas y miniatura
pub fn create_track_embed(track: &Track, status: TrackStatus) -> CreateEmbed {
    let (title, color) = match status {
        TrackStatus::NowPlaying => ("🎵 Reproduciendo Ahora".to_string(), colors::SUCCESS_GREEN),
        TrackStatus::Queued { position } => (format!("✅ Agregado a la cola (#{})", position), colors::MUSIC_PURPLE),
    };

    let mut embed = CreateEmbed::default()
        .title(title)
        .description(format!("**[{}]({})**", truncate(track.title(), 200), track.page_url()))
        .color(color)
        .field("🎤 Subido por", track.uploader().unwrap_or("Desconocido"), true)
        .field("⏱️ Time", format_time(track.duration()), true)
        .field("👁️ Views", format_views(track.view_count()), true);

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Embed de la cola: actual, primeros N y cuántos más quedan
pub fn create_queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now());

    if snapshot.is_empty() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <url>` para agregar música")
            .color(colors::NEUTRAL_GRAY);
    }

    let (current_name, current_value) = now_playing_field(snapshot);
    let embed = embed.field(current_name, current_value, false);

    if snapshot.upcoming.is_empty() {
        return embed;
    }
    embed.field(
        format!("⏭️ Siguientes ({})", snapshot.total_queued),
        queue_lines(snapshot).join("\n"),
        false,
    )
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn now_playing_field(snapshot: &QueueSnapshot) -> (String, String) {
    let status = if snapshot.looping { "🔂" } else { "▶️" };
    let value = match &snapshot.current {
        Some(track) => format!("**{}**", truncate(track.title(), MAX_TITLE_CHARS)),
        None => "Nada por ahora".to_string(),
    };
    (format!("{} Reproduciendo", status), value)
}

/// Líneas numeradas de la cola, con "...y N más" si no entran todas
fn queue_lines(snapshot: &QueueSnapshot) -> Vec<String> {
    let mut lines: Vec<String> = snapshot
        .upcoming
        .iter()
        .enumerate()
        .map(|(i, track)| format!("`{}.` {}", i + 1, truncate(track.title(), MAX_TITLE_CHARS)))
        .collect();

    let remaining = snapshot.remaining();
    if remaining > 0 {
        lines.push(format!("...y {} más", remaining));
    }
    lines
}

/// Duración legible; 0 se muestra como desconocida (directos, sin metadata)
pub fn format_time(duration: Duration) -> String {
    if duration.is_zero() {
        return "🔴 Desconocida".to_string();
    }
    humantime::format_duration(Duration::from_secs(duration.as_secs())).to_string()
}

pub fn format_views(views: u64) -> String {
    views.to_formatted_string(&Locale::en)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut)
}

use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

/// IDs personalizados para los botones persistentes del reproductor
pub mod button_ids {
    pub const SKIP: &str = "player_skip";
    pub const LOOP: &str = "player_loop";
    pub const SHUFFLE: &str = "player_shuffle";
    pub const NOW: &str = "player_now";
    pub const QUEUE: &str = "player_queue";
}

/// Acción del reproductor, compartida por slash commands y botones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerAction {
    Play,
    Skip,
    Loop,
    Shuffle,
    Now,
    Queue,
}

impl PlayerAction {
    pub fn from_command(name: &str) -> Option<Self> {
        match name {
            "play" => Some(Self::Play),
            "skip" => Some(Self::Skip),
            "loop" => Some(Self::Loop),
            "shuffle" => Some(Self::Shuffle),
            "now" => Some(Self::Now),
            "queue" => Some(Self::Queue),
            _ => None,
        }
    }

    pub fn from_custom_id(custom_id: &str) -> Option<Self> {
        match custom_id {
            button_ids::SKIP => Some(Self::Skip),
            button_ids::LOOP => Some(Self::Loop),
            button_ids::SHUFFLE => Some(Self::Shuffle),
            button_ids::NOW => Some(Self::Now),
            button_ids::QUEUE => Some(Self::Queue),
            _ => None,
        }
    }
}

/// Fila de controles que acompaña al embed del track
pub fn create_player_buttons() -> Vec<CreateActionRow> {
    let skip_btn = CreateButton::new(button_ids::SKIP)
        .emoji('⏭')
        .style(ButtonStyle::Primary);

    let loop_btn = CreateButton::new(button_ids::LOOP)
        .emoji('🔁')
        .style(ButtonStyle::Secondary);

    let shuffle_btn = CreateButton::new(button_ids::SHUFFLE)
        .emoji('🔀')
        .style(ButtonStyle::Secondary);

    let now_btn = CreateButton::new(button_ids::NOW)
        .label("Ahora")
        .emoji('🎵')
        .style(ButtonStyle::Secondary);

    let queue_btn = CreateButton::new(button_ids::QUEUE)
        .label("Cola")
        .emoji('📋')
        .style(ButtonStyle::Secondary);

    vec![CreateActionRow::Buttons(vec![
        skip_btn,
        loop_btn,
        shuffle_btn,
        now_btn,
        queue_btn,
    ])]
}

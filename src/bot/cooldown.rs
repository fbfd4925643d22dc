use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::{GuildId, UserId};
use std::time::{Duration, Instant};

use crate::ui::buttons::PlayerAction;

/// Cooldowns por (guild, usuario, acción)
pub struct Cooldowns {
    last_used: DashMap<(GuildId, UserId, PlayerAction), Instant>,
    default_window: Duration,
    loop_window: Duration,
}

impl Cooldowns {
    pub fn new(default_window: Duration, loop_window: Duration) -> Self {
        Self {
            last_used: DashMap::new(),
            default_window,
            loop_window,
        }
    }

    pub fn window(&self, action: PlayerAction) -> Duration {
        match action {
            PlayerAction::Loop => self.loop_window,
            _ => self.default_window,
        }
    }

    /// Registra el uso; `Err(restante)` si todavía está en cooldown
    pub fn try_acquire(&self, guild_id: GuildId, user_id: UserId, action: PlayerAction) -> Result<(), Duration> {
        self.try_acquire_at(guild_id, user_id, action, Instant::now())
    }

    fn try_acquire_at(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        action: PlayerAction,
        now: Instant,
    ) -> Result<(), Duration> {
        let window = self.window(action);
        match self.last_used.entry((guild_id, user_id, action)) {
            Entry::Occupied(mut used) => {
                let elapsed = now.saturating_duration_since(*used.get());
                if elapsed < window {
                    return Err(window - elapsed);
                }
                used.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
        Ok(())
    }

    /// Elimina entradas ya expiradas
    pub fn purge(&self) {
        let now = Instant::now();
        self.last_used
            .retain(|(_, _, action), used| now.saturating_duration_since(*used) < self.window(*action));
    }
}

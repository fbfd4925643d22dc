//! # Audio Module
//!
//! Per-guild playback engine: queue state, the playback worker state
//! machine and the lifecycle around it.
//!
//! ## Architecture
//!
//! ### [`state`] - Guild State
//! - One record per guild: queue, current track, loop flag, sink, worker slot
//! - Every mutation is a short critical section behind a per-guild lock
//!
//! ### [`worker`] - Playback Worker
//! - One task per active guild pulling from the queue
//! - Survives source errors and sink faults, stops on cancellation or sink loss
//!
//! ### [`engine`] - Playback Engine
//! - Queue mutation API (enqueue, skip, loop, shuffle, snapshot)
//! - Activation and deactivation of guilds
//!
//! ### [`source`] / [`sink`] - Boundaries
//! - Stream URL to playable source, refreshing stale URLs once
//! - Output sink over a songbird call
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use otoha::audio::{engine::PlaybackEngine, sink::VoiceConnector};
//! use serenity::all::GuildId;
//! use songbird::input::Input;
//!
//! # async fn example(engine: &PlaybackEngine<Input>, connector: &VoiceConnector) -> anyhow::Result<()> {
//! let guild_id = GuildId::new(123456789);
//!
//! let added = engine.play(guild_id, "https://youtu.be/dQw4w9WgXcQ", connector).await?;
//! println!("posición {}", added.position);
//!
//! engine.toggle_loop(guild_id)?;
//! engine.skip(guild_id)?;
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod engine;
pub mod sink;
pub mod source;
pub mod state;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineEvent, EngineStats, EnqueueOutcome, PlaybackEngine, SkipOutcome};
pub use state::{PlayerPhase, QueueSnapshot};

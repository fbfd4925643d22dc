//! Otoha: bot de música para Discord con una cola por guild.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod ui;

pub mod chat;
pub mod config;
pub mod health;
pub mod key;
pub mod sessions;
pub mod tui;

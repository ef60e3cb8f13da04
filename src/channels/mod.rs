//! Messaging-channel surface — the LINE webhook and its command language.

pub mod commands;
pub mod line;

pub use commands::Command;
pub use line::{LineChannel, webhook_routes};

//! Core sample types and helpers shared by the chanemu crates

pub mod message;
pub mod power;
pub mod types;

pub use message::ReconfigMessage;
pub use power::{avg_power, db_to_linear, linear_to_db, symbol_size};
pub use types::{Burst, ChannelId, ChannelMode, Sample, SAMPLE_BYTES};

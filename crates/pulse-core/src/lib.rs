//! Core domain types for the pulse sensor relay.
//!
//! This crate provides the types shared by every other crate:
//! - `Team`, `Tag`: identity of a source slot and of an athlete's sensor
//! - `SourceBinding`, `SourceStatus`: upstream source configuration and health
//! - `PlayerRecord`, `TeamRoster`: normalized per-player statistics
//! - `RelayMessage`: the JSON messages pushed to downstream subscribers

pub mod error;
pub mod message;
pub mod player;
pub mod source;

pub use error::{CoreError, Result};
pub use message::RelayMessage;
pub use player::{PlayerRecord, Tag, TeamRoster};
pub use source::{SourceBinding, SourceStatus, Team};

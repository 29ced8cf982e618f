//! Integration tests for pulse-relay.
//!
//! These tests verify the interaction between components:
//! - Upstream source connection lifecycle
//! - Frame flow from a source to downstream subscribers
//! - Control API effects on sources and statistics

pub mod common;

//! Data models for the streamer
//!
//! This module contains the core data structures used throughout the
//! application: relay messages, per-player sessions, candidate descriptors and
//! the binary input-event protocol.

pub mod candidate;
pub mod input;
pub mod message;
pub mod propagated;
pub mod session;

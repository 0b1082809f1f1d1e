//! Pixel Streaming streamer
//!
//! Negotiates one WebRTC session per viewer through a Pixel Streaming
//! signaling relay and decodes the binary input events viewers send back over
//! their data channel.

pub mod config;
pub mod dispatcher;
pub mod model;
pub mod streamer;
pub mod transport;
pub mod util;

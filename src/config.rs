//! Command line and environment configuration.

use std::net::IpAddr;

use clap::Parser;

/// Pixel Streaming streamer: negotiates WebRTC sessions with viewers through a
/// signaling relay and decodes their input events.
#[derive(Debug, Clone, Parser)]
#[command(name = "pixel-streamer", version)]
pub struct Config {
    /// WebSocket URL of the signaling relay.
    #[arg(long, env = "PIXEL_STREAMER_RELAY_URL", default_value = "ws://127.0.0.1:8888")]
    pub relay_url: String,

    /// Identifier sent in reply to the relay's `identify`.
    #[arg(long, env = "PIXEL_STREAMER_ID", default_value = "RustStreamer")]
    pub streamer_id: String,

    /// Label of the data channel carrying viewer input.
    #[arg(long, env = "PIXEL_STREAMER_CHANNEL", default_value = "cirrus")]
    pub channel_label: String,

    /// Address advertised to viewers. Picked from the host's interfaces when unset.
    #[arg(long, env = "PIXEL_STREAMER_HOST_IP")]
    pub host_ip: Option<IpAddr>,

    /// UDP port for media; 0 picks a free one.
    #[arg(long, env = "PIXEL_STREAMER_UDP_PORT", default_value_t = 0)]
    pub udp_port: u16,

    /// Log filter.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log: String,
}

//! Signaling relay envelopes
//!
//! Every frame exchanged with the relay is a JSON object discriminated by its
//! `type` field. Inbound and outbound directions use separate enums so that a
//! message we only ever send can't be mistaken for one we handle.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Relay-assigned identifier of a viewer.
///
/// Older relays number their players while newer ones use strings. The id is
/// echoed back in whatever form it arrived, since the relay looks players up
/// by exact value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlayerId {
    Number(u64),
    Text(String),
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerId::Number(n) => write!(f, "{n}"),
            PlayerId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        PlayerId::Text(value.to_string())
    }
}

impl From<u64> for PlayerId {
    fn from(value: u64) -> Self {
        PlayerId::Number(value)
    }
}

/// One STUN/TURN server entry from the relay's `config` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(deserialize_with = "one_or_many", default)]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConnectionOptions {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

/// A candidate as carried in `iceCandidate` messages, both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: String,
    #[serde(default)]
    pub sdp_m_line_index: u32,
}

/// Messages received from the relay.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    Config {
        #[serde(default)]
        peer_connection_options: PeerConnectionOptions,
    },
    Identify,
    PlayerConnected {
        player_id: PlayerId,
    },
    PlayerDisconnected {
        player_id: PlayerId,
    },
    Answer {
        player_id: PlayerId,
        sdp: String,
    },
    IceCandidate {
        player_id: PlayerId,
        candidate: CandidateInit,
    },
    /// Any message type this streamer has no use for.
    #[serde(other)]
    Unknown,
}

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    EndpointId {
        id: String,
    },
    Offer {
        player_id: PlayerId,
        sdp: String,
    },
    IceCandidate {
        player_id: PlayerId,
        candidate: CandidateInit,
    },
    IceCandidateComplete {
        player_id: PlayerId,
    },
}

impl OutboundMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

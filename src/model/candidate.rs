//! Connectivity candidate translation
//!
//! Viewers send their ICE candidates as the textual `candidate:` attribute line
//! from the SDP grammar. This module turns that line into a structured
//! [`CandidateDescriptor`] using the fixed positional layout of the format.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Number of positional tokens a candidate line must have.
const MIN_TOKENS: usize = 8;

/// A candidate line that could not be translated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed candidate {line:?}: {reason}")]
pub struct MalformedCandidate {
    pub line: String,
    pub reason: String,
}

impl MalformedCandidate {
    fn new(line: &str, reason: impl Into<String>) -> Self {
        Self {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

/// Structured form of a remote connectivity candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateDescriptor {
    pub foundation: String,
    pub component: u32,
    /// Transport protocol, always lower case.
    pub protocol: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    /// Candidate type, e.g. `host`, `srflx` or `relay`.
    pub kind: String,
    pub sdp_mid: String,
    pub sdp_m_line_index: u32,
}

impl CandidateDescriptor {
    /// Renders the candidate back to its canonical `candidate:` line.
    ///
    /// Extension attributes dropped by [`translate`] are not restored.
    pub fn to_sdp_line(&self) -> String {
        format!(
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol,
            self.priority,
            self.ip,
            self.port,
            self.kind
        )
    }
}

impl fmt::Display for CandidateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} {} (mid {}, index {})",
            self.protocol, self.ip, self.port, self.kind, self.sdp_mid, self.sdp_m_line_index
        )
    }
}

/// Translates a textual candidate line into a [`CandidateDescriptor`].
///
/// Layout: `candidate:<foundation> <component> <protocol> <priority> <ip> <port> typ <type> [ext...]`.
/// The `typ` marker at position 6 is skipped without being checked and any
/// trailing extension tokens are ignored.
pub fn translate(
    line: &str,
    sdp_mid: &str,
    sdp_m_line_index: u32,
) -> Result<CandidateDescriptor, MalformedCandidate> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < MIN_TOKENS {
        return Err(MalformedCandidate::new(
            line,
            format!("expected at least {MIN_TOKENS} fields, got {}", tokens.len()),
        ));
    }

    let foundation = tokens[0]
        .split_once(':')
        .map(|(_, foundation)| foundation)
        .ok_or_else(|| MalformedCandidate::new(line, "missing `candidate:` prefix"))?;

    Ok(CandidateDescriptor {
        foundation: foundation.to_string(),
        component: number(line, "component", tokens[1])?,
        protocol: tokens[2].to_lowercase(),
        priority: number(line, "priority", tokens[3])?,
        ip: tokens[4].to_string(),
        port: number(line, "port", tokens[5])?,
        kind: tokens[7].to_string(),
        sdp_mid: sdp_mid.to_string(),
        sdp_m_line_index,
    })
}

fn number<T: FromStr>(line: &str, field: &str, token: &str) -> Result<T, MalformedCandidate> {
    token
        .parse()
        .map_err(|_| MalformedCandidate::new(line, format!("invalid {field} {token:?}")))
}

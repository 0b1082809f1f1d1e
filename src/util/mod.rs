use std::net::IpAddr;

use anyhow::{bail, Context};
use systemstat::{Platform, System};
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// `filter` uses `RUST_LOG` syntax, e.g. `info` or `pixel_streamer=debug,str0m=warn`.
pub fn init_log(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

/// Pick an IPv4 address that can be shared with a remote ICE peer.
///
/// Iterates over all network interfaces provided by `systemstat`, skipping any
/// loopback, link-local or broadcast addresses. The first routable interface is
/// returned as an [`IpAddr`].
///
/// ## Errors
///
/// Fails if the interfaces can't be listed or none of them is usable.
pub fn select_host_address() -> anyhow::Result<IpAddr> {
    let system = System::new();
    let networks = system
        .networks()
        .context("listing network interfaces")?;

    for net in networks.values() {
        for n in &net.addrs {
            if let systemstat::IpAddr::V4(v) = n.addr {
                if !v.is_loopback() && !v.is_link_local() && !v.is_broadcast() {
                    return Ok(IpAddr::V4(v));
                }
            }
        }
    }

    bail!("Found no usable network interface")
}

//! Streamer event loop
//!
//! One task, one thread: the loop waits on the relay WebSocket, the shared UDP
//! socket, the earliest engine timeout and Ctrl-C, and hands whichever fires to
//! the dispatcher before waiting again. Everything the dispatcher produces is
//! delivered before the next wait.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatcher::SignalingDispatcher;
use crate::model::propagated::Propagated;
use crate::transport::rtc::RtcEngine;
use crate::transport::{Datagram, TransportEngine, TransportError};
use crate::util::select_host_address;

/// How long to wait when no session has a pending timeout.
const IDLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest datagram we expect on the media socket.
const MAX_DATAGRAM: usize = 2000;

#[derive(Debug, Error)]
pub enum StreamerError {
    #[error("signaling relay error: {0}")]
    Relay(#[from] tungstenite::Error),
    #[error("signaling relay closed the connection")]
    RelayClosed,
    #[error("failed to encode relay message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("UDP socket error: {0}")]
    Socket(#[from] std::io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no address to advertise: {0}")]
    HostAddress(#[from] anyhow::Error),
}

/// Connects to the relay and serves players until the relay goes away or the
/// process is interrupted.
pub async fn run(config: Config) -> Result<(), StreamerError> {
    let host_addr = match config.host_ip {
        Some(ip) => ip,
        None => select_host_address()?,
    };

    let socket = Arc::new(UdpSocket::bind(SocketAddr::new(host_addr, config.udp_port)).await?);
    let local_addr = socket.local_addr()?;
    info!("Bound UDP port: {}", local_addr);

    let engine = RtcEngine::new(socket.clone())?;
    let mut dispatcher =
        SignalingDispatcher::new(engine, &config.streamer_id, &config.channel_label);

    let (ws_stream, _) = connect_async(config.relay_url.as_str()).await?;
    info!("✅ Connected to signaling relay {}", config.relay_url);

    let result = serve(&mut dispatcher, ws_stream, &socket, local_addr).await;

    let closed = dispatcher.shutdown();
    info!("Closed {} player session(s)", closed);
    result
}

async fn serve<E, S>(
    dispatcher: &mut SignalingDispatcher<E>,
    ws_stream: S,
    socket: &UdpSocket,
    local_addr: SocketAddr,
) -> Result<(), StreamerError>
where
    E: TransportEngine,
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin,
{
    let (mut relay_tx, mut relay_rx) = ws_stream.split();
    let mut buf = vec![0; MAX_DATAGRAM];

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let outcomes = dispatcher.poll();
        deliver(&mut relay_tx, outcomes).await?;

        let deadline = dispatcher
            .poll_timeout()
            .unwrap_or_else(|| Instant::now() + IDLE_TIMEOUT);

        let outcomes = tokio::select! {
            message = relay_rx.next() => match message {
                Some(Ok(Message::Text(text))) => dispatcher.handle_text(&text),
                Some(Ok(Message::Close(frame))) => {
                    info!("Relay closed the connection: {:?}", frame);
                    return Err(StreamerError::RelayClosed);
                }
                Some(Ok(other)) => {
                    debug!("Ignoring relay frame: {:?}", other);
                    vec![]
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(StreamerError::RelayClosed),
            },

            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((n, source)) => dispatcher.receive(Datagram {
                        source,
                        destination: local_addr,
                        contents: buf[..n].to_vec(),
                    }),
                    // ICMP errors from a vanished viewer surface here on some platforms.
                    Err(e) => warn!("UDP receive failed: {}", e),
                }
                vec![]
            },

            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                dispatcher.handle_timeout(Instant::now());
                vec![]
            },

            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                relay_tx.close().await?;
                return Ok(());
            },
        };

        deliver(&mut relay_tx, outcomes).await?;
    }
}

/// Sends relay messages and surfaces everything viewers sent.
async fn deliver<S>(relay: &mut S, outcomes: Vec<Propagated>) -> Result<(), StreamerError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    for outcome in outcomes {
        let player = outcome
            .player_id()
            .map(ToString::to_string)
            .unwrap_or_default();

        match outcome {
            Propagated::Relay(message) => {
                let json = message.to_json()?;
                debug!(player = %player, "📤 Relay: {}", json);
                relay.send(Message::Text(json)).await?;
            }
            Propagated::Input(_, frame) => {
                info!(
                    player = %player,
                    raw = %frame.raw_hex,
                    "🎮 {}: {:?}",
                    frame.event.name(),
                    frame.event
                );
            }
            Propagated::Text(_, text) => {
                info!(player = %player, "📩 Text message: {}", text);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::rc::Rc;
    use std::task::{Context, Poll};

    use serde_json::{json, Value};

    use crate::model::input;
    use crate::model::message::OutboundMessage;
    use crate::transport::mock::MockEngine;

    /// A relay connection that replays scripted frames, then hangs up.
    #[derive(Default)]
    struct ScriptedRelay {
        incoming: VecDeque<Message>,
        sent: Rc<RefCell<Vec<Message>>>,
    }

    impl ScriptedRelay {
        fn new<'a>(frames: impl IntoIterator<Item = &'a str>) -> Self {
            Self {
                incoming: frames
                    .into_iter()
                    .map(|f| Message::Text(f.to_string()))
                    .collect(),
                ..Self::default()
            }
        }
    }

    impl Stream for ScriptedRelay {
        type Item = Result<Message, tungstenite::Error>;

        fn poll_next(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(self.incoming.pop_front().map(Ok))
        }
    }

    impl Sink<Message> for ScriptedRelay {
        type Error = tungstenite::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            self.sent.borrow_mut().push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn sent_json(sent: &RefCell<Vec<Message>>) -> Vec<Value> {
        sent.borrow()
            .iter()
            .map(|m| match m {
                Message::Text(text) => serde_json::from_str(text).unwrap(),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn deliver_only_sends_relay_messages() {
        let mut relay = ScriptedRelay::default();
        let sent = relay.sent.clone();

        let outcomes = vec![
            Propagated::Relay(OutboundMessage::EndpointId { id: "s".into() }),
            Propagated::Input("p1".into(), input::decode(&[61, 13])),
            Propagated::Text("p1".into(), "hi".into()),
            Propagated::Relay(OutboundMessage::IceCandidateComplete {
                player_id: 7u64.into(),
            }),
        ];
        deliver(&mut relay, outcomes).await.unwrap();

        assert_eq!(
            sent_json(&sent),
            vec![
                json!({"type": "endpointId", "id": "s"}),
                json!({"type": "iceCandidateComplete", "playerId": 7}),
            ]
        );
    }

    #[tokio::test]
    async fn serve_answers_the_relay_until_it_hangs_up() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let local_addr = socket.local_addr().unwrap();
        let mut dispatcher =
            SignalingDispatcher::new(MockEngine::configured(), "RustStreamer", "cirrus");

        let relay = ScriptedRelay::new([
            r#"{"type":"identify"}"#,
            "garbage",
            r#"{"type":"playerConnected","playerId":"p1"}"#,
        ]);
        let sent = relay.sent.clone();

        let result = serve(&mut dispatcher, relay, &socket, local_addr).await;

        assert!(matches!(result, Err(StreamerError::RelayClosed)));
        assert_eq!(dispatcher.session_count(), 1);
        assert_eq!(
            sent_json(&sent),
            vec![
                json!({"type": "endpointId", "id": "RustStreamer"}),
                json!({"type": "offer", "playerId": "p1", "sdp": "v=0 offer-1"}),
            ]
        );
    }
}

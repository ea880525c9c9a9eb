//! P2P地震情報 WebSocket client.
//!
//! Read-only consumer: connects, decodes inbound text frames, hands JMA quake
//! reports to a callback and reconnects forever after a fixed delay.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, instrument, trace, warn};

use crate::errors::QuakedeckError;
use crate::models::{JMA_QUAKE_CODE, JmaQuakeReport, QuakeEvent};

/// Public P2P地震情報 v2 WebSocket endpoint.
pub const P2P_WS_URL: &str = "wss://api.p2pquake.net/v2/ws";

/// Delay between a close/error and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A decoded feed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// JMA earthquake report (`code: 551`)
    Quake(QuakeEvent),
    /// Any other message kind the feed multiplexes
    Other { code: Option<u64> },
}

/// Decode one text frame.
///
/// # Errors
///
/// Returns an error if the frame is not JSON, or is a quake report with
/// missing or invalid fields.
pub fn decode_message(text: &str) -> Result<FeedMessage, QuakedeckError> {
    let value: Value = serde_json::from_str(text)?;

    let code = value.get("code").and_then(Value::as_u64);
    if code != Some(JMA_QUAKE_CODE) {
        return Ok(FeedMessage::Other { code });
    }

    let report: JmaQuakeReport = serde_json::from_value(value)?;
    Ok(FeedMessage::Quake(report.into_event()?))
}

type ConnectHook = Box<dyn FnMut() + Send>;

/// Long-lived quake feed connection.
pub struct QuakeFeedClient {
    url: String,
    reconnect_delay: Duration,
    on_connect: Option<ConnectHook>,
}

impl QuakeFeedClient {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            on_connect: None,
        }
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Called each time a connection is established.
    #[must_use]
    pub fn on_connect(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_connect = Some(Box::new(hook));
        self
    }

    /// Connect and deliver quake reports to `on_event`, forever.
    ///
    /// Malformed frames are logged and dropped without touching the
    /// connection. Every close or error leads to a reconnect after the fixed
    /// delay; there is no retry limit and no backoff growth. Stop it by
    /// aborting the task it runs in.
    pub async fn run<F>(mut self, mut on_event: F)
    where
        F: FnMut(QuakeEvent) + Send,
    {
        loop {
            match self.session(&mut on_event).await {
                Ok(()) => info!(
                    "quake feed closed, retry in {}s",
                    self.reconnect_delay.as_secs_f32()
                ),
                Err(e) => warn!(
                    "quake feed error: {e}, retry in {}s",
                    self.reconnect_delay.as_secs_f32()
                ),
            }

            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    #[instrument(skip_all, fields(url = %self.url))]
    async fn session<F>(&mut self, on_event: &mut F) -> Result<(), QuakedeckError>
    where
        F: FnMut(QuakeEvent) + Send,
    {
        let (mut ws, _response) = connect_async(self.url.as_str()).await?;
        info!("quake feed connected");

        if let Some(hook) = self.on_connect.as_mut() {
            hook();
        }

        while let Some(frame) = ws.next().await {
            match frame? {
                Message::Text(text) => dispatch(text.as_str(), on_event),
                Message::Close(frame) => {
                    debug!(?frame, "server closed quake feed");
                    break;
                }
                // Pings are answered by tungstenite
                _ => {}
            }
        }

        Ok(())
    }
}

fn dispatch<F>(text: &str, on_event: &mut F)
where
    F: FnMut(QuakeEvent),
{
    match decode_message(text) {
        Ok(FeedMessage::Quake(event)) => {
            debug!(
                epicenter = %event.epicenter_name,
                scale = event.max_intensity.0,
                "quake report received"
            );
            on_event(event);
        }
        Ok(FeedMessage::Other { code }) => trace!(?code, "ignoring non-quake message"),
        Err(e) => warn!("discarding malformed feed message: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::ws::{Message as ServerMessage, WebSocketUpgrade};
    use axum::routing::get;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;

    const SAMPLE: &str = include_str!("../tools/sample_jma_quake.json");

    #[test]
    fn test_decode_quake_report() {
        match decode_message(SAMPLE).expect("decode") {
            FeedMessage::Quake(event) => {
                assert_eq!(event.epicenter_name, "石川県能登地方");
                assert_eq!(event.id.as_deref(), Some("65926b3f8a9c7e0008d1f6a2"));
            }
            other => panic!("expected quake, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_other_kinds() {
        assert_eq!(
            decode_message(r#"{"code": 554, "time": "2024/01/01 16:10:00"}"#).unwrap(),
            FeedMessage::Other { code: Some(554) }
        );
        assert_eq!(
            decode_message(r#"{"hello": "world"}"#).unwrap(),
            FeedMessage::Other { code: None }
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert!(decode_message("not json").is_err());
        // Right discriminant, missing earthquake body
        assert!(decode_message(r#"{"code": 551}"#).is_err());
    }

    async fn spawn_feed_server(frames: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();

        let app = Router::new().route(
            "/ws",
            get(move |ws: WebSocketUpgrade| {
                let counter = counter.clone();
                let frames = frames.clone();
                async move {
                    ws.on_upgrade(move |mut socket| async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        for frame in frames {
                            if socket
                                .send(ServerMessage::Text(frame.to_owned().into()))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        let _ = socket.send(ServerMessage::Close(None)).await;
                    })
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("ws://{addr}/ws"), connections)
    }

    #[tokio::test]
    async fn test_delivers_reports_and_reconnects() {
        let (url, connections) =
            spawn_feed_server(vec!["garbage", r#"{"code": 554}"#, SAMPLE]).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = QuakeFeedClient::new(url).with_reconnect_delay(Duration::from_millis(20));
        let task = tokio::spawn(client.run(move |event| {
            let _ = tx.send(event);
        }));

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("first report")
            .expect("channel open");
        assert_eq!(first.epicenter_name, "石川県能登地方");

        // The server closes after each batch; the same report arrives again
        // only through a fresh connection.
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("second report")
            .expect("channel open");
        assert_eq!(second, first);
        assert!(connections.load(Ordering::SeqCst) >= 2);

        task.abort();
    }

    #[tokio::test]
    async fn test_connect_hook_runs_per_connection() {
        let (url, _connections) = spawn_feed_server(vec![]).await;

        let hits = Arc::new(AtomicUsize::new(0));
        let hook_hits = hits.clone();
        let client = QuakeFeedClient::new(url)
            .with_reconnect_delay(Duration::from_millis(10))
            .on_connect(move || {
                hook_hits.fetch_add(1, Ordering::SeqCst);
            });
        let task = tokio::spawn(client.run(|_| {}));

        tokio::time::timeout(Duration::from_secs(5), async {
            while hits.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("hook should fire on every reconnect");

        task.abort();
    }
}

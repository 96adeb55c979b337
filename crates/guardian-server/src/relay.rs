//! HTTP messaging relay.
//!
//! Posts [`OutboundMessage`] JSON to a configured relay endpoint, which is
//! responsible for turning it into an SMS or push message.

use std::time::Duration;

use async_trait::async_trait;
use guardian_core::{DeliveryChannel, DeliveryError, OutboundMessage};
use tracing::debug;

/// Delivery channel backed by an HTTP relay.
#[derive(Debug, Clone)]
pub struct RelayChannel {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
}

impl RelayChannel {
    /// Create a relay client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (e.g. TLS backend
    /// initialization fails).
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("guardian/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
            timeout,
        })
    }

    /// Relay endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeliveryChannel for RelayChannel {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.url).json(message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout {
                    secs: self.timeout.as_secs(),
                }
            } else {
                DeliveryError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        debug!(url = %self.url, %status, "Relay responded");
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    type Received = Arc<Mutex<Vec<(Option<String>, OutboundMessage)>>>;

    async fn spawn_relay(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::default();
        let sink = received.clone();
        let app = Router::new().route(
            "/send",
            post(move |headers: HeaderMap, Json(body): Json<OutboundMessage>| {
                let sink = sink.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    sink.lock().await.push((auth, body));
                    status
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/send"), received)
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            recipient: "+4915112345678".into(),
            message: "EMERGENCY: test".into(),
        }
    }

    #[tokio::test]
    async fn test_delivers_json_with_bearer_token() {
        let (url, received) = spawn_relay(StatusCode::OK).await;
        let relay =
            RelayChannel::new(url, Some("secret".into()), Duration::from_secs(5)).unwrap();

        relay.deliver(&message()).await.unwrap();

        let received = received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.as_deref(), Some("Bearer secret"));
        assert_eq!(received[0].1, message());
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let (url, _received) = spawn_relay(StatusCode::SERVICE_UNAVAILABLE).await;
        let relay = RelayChannel::new(url, None, Duration::from_secs(5)).unwrap();

        assert_eq!(
            relay.deliver(&message()).await,
            Err(DeliveryError::Rejected { status: 503 })
        );
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_network_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let relay =
            RelayChannel::new(format!("http://{addr}/send"), None, Duration::from_secs(5))
                .unwrap();
        assert!(matches!(
            relay.deliver(&message()).await,
            Err(DeliveryError::Network(_))
        ));
    }
}

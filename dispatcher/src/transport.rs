//! The wire seam under the dispatcher.
//!
//! A [`Transport`] delivers one JSON POST and reports either the decoded
//! response body or a transport-level failure. Receiving *any* response —
//! even one whose `status` field is unhappy — counts as delivery; only
//! failures to reach the destination trigger the dispatcher's retry loop.

use async_trait::async_trait;

/// A transport-level delivery failure (connect, TLS, timeout, or an
/// unreadable response body).
#[derive(Debug, thiserror::Error)]
#[error("transport failure: {0}")]
pub struct TransportError(pub String);

/// Posts one JSON message to `destination` + `endpoint`.
#[async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync + 'static {
    /// Deliver `body` and return the decoded JSON response.
    async fn post(
        &self,
        destination: &str,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError>;
}

/// The production [`Transport`] over a shared reqwest client.
#[derive(Debug, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with its own connection pool.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        destination: &str,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        let url = format!("{destination}{endpoint}");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| TransportError(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    /// One recorded delivery attempt.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct Call {
        pub destination: String,
        pub endpoint: String,
        pub body: serde_json::Value,
    }

    #[derive(Debug, Default)]
    struct MockTransportState {
        calls: Vec<Call>,
        ret: VecDeque<Result<serde_json::Value, TransportError>>,
    }

    /// A scripted [`Transport`]: returns queued results in order, then
    /// `{"status": "OK"}` forever, recording every attempt.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        state: Mutex<MockTransportState>,
    }

    impl MockTransport {
        pub(crate) fn with_results(
            self,
            ret: impl Into<VecDeque<Result<serde_json::Value, TransportError>>>,
        ) -> Self {
            self.state.lock().ret = ret.into();
            self
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.state.lock().calls.clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn post(
            &self,
            destination: &str,
            endpoint: &str,
            body: &serde_json::Value,
        ) -> Result<serde_json::Value, TransportError> {
            let mut state = self.state.lock();
            state.calls.push(Call {
                destination: destination.to_owned(),
                endpoint: endpoint.to_owned(),
                body: body.clone(),
            });

            state
                .ret
                .pop_front()
                .unwrap_or_else(|| Ok(serde_json::json!({ "status": "OK" })))
        }
    }
}

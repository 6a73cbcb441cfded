//! HTTP publisher for a running relay.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Response, Url};
use tracing::debug;

use crate::transport::PublishAck;
use crate::utils::{RelayError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Publishes messages to a relay over HTTP.
///
/// Cheap to clone; clones share the underlying connection pool.
///
/// ```rust,ignore
/// let publisher = Publisher::new("http://127.0.0.1:9080")?;
/// let ack = publisher.publish("room1", "username=alice&text=hi").await?;
/// println!("stored as message {}", ack.message_id);
/// ```
#[derive(Debug, Clone)]
pub struct Publisher {
    http: Client,
    base_url: Url,
}

impl Publisher {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: parse_base_url(base_url)?,
        })
    }

    /// POSTs `data` to `channel` and returns the relay's acknowledgement.
    ///
    /// # Errors
    ///
    /// [`RelayError::UnexpectedStatus`] carries the relay's status and body
    /// when it refuses the message (invalid channel, oversized payload).
    pub async fn publish(&self, channel: &str, data: impl Into<Bytes>) -> Result<PublishAck> {
        let response = self
            .http
            .post(endpoint(&self.base_url, &["pub"])?)
            .query(&[("id", channel)])
            .body(data.into())
            .send()
            .await?;

        let body = ensure_success(response).await?.bytes().await?;
        let ack: PublishAck = serde_json::from_slice(&body)?;
        debug!(channel = %ack.channel, message_id = ack.message_id, "Publish acknowledged");
        Ok(ack)
    }
}

pub(crate) fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| RelayError::InvalidUrl(format!("{raw:?}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(RelayError::InvalidUrl(format!("{raw:?} cannot be a base")));
    }
    Ok(url)
}

/// Appends `segments` to `base`, percent-encoding each one.
pub(crate) fn endpoint<S: AsRef<str>>(base: &Url, segments: &[S]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| RelayError::InvalidUrl(format!("{base} cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Turns a non-2xx response into [`RelayError::UnexpectedStatus`].
pub(crate) async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RelayError::UnexpectedStatus {
        status: status.as_u16(),
        body,
    })
}

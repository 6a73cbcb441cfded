//! Streaming subscriber for a running relay.
//!
//! Opens `GET /sub/<channel>/...` and decodes the chunked response back into
//! frames as they arrive.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use tracing::debug;

use crate::client::publisher::{endpoint, ensure_success, parse_base_url};
use crate::transport::frame::{Frame, FrameDecoder};
use crate::transport::subscribe::CONNECTION_ID_HEADER;
use crate::utils::{RelayError, Result};

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// An open subscription. Dropping it closes the HTTP response, which
/// unsubscribes the connection on the relay.
pub struct FrameStream {
    body: ByteStream,
    decoder: FrameDecoder,
    connection_id: Option<String>,
}

impl FrameStream {
    /// The relay-assigned connection id, if the relay sent one.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Waits for the next frame. `Ok(None)` means the relay ended the stream.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(Some(frame));
            }
            match self.body.next().await {
                Some(chunk) => self.decoder.extend(&chunk?),
                None if self.decoder.buffered() > 0 => {
                    return Err(RelayError::MalformedFrame(
                        "stream ended inside a frame".to_string(),
                    ));
                }
                None => return Ok(None),
            }
        }
    }
}

impl std::fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStream")
            .field("connection_id", &self.connection_id)
            .field("buffered", &self.decoder.buffered())
            .finish()
    }
}

/// Subscribes to `channels` on the relay at `base_url`.
pub async fn subscribe<S: AsRef<str>>(base_url: &str, channels: &[S]) -> Result<FrameStream> {
    let base = parse_base_url(base_url)?;
    let mut segments = vec!["sub"];
    segments.extend(channels.iter().map(AsRef::as_ref));
    let url = endpoint(&base, segments.as_slice())?;

    let response = ensure_success(Client::new().get(url.clone()).send().await?).await?;
    let connection_id = response
        .headers()
        .get(CONNECTION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    debug!(%url, ?connection_id, "Subscribed to relay stream");

    Ok(FrameStream {
        body: Box::pin(response.bytes_stream()),
        decoder: FrameDecoder::new(),
        connection_id,
    })
}

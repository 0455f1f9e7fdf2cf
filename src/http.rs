//! HTTP handshake path.
//!
//! Only the initial handshake may travel over HTTP; every other envelope
//! requires the open WebSocket. The body is a one-element JSON array and
//! the reply must be a 200 with a JSON array of messages.

use crate::{
    error::{BayeuxLinkError, Result},
    message::Message,
    protocol,
};
use reqwest::header::CONTENT_TYPE;

/// POST a handshake envelope to the HTTP sibling endpoint and decode the
/// reply batch.
pub(crate) async fn post_handshake(
    http: &reqwest::Client,
    url: &str,
    envelope: &Message,
) -> Result<Vec<Message>> {
    let body = protocol::encode_http_batch(envelope)?;
    log::debug!("[bayeux-link] POSTing handshake to {}", url);

    let response = http
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?;

    let status = response.status();
    if status.as_u16() != 200 {
        return Err(BayeuxLinkError::HttpUnexpectedStatusCode(status.as_u16()));
    }

    let text = response.text().await?;
    protocol::decode_batch(&text)
}

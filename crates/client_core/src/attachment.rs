//! Image attachments: validation gate, data-URL encoding, and transmission
//! with one bounded retry.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use shared::{domain::UserId, protocol::SEND_MESSAGE_DESTINATION};
use tracing::{error, info, warn};

use crate::{error::ClientError, transport::TransportSession};

pub const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;
const PREFLIGHT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const TRANSMIT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// Checks run in order and stop at the first failure. Returns the receiver.
pub fn validate(
    active_peer: Option<UserId>,
    attachment: &Attachment,
) -> Result<UserId, ClientError> {
    let peer_id = active_peer.ok_or(ClientError::NoPeerSelected)?;
    if attachment.bytes.len() > MAX_ATTACHMENT_BYTES {
        return Err(ClientError::AttachmentTooLarge {
            size: attachment.bytes.len(),
            limit: MAX_ATTACHMENT_BYTES,
        });
    }
    if !attachment.media_type.trim().starts_with("image/") {
        return Err(ClientError::UnsupportedMediaType(
            attachment.media_type.clone(),
        ));
    }
    Ok(peer_id)
}

/// Base64 data URL, built off the async workers.
pub async fn encode_data_url(attachment: Attachment) -> Result<String, ClientError> {
    let Attachment {
        filename,
        media_type,
        bytes,
    } = attachment;
    let size = bytes.len();
    let data_url = tokio::task::spawn_blocking(move || {
        format!("data:{};base64,{}", media_type.trim(), STANDARD.encode(bytes))
    })
    .await
    .map_err(|err| ClientError::Encode(err.to_string()))?;
    info!(
        filename = %filename,
        size,
        encoded_len = data_url.len(),
        "attachment: encoded"
    );
    Ok(data_url)
}

/// Publishes an encoded image message. A disconnected transport gets one
/// reconnect and a 2s grace period; a failed publish gets one reconnect, a 1s
/// pause and exactly one more try.
pub async fn transmit(transport: &TransportSession, body: &str) -> Result<(), ClientError> {
    if !transport.is_connected().await {
        warn!("attachment: transport disconnected, reconnecting before send");
        transport.ensure_connected().await;
        tokio::time::sleep(PREFLIGHT_RECONNECT_DELAY).await;
        if !transport.is_connected().await {
            error!("attachment: still disconnected after reconnect attempt");
            return Err(ClientError::ReconnectFailed);
        }
    }

    match transport.publish(SEND_MESSAGE_DESTINATION, body).await {
        Ok(()) => Ok(()),
        Err(first) => {
            warn!(error = %first, "attachment: publish failed, retrying once after reconnect");
            transport.force_reconnect().await;
            tokio::time::sleep(TRANSMIT_RETRY_DELAY).await;
            transport
                .publish(SEND_MESSAGE_DESTINATION, body)
                .await
                .map_err(|err| {
                    error!(error = %err, "attachment: retry failed, giving up");
                    ClientError::AttachmentSendFailed(err.to_string())
                })
        }
    }
}

#[cfg(test)]
#[path = "tests/attachment_tests.rs"]
mod tests;

use thiserror::Error;

/// Failures a caller or the UI is expected to show. Transport failures are not
/// listed here: they are recovered by the reconnect loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("not connected to the chat broker")]
    NotConnected,
    #[error("select a conversation first")]
    NoPeerSelected,
    #[error("message is empty")]
    EmptyMessage,
    #[error("attachment is {size} bytes; the limit is {limit} bytes")]
    AttachmentTooLarge { size: usize, limit: usize },
    #[error("unsupported media type '{0}'; only images can be attached")]
    UnsupportedMediaType(String),
    #[error("failed to encode attachment: {0}")]
    Encode(String),
    #[error("failed to reconnect before sending the attachment")]
    ReconnectFailed,
    #[error("failed to send attachment: {0}")]
    AttachmentSendFailed(String),
    #[error("failed to publish: {0}")]
    Publish(String),
    #[error("user directory unavailable: {0}")]
    DirectoryUnavailable(String),
    #[error("conversation history unavailable: {0}")]
    HistoryUnavailable(String),
}

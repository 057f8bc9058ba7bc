use std::sync::Arc;

/// One message delivered on a subscribed channel.
///
/// The payload is opaque bytes: pulses replay it verbatim, UTF-8 or not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Channel the message was published on.
    pub channel: Arc<str>,
    /// Raw payload.
    pub payload: Arc<[u8]>,
}

impl Message {
    pub fn new(channel: impl Into<Arc<str>>, payload: impl AsRef<[u8]>) -> Self {
        Self {
            channel: channel.into(),
            payload: Arc::from(payload.as_ref()),
        }
    }
}

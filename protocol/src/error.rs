use thiserror::Error;

/// A frame could not be decoded. Callers should drop the frame, tick a
/// per-connection error counter, and close the connection on sustained
/// abuse — this error must never propagate past the connection layer.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame shorter than the one-byte tag header")]
    TooShort,
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),
    #[error("malformed payload for tag {tag:#04x}: {source}")]
    MalformedPayload {
        tag: u8,
        #[source]
        source: postcard::Error,
    },
}

/// A frame could not be parsed from the `debug-text-codec`'s JSON
/// representation. Distinct from [`DecodeError`] because the text codec
/// has no tag byte to report and is never on the normative wire path.
#[cfg(feature = "debug-text-codec")]
#[derive(Debug, Error)]
#[error("malformed debug-text frame: {0}")]
pub struct TextDecodeError(#[from] pub serde_json::Error);

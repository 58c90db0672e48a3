use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Local-only failures. None of these are ever shown to the remote peer;
/// per the protocol's error handling design they cause the offending
/// datagram to be dropped silently (see `Connection::update`,
/// `ConnectionManager::run`).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("buffer too small for a packet header")]
    PacketTooSmall,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("packet checksum mismatch")]
    ChecksumMismatch,
    #[error("unknown frame type tag {0}")]
    UnknownFrameType(u8),
    #[error("frame buffer truncated before header")]
    FrameHeaderTruncated,
    #[error("declared payload_length inconsistent with remaining buffer")]
    PayloadLengthMismatch,
    #[error("frame payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("a single frame of {0} bytes exceeds max_packet_size {1}")]
    FrameExceedsMtu(usize, usize),

    #[error("stream {0} already exists")]
    StreamAlreadyExists(u16),
    #[error("stream {0} does not exist")]
    StreamDoesNotExist(u16),

    #[error("{0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

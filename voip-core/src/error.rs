use std::io;

/// Final, user-visible reason a call failed. Mirrors the `Error enum` of the
/// external interface: everything the caller can observe through
/// `Controller::last_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("no packet from the peer within the configured timeout")]
    Timeout,
    #[error("peer protocol version is incompatible with ours")]
    Incompatible,
    #[error("audio I/O device failed to initialize")]
    AudioIo,
    #[error("unknown failure")]
    Unknown,
}

/// Internal error taxonomy. Protocol-fatal variants drive the controller into
/// `ConnectionState::Failed`; everything else is handled by dropping the
/// offending unit of work (a single packet, a single send) without tearing
/// down the connection, per the error-handling design.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("packet too short to contain a valid header")]
    Truncated,

    #[error("packet integrity check failed")]
    IntegrityCheckFailed,

    #[error("unrecognized TL constructor id 0x{0:08x}")]
    UnknownTlId(u32),

    #[error("peer tag does not match any known relay endpoint")]
    WrongPeerTag,

    #[error("protocol magic mismatch (fatal)")]
    ProtocolMagicMismatch,

    #[error("peer protocol version {peer} is below our minimum {min}")]
    VersionTooOld { peer: u32, min: u32 },

    #[error("packet sequence is too far out of order to track")]
    SequenceTooOld,

    #[error("buffer pool exhausted")]
    BufferPoolExhausted,

    #[error("call error: {0}")]
    Call(#[from] CallError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed control payload")]
    MalformedControl,
}

impl EngineError {
    /// True for the "transport recoverable" class of spec §7: the offending
    /// packet is dropped and logged, the connection is otherwise unaffected.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            EngineError::ProtocolMagicMismatch | EngineError::VersionTooOld { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

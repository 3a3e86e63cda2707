//! Intercom2 wire protocol definitions.
//!
//! This crate defines everything two Intercom2 endpoints agree on:
//!
//! - The binary frame layout (see [`frame`])
//! - The message-id constants (see [`MessageId`])
//! - The JSON payload types carried inside frames (see [`messages`])
//!
//! The numeric message-id assignments are an external contract with the
//! installed wallet peer and must not be renumbered.

pub mod frame;
pub mod messages;

pub use frame::{Frame, FrameHeader, FRAME_HEADER_LEN, MAX_FRAME};
pub use messages::{
    decode_reply, AddressBalance, CommandReply, Heartbeat, Notify, ReplyPayload,
    TransactionRequest,
};

use thiserror::Error;

/// Errors raised while encoding or decoding protocol data.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("frame header truncated: got {0} bytes, need {FRAME_HEADER_LEN}")]
    HeaderTruncated(usize),

    #[error("frame payload length {0} exceeds maximum {MAX_FRAME}")]
    FrameTooLarge(u32),

    #[error("unknown message id {0}")]
    UnknownMessageId(u16),

    #[error("payload decode error: {0}")]
    PayloadDecode(#[from] serde_json::Error),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;

/// Message ids exchanged between the broker and the wallet peer.
///
/// Ids below 100 flow broker → wallet (commands); 100 and above flow
/// wallet → broker (asynchronous events).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageId {
    Start = 1,
    Stop = 2,
    Restart = 3,
    Reindex = 4,
    Resync = 5,
    Rescan = 6,
    NewAddress = 10,
    Addresses = 11,
    AddressBalance = 12,
    IdBalance = 13,
    BestBlockHash = 14,
    Info = 15,
    SendFunds = 20,
    Replay = 21,
    Crawl = 22,
    Notify = 100,
    Heartbeat = 101,
}

impl MessageId {
    /// Numeric wire value.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Parse a wire value back into a message id.
    pub fn from_u16(value: u16) -> Result<Self> {
        Ok(match value {
            1 => MessageId::Start,
            2 => MessageId::Stop,
            3 => MessageId::Restart,
            4 => MessageId::Reindex,
            5 => MessageId::Resync,
            6 => MessageId::Rescan,
            10 => MessageId::NewAddress,
            11 => MessageId::Addresses,
            12 => MessageId::AddressBalance,
            13 => MessageId::IdBalance,
            14 => MessageId::BestBlockHash,
            15 => MessageId::Info,
            20 => MessageId::SendFunds,
            21 => MessageId::Replay,
            22 => MessageId::Crawl,
            100 => MessageId::Notify,
            101 => MessageId::Heartbeat,
            other => return Err(ProtoError::UnknownMessageId(other)),
        })
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageId::Start => "START",
            MessageId::Stop => "STOP",
            MessageId::Restart => "RESTART",
            MessageId::Reindex => "REINDEX",
            MessageId::Resync => "RESYNC",
            MessageId::Rescan => "RESCAN",
            MessageId::NewAddress => "NEW_ADDRESS",
            MessageId::Addresses => "ADDRESSES",
            MessageId::AddressBalance => "ADDRESS_BALANCE",
            MessageId::IdBalance => "ID_BALANCE",
            MessageId::BestBlockHash => "BEST_BLOCK_HASH",
            MessageId::Info => "INFO",
            MessageId::SendFunds => "SEND_FUNDS",
            MessageId::Replay => "REPLAY",
            MessageId::Crawl => "CRAWL",
            MessageId::Notify => "NOTIFY",
            MessageId::Heartbeat => "HEARTBEAT",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_wire_values_are_stable() {
        // External contract with the wallet peer.
        assert_eq!(MessageId::Start.as_u16(), 1);
        assert_eq!(MessageId::Rescan.as_u16(), 6);
        assert_eq!(MessageId::NewAddress.as_u16(), 10);
        assert_eq!(MessageId::Info.as_u16(), 15);
        assert_eq!(MessageId::SendFunds.as_u16(), 20);
        assert_eq!(MessageId::Crawl.as_u16(), 22);
        assert_eq!(MessageId::Notify.as_u16(), 100);
        assert_eq!(MessageId::Heartbeat.as_u16(), 101);
    }

    #[test]
    fn message_id_roundtrip() {
        for id in [
            MessageId::Start,
            MessageId::Stop,
            MessageId::Restart,
            MessageId::Reindex,
            MessageId::Resync,
            MessageId::Rescan,
            MessageId::NewAddress,
            MessageId::Addresses,
            MessageId::AddressBalance,
            MessageId::IdBalance,
            MessageId::BestBlockHash,
            MessageId::Info,
            MessageId::SendFunds,
            MessageId::Replay,
            MessageId::Crawl,
            MessageId::Notify,
            MessageId::Heartbeat,
        ] {
            assert_eq!(MessageId::from_u16(id.as_u16()).unwrap(), id);
        }
    }

    #[test]
    fn unknown_message_id_rejected() {
        assert!(matches!(
            MessageId::from_u16(9999),
            Err(ProtoError::UnknownMessageId(9999))
        ));
    }
}

//! Binary frame layout for Intercom2 connections.
//!
//! Every message on the wire is a fixed 18-byte header followed by the
//! payload:
//!
//! ```text
//! +----------+------------+----------------+-------------+---------+
//! | sender_id| message_id | correlation_id | payload_len | payload |
//! |   u32    |    u16     |      u64       |     u32     |  bytes  |
//! +----------+------------+----------------+-------------+---------+
//! ```
//!
//! All integer fields are network byte order (big-endian). A nonzero
//! `correlation_id` marks a request; the reply echoes the same value.

use crate::{ProtoError, Result};

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 4 + 2 + 8 + 4;

/// Maximum accepted payload length. Frames above this are rejected
/// before the payload is read.
pub const MAX_FRAME: u32 = 4 * 1024 * 1024;

/// The fixed-size portion of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Endpoint id of the sending peer.
    pub sender_id: u32,
    /// Message id (see [`crate::MessageId`]).
    pub message_id: u16,
    /// Nonzero for requests; echoed on replies.
    pub correlation_id: u64,
    /// Length of the payload that follows.
    pub payload_len: u32,
}

impl FrameHeader {
    /// Serialize the header into its wire representation.
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.sender_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.message_id.to_be_bytes());
        buf[6..14].copy_from_slice(&self.correlation_id.to_be_bytes());
        buf[14..18].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Parse a header from its wire representation.
    ///
    /// Rejects short input and oversized `payload_len` so the caller
    /// never allocates for a malformed frame.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(ProtoError::HeaderTruncated(buf.len()));
        }
        let sender_id = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let message_id = u16::from_be_bytes(buf[4..6].try_into().unwrap());
        let correlation_id = u64::from_be_bytes(buf[6..14].try_into().unwrap());
        let payload_len = u32::from_be_bytes(buf[14..18].try_into().unwrap());
        if payload_len > MAX_FRAME {
            return Err(ProtoError::FrameTooLarge(payload_len));
        }
        Ok(Self {
            sender_id,
            message_id,
            correlation_id,
            payload_len,
        })
    }
}

/// A complete wire frame: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sender_id: u32,
    pub message_id: u16,
    pub correlation_id: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame, asserting the payload fits the wire limit.
    pub fn new(sender_id: u32, message_id: u16, correlation_id: u64, payload: Vec<u8>) -> Result<Self> {
        if payload.len() as u64 > MAX_FRAME as u64 {
            return Err(ProtoError::FrameTooLarge(payload.len() as u32));
        }
        Ok(Self {
            sender_id,
            message_id,
            correlation_id,
            payload,
        })
    }

    /// Header for this frame.
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            sender_id: self.sender_id,
            message_id: self.message_id,
            correlation_id: self.correlation_id,
            payload_len: self.payload.len() as u32,
        }
    }

    /// Serialize header and payload into one buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header().encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Whether this frame expects (or is) a correlated reply.
    pub fn is_correlated(&self) -> bool {
        self.correlation_id != 0
    }
}

//! # Protocol Messages
//!
//! The two built-in message types exchanged on the tunnel, plus the reason
//! enums surfaced to the application layer.
//!
//! `ConnectionMessage` answers a connect handshake with either a rejection
//! reason or an accepted session token and recommended poll delay.
//! `DataMessage` carries a send timestamp and an ordered batch of tagged
//! messages; since any registered type can ride in the batch, a
//! `DataMessage` may itself contain further `DataMessage`s.

use std::fmt;
use std::time::{Duration, SystemTime};

use crate::core::object::{Message, ObjectReader, ObjectWriter, Wire};
use crate::core::registry::CodecRegistry;
use crate::error::{ProtocolError, Result};

/// Well-known wire code of [`ConnectionMessage`].
pub const CONNECTION_MESSAGE_CODE: u16 = 0x0001;
/// Well-known wire code of [`DataMessage`].
pub const DATA_MESSAGE_CODE: u16 = 0x0002;

/// Why a connect request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The caller's address already owns a live session.
    ActiveSession,
}

impl RejectReason {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(RejectReason::ActiveSession),
            other => Err(ProtocolError::Decode(format!(
                "invalid reject reason: {other}"
            ))),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::ActiveSession => write!(f, "ActiveSession"),
        }
    }
}

impl Wire for RejectReason {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        writer.put_u8(*self as u8);
        Ok(())
    }

    fn decode(reader: &mut ObjectReader<'_>) -> Result<Self> {
        Self::from_u8(reader.take_u8()?)
    }
}

/// Why a session ended, as observed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The client asked to disconnect.
    Requested,
    /// The sweep evicted an idle peer.
    TimedOut,
    /// The server shut down or force-dropped the peer.
    Forced,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "Requested"),
            DisconnectReason::TimedOut => write!(f, "TimedOut"),
            DisconnectReason::Forced => write!(f, "Forced"),
        }
    }
}

/// Reply to a connect handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionMessage {
    /// Session accepted: the token identifying it and the poll delay the
    /// server recommends.
    Accepted { token: String, poll_delay: Duration },
    /// Session refused.
    Rejected { reason: RejectReason },
}

impl Wire for ConnectionMessage {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        match self {
            ConnectionMessage::Rejected { reason } => {
                writer.put_bool(true);
                reason.encode(writer)
            }
            ConnectionMessage::Accepted { token, poll_delay } => {
                writer.put_bool(false);
                writer.put_str(token);
                writer.put_duration(*poll_delay);
                Ok(())
            }
        }
    }

    fn decode(reader: &mut ObjectReader<'_>) -> Result<Self> {
        if reader.take_bool()? {
            let reason = RejectReason::decode(reader)?;
            Ok(ConnectionMessage::Rejected { reason })
        } else {
            let token = reader.take_str()?;
            let poll_delay = reader.take_duration()?;
            Ok(ConnectionMessage::Accepted { token, poll_delay })
        }
    }
}

/// One poll cycle's batch: a send timestamp plus the queued messages in
/// enqueue order.
#[derive(Debug)]
pub struct DataMessage {
    /// When the sender assembled the batch.
    pub sent: SystemTime,
    /// The batched messages, oldest first.
    pub messages: Vec<Box<dyn Message>>,
}

impl DataMessage {
    /// Build a batch stamped with the current time.
    pub fn new(messages: Vec<Box<dyn Message>>) -> Self {
        Self {
            sent: SystemTime::now(),
            messages,
        }
    }

    /// An empty batch stamped with the current time.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Wire for DataMessage {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        writer.put_timestamp(self.sent);
        writer.put_object_list(&self.messages)
    }

    fn decode(reader: &mut ObjectReader<'_>) -> Result<Self> {
        let sent = reader.take_timestamp()?;
        let messages = reader.take_object_list()?;
        Ok(Self { sent, messages })
    }
}

/// Register the built-in message types under their well-known codes.
///
/// Idempotent; both endpoints call this when they are constructed so the
/// two codes agree without a handshake.
pub fn register_builtin_messages(registry: &CodecRegistry) -> Result<()> {
    registry.register_with_code::<ConnectionMessage>(CONNECTION_MESSAGE_CODE)?;
    registry.register_with_code::<DataMessage>(DATA_MESSAGE_CODE)?;
    Ok(())
}

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::{Duration, SystemTime};

use crate::core::object::{ObjectReader, ObjectWriter, Wire};
use crate::core::registry::CodecRegistry;
use crate::protocol::message::*;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Note(String);

impl Wire for Note {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> crate::error::Result<()> {
        writer.put_str(&self.0);
        Ok(())
    }

    fn decode(reader: &mut ObjectReader<'_>) -> crate::error::Result<Self> {
        Ok(Note(reader.take_str()?))
    }
}

fn registry() -> CodecRegistry {
    let registry = CodecRegistry::new();
    register_builtin_messages(&registry).expect("builtin registration");
    registry.register_with_code::<Note>(0x4000).expect("note registration");
    registry
}

#[test]
fn builtin_registration_is_idempotent() {
    let registry = CodecRegistry::new();
    register_builtin_messages(&registry).unwrap();
    register_builtin_messages(&registry).unwrap();
    assert_eq!(
        registry.code_of::<ConnectionMessage>(),
        Some(CONNECTION_MESSAGE_CODE)
    );
    assert_eq!(registry.code_of::<DataMessage>(), Some(DATA_MESSAGE_CODE));
}

#[test]
fn accepted_connection_roundtrip() {
    let registry = registry();
    let message = ConnectionMessage::Accepted {
        token: "abcDEF123".into(),
        poll_delay: Duration::from_millis(750),
    };

    let mut writer = ObjectWriter::new(&registry);
    writer.put_message(&message).unwrap();
    let bytes = writer.finish();

    let mut reader = ObjectReader::new(&registry, bytes);
    let decoded: ConnectionMessage = reader.take_message().unwrap();
    assert_eq!(decoded, message);
    assert_eq!(reader.remaining(), 0);
}

#[test]
fn rejected_connection_roundtrip() {
    let registry = registry();
    let message = ConnectionMessage::Rejected {
        reason: RejectReason::ActiveSession,
    };

    let mut writer = ObjectWriter::new(&registry);
    writer.put_message(&message).unwrap();

    let mut reader = ObjectReader::new(&registry, writer.finish());
    let decoded: ConnectionMessage = reader.take_message().unwrap();
    assert_eq!(decoded, message);
}

#[test]
fn data_message_preserves_batch_order() {
    let registry = registry();
    let batch = DataMessage::new(vec![
        Box::new(Note("A".into())) as _,
        Box::new(Note("B".into())) as _,
        Box::new(Note("C".into())) as _,
    ]);

    let mut writer = ObjectWriter::new(&registry);
    writer.put_message(&batch).unwrap();

    let mut reader = ObjectReader::new(&registry, writer.finish());
    let decoded: DataMessage = reader.take_message().unwrap();

    let notes: Vec<&Note> = decoded
        .messages
        .iter()
        .map(|m| m.downcast_ref::<Note>().expect("a Note"))
        .collect();
    assert_eq!(notes, [&Note("A".into()), &Note("B".into()), &Note("C".into())]);
}

#[test]
fn data_message_nests_recursively() {
    let registry = registry();
    let inner = DataMessage::new(vec![Box::new(Note("nested".into())) as _]);
    let outer = DataMessage::new(vec![
        Box::new(inner) as _,
        Box::new(Note("tail".into())) as _,
    ]);

    let mut writer = ObjectWriter::new(&registry);
    writer.put_message(&outer).unwrap();

    let mut reader = ObjectReader::new(&registry, writer.finish());
    let decoded: DataMessage = reader.take_message().unwrap();
    assert_eq!(decoded.len(), 2);

    let nested = decoded.messages[0]
        .downcast_ref::<DataMessage>()
        .expect("a nested DataMessage");
    assert_eq!(nested.len(), 1);
    assert_eq!(
        nested.messages[0].downcast_ref::<Note>(),
        Some(&Note("nested".into()))
    );
    assert_eq!(
        decoded.messages[1].downcast_ref::<Note>(),
        Some(&Note("tail".into()))
    );
}

#[test]
fn data_message_timestamp_survives() {
    let registry = registry();
    let sent = SystemTime::now();
    let batch = DataMessage {
        sent,
        messages: Vec::new(),
    };

    let mut writer = ObjectWriter::new(&registry);
    writer.put_message(&batch).unwrap();

    let mut reader = ObjectReader::new(&registry, writer.finish());
    let decoded: DataMessage = reader.take_message().unwrap();
    let delta = sent
        .duration_since(decoded.sent)
        .unwrap_or_else(|e| e.duration());
    assert!(delta < Duration::from_millis(1));
    assert!(decoded.is_empty());
}

#[test]
fn unknown_message_in_batch_fails_cleanly() {
    let registry = registry();
    let batch = DataMessage::new(vec![Box::new(Note("x".into())) as _]);
    let mut writer = ObjectWriter::new(&registry);
    writer.put_message(&batch).unwrap();
    let bytes = writer.finish();

    // A receiver that never registered Note rejects the batch element.
    let bare = CodecRegistry::new();
    register_builtin_messages(&bare).unwrap();
    let mut reader = ObjectReader::new(&bare, bytes);
    let err = reader.take_message::<DataMessage>().unwrap_err();
    assert!(matches!(
        err,
        crate::error::ProtocolError::UnknownTypeCode(0x4000)
    ));
}

#[test]
fn reject_reason_encodes_as_numeric() {
    let registry = registry();
    let mut writer = ObjectWriter::new(&registry);
    RejectReason::ActiveSession.encode(&mut writer).unwrap();
    assert_eq!(writer.finish(), vec![0u8]);
}

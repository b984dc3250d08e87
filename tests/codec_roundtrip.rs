//! Integration tests for the object graph codec.
//!
//! Exercises the round-trip law across primitives, containers, registered
//! message types, the full-name tag path, and the serde bridge.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use http_transport::core::{
    decode_with_serde, encode_with_serde, CodecRegistry, ObjectReader, ObjectWriter, Wire,
};
use http_transport::error::ProtocolError;
use http_transport::{DataMessage, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChatLine {
    author: String,
    body: String,
}

impl Wire for ChatLine {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        writer.put_str(&self.author);
        writer.put_str(&self.body);
        Ok(())
    }

    fn decode(reader: &mut ObjectReader<'_>) -> Result<Self> {
        Ok(Self {
            author: reader.take_str()?,
            body: reader.take_str()?,
        })
    }
}

/// A type that opts into the serde bridge instead of a hand-written layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Telemetry {
    sequence: u64,
    samples: Vec<f64>,
    source: Option<String>,
}

impl Wire for Telemetry {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        encode_with_serde(self, writer)
    }

    fn decode(reader: &mut ObjectReader<'_>) -> Result<Self> {
        decode_with_serde(reader)
    }
}

fn registry() -> Arc<CodecRegistry> {
    let registry = Arc::new(CodecRegistry::new());
    http_transport::protocol::register_builtin_messages(&registry).expect("builtins");
    registry
        .register_with_code::<ChatLine>(0x4001)
        .expect("chat line");
    registry
        .register_with_code::<Telemetry>(0x4002)
        .expect("telemetry");
    registry
}

fn roundtrip_wire<T: Wire>(registry: &CodecRegistry, value: &T) -> T {
    let mut writer = ObjectWriter::new(registry);
    writer.put_wire(value).expect("encode");
    let mut reader = ObjectReader::new(registry, writer.finish());
    let decoded = reader.take_wire().expect("decode");
    assert_eq!(reader.remaining(), 0, "trailing bytes after decode");
    decoded
}

#[test]
fn primitive_roundtrips() {
    let registry = registry();
    assert_eq!(roundtrip_wire(&registry, &0xAAu8), 0xAA);
    assert_eq!(roundtrip_wire(&registry, &-1234i16), -1234);
    assert_eq!(roundtrip_wire(&registry, &0xDEAD_BEEFu32), 0xDEAD_BEEF);
    assert_eq!(roundtrip_wire(&registry, &i64::MIN), i64::MIN);
    assert_eq!(roundtrip_wire(&registry, &3.5f32), 3.5);
    assert_eq!(roundtrip_wire(&registry, &true), true);
    assert_eq!(
        roundtrip_wire(&registry, &String::from("héllo wörld")),
        "héllo wörld"
    );
    assert_eq!(
        roundtrip_wire(&registry, &Duration::from_millis(86_400_000)),
        Duration::from_millis(86_400_000)
    );
}

#[test]
fn container_roundtrips() {
    let registry = registry();

    let list = vec![1u32, 2, 3, 5, 8];
    assert_eq!(roundtrip_wire(&registry, &list), list);

    let nested: Vec<Vec<String>> = vec![vec!["a".into()], vec!["b".into(), "c".into()], vec![]];
    assert_eq!(roundtrip_wire(&registry, &nested), nested);

    let mut map = HashMap::new();
    map.insert(String::from("one"), 1u64);
    map.insert(String::from("two"), 2u64);
    assert_eq!(roundtrip_wire(&registry, &map), map);

    let set: HashSet<u16> = [10, 20, 30].into_iter().collect();
    assert_eq!(roundtrip_wire(&registry, &set), set);

    assert_eq!(roundtrip_wire(&registry, &Some(42u8)), Some(42));
    assert_eq!(roundtrip_wire(&registry, &None::<u8>), None);
}

#[test]
fn struct_roundtrip_through_object_path() {
    let registry = registry();
    let line = ChatLine {
        author: "ada".into(),
        body: "hello".into(),
    };

    let mut writer = ObjectWriter::new(&registry);
    writer.put_message(&line).unwrap();
    let mut reader = ObjectReader::new(&registry, writer.finish());
    let decoded: ChatLine = reader.take_message().unwrap();
    assert_eq!(decoded, line);
}

#[test]
fn null_sentinel_roundtrip() {
    let registry = registry();
    let mut writer = ObjectWriter::new(&registry);
    writer.put_object(None).unwrap();
    let bytes = writer.finish();
    assert_eq!(bytes, vec![1u8]);

    let mut reader = ObjectReader::new(&registry, bytes);
    assert!(reader.take_object().unwrap().is_none());
}

#[test]
fn serde_bridge_roundtrip() {
    let registry = registry();
    let telemetry = Telemetry {
        sequence: 900,
        samples: vec![1.0, 2.5, -0.25],
        source: Some("probe-7".into()),
    };

    let mut writer = ObjectWriter::new(&registry);
    writer.put_message(&telemetry).unwrap();
    let mut reader = ObjectReader::new(&registry, writer.finish());
    let decoded: Telemetry = reader.take_message().unwrap();
    assert_eq!(decoded, telemetry);
}

#[test]
fn type_codes_are_stable_within_and_across_registries() {
    let first = CodecRegistry::new();
    let code_a = first.register::<ChatLine>().unwrap();
    let code_b = first.register::<ChatLine>().unwrap();
    assert_eq!(code_a, code_b);

    let second = CodecRegistry::new();
    assert_eq!(second.register::<ChatLine>().unwrap(), code_a);
}

#[test]
fn full_name_tag_roundtrip_without_promotion() {
    let registry = Arc::new(CodecRegistry::new());
    registry.register_named::<ChatLine>().expect("named");

    let line = ChatLine {
        author: "grace".into(),
        body: "tagged by name".into(),
    };

    let mut writer = ObjectWriter::new(&registry);
    writer.put_message(&line).unwrap();
    let bytes = writer.finish();

    // The full type name travels on the wire.
    let name = std::any::type_name::<ChatLine>();
    let haystack = bytes.clone();
    assert!(
        haystack
            .windows(name.len())
            .any(|window| window == name.as_bytes()),
        "expected the type name in the encoded bytes"
    );

    let mut reader = ObjectReader::new(&registry, bytes);
    let decoded: ChatLine = reader.take_message().unwrap();
    assert_eq!(decoded, line);

    // Decoding a full-name tag never assigns a compact code.
    assert_eq!(registry.code_of::<ChatLine>(), None);
}

#[test]
fn unregistered_type_fails_to_encode() {
    let registry = Arc::new(CodecRegistry::new());
    let line = ChatLine {
        author: "x".into(),
        body: "y".into(),
    };
    let mut writer = ObjectWriter::new(&registry);
    let err = writer.put_message(&line).unwrap_err();
    assert!(matches!(err, ProtocolError::NotRegistered(_)));
}

#[test]
fn truncated_object_fails_with_underflow() {
    let registry = registry();
    let line = ChatLine {
        author: "ada".into(),
        body: "a longer body that will be cut off".into(),
    };
    let mut writer = ObjectWriter::new(&registry);
    writer.put_message(&line).unwrap();
    let mut bytes = writer.finish();
    bytes.truncate(bytes.len() / 2);

    let mut reader = ObjectReader::new(&registry, bytes);
    let err = reader.take_message::<ChatLine>().unwrap_err();
    assert!(matches!(err, ProtocolError::Underflow { .. }));
}

#[test]
fn batch_inside_batch_roundtrips() {
    let registry = registry();
    let inner = DataMessage::new(vec![Box::new(ChatLine {
        author: "inner".into(),
        body: "payload".into(),
    }) as _]);
    let outer = DataMessage {
        sent: SystemTime::now(),
        messages: vec![
            Box::new(inner) as _,
            Box::new(ChatLine {
                author: "outer".into(),
                body: "tail".into(),
            }) as _,
        ],
    };

    let mut writer = ObjectWriter::new(&registry);
    writer.put_message(&outer).unwrap();
    let mut reader = ObjectReader::new(&registry, writer.finish());
    let decoded: DataMessage = reader.take_message().unwrap();

    let nested = decoded.messages[0]
        .downcast_ref::<DataMessage>()
        .expect("nested batch");
    assert_eq!(
        nested.messages[0].downcast_ref::<ChatLine>().unwrap().author,
        "inner"
    );
    assert_eq!(
        decoded.messages[1].downcast_ref::<ChatLine>().unwrap().body,
        "tail"
    );
}

//! # Codec Registry
//!
//! Maps runtime types to wire type codes and erased codec entries.
//!
//! The registry is an explicit object constructed once at process start and
//! passed by handle (`Arc<CodecRegistry>`) to every codec call site; there
//! is no process-global state. Entries are cached for the registry's
//! lifetime and never evicted, so registry size is bounded by the number of
//! distinct registered types.
//!
//! ## Type codes
//! A type's code is derived deterministically from its fully qualified name
//! (FNV-1a, folded to 16 bits) unless assigned explicitly, so independent
//! processes agree without a handshake. Two distinct types whose names fold
//! to the same code would corrupt decoding silently; registration therefore
//! rejects such collisions, and [`CodecRegistry::register_with_code`] is the
//! escape hatch for manual assignment.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::core::object::{Message, ObjectReader, ObjectWriter, Wire};
use crate::error::{constants, ProtocolError, Result};

type EncodeFn = fn(&dyn Message, &mut ObjectWriter<'_>) -> Result<()>;
type DecodeFn = fn(&mut ObjectReader<'_>) -> Result<Box<dyn Message>>;

/// One cached codec: a type's wire identity plus its erased function pair.
pub struct CodecEntry {
    code: Option<u16>,
    type_name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl CodecEntry {
    /// Compact wire code, if one was assigned at registration.
    pub fn code(&self) -> Option<u16> {
        self.code
    }

    /// Fully qualified type name used for full-name tags.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Encode an erased value through this entry.
    pub fn encode(&self, value: &dyn Message, writer: &mut ObjectWriter<'_>) -> Result<()> {
        (self.encode)(value, writer)
    }

    /// Decode an erased value through this entry.
    pub fn decode(&self, reader: &mut ObjectReader<'_>) -> Result<Box<dyn Message>> {
        (self.decode)(reader)
    }
}

impl fmt::Debug for CodecEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecEntry")
            .field("code", &self.code)
            .field("type_name", &self.type_name)
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    by_type: HashMap<TypeId, Arc<CodecEntry>>,
    by_code: HashMap<u16, Arc<CodecEntry>>,
    by_name: HashMap<&'static str, Arc<CodecEntry>>,
}

/// Type-to-codec registry shared by all writers and readers of one wire.
#[derive(Default)]
pub struct CodecRegistry {
    inner: RwLock<RegistryInner>,
}

impl CodecRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the 16-bit wire code for a fully qualified type name.
    ///
    /// FNV-1a over the name bytes, xor-folded down to 16 bits.
    pub fn short_code(name: &str) -> u16 {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = FNV_OFFSET;
        for byte in name.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        ((hash >> 48) ^ (hash >> 32) ^ (hash >> 16) ^ hash) as u16
    }

    /// Register `T` under its derived wire code. Idempotent per type;
    /// rejects 16-bit code collisions between distinct types.
    pub fn register<T>(&self) -> Result<u16>
    where
        T: Wire + fmt::Debug + Send + Sync + 'static,
    {
        let name = std::any::type_name::<T>();
        self.register_with_code::<T>(Self::short_code(name))
    }

    /// Register `T` under a manually assigned wire code.
    pub fn register_with_code<T>(&self, code: u16) -> Result<u16>
    where
        T: Wire + fmt::Debug + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        let name = std::any::type_name::<T>();

        let mut inner = self
            .inner
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.into()))?;

        if let Some(existing) = inner.by_code.get(&code) {
            if existing.type_name != name {
                return Err(ProtocolError::CodeCollision {
                    code,
                    existing: existing.type_name,
                    incoming: name,
                });
            }
        }

        if let Some(existing) = inner.by_type.get(&type_id) {
            if let Some(existing_code) = existing.code {
                // Already coded; re-registration is a no-op.
                return Ok(existing_code);
            }
            // Previously name-only; explicit re-registration assigns the code.
        }

        let entry = Arc::new(CodecEntry {
            code: Some(code),
            type_name: name,
            encode: encode_erased::<T>,
            decode: decode_erased::<T>,
        });

        inner.by_type.insert(type_id, entry.clone());
        inner.by_code.insert(code, entry.clone());
        inner.by_name.insert(name, entry);

        debug!(type_name = name, code, "Registered type code");
        Ok(code)
    }

    /// Register `T` without a compact code; values travel under a
    /// length-prefixed full-name tag instead.
    pub fn register_named<T>(&self) -> Result<()>
    where
        T: Wire + fmt::Debug + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        let name = std::any::type_name::<T>();

        let mut inner = self
            .inner
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.into()))?;

        if inner.by_type.contains_key(&type_id) {
            return Ok(());
        }

        let entry = Arc::new(CodecEntry {
            code: None,
            type_name: name,
            encode: encode_erased::<T>,
            decode: decode_erased::<T>,
        });

        inner.by_type.insert(type_id, entry.clone());
        inner.by_name.insert(name, entry);

        debug!(type_name = name, "Registered named type");
        Ok(())
    }

    /// Look up the codec entry for a runtime type.
    pub fn entry_of(&self, type_id: TypeId) -> Option<Arc<CodecEntry>> {
        self.inner.read().ok()?.by_type.get(&type_id).cloned()
    }

    /// Look up the codec entry for a wire code.
    pub fn entry_for_code(&self, code: u16) -> Option<Arc<CodecEntry>> {
        self.inner.read().ok()?.by_code.get(&code).cloned()
    }

    /// Look up the codec entry for a full type name.
    pub fn entry_for_name(&self, name: &str) -> Option<Arc<CodecEntry>> {
        self.inner.read().ok()?.by_name.get(name).cloned()
    }

    /// The wire code assigned to `T`, if any.
    pub fn code_of<T: 'static>(&self) -> Option<u16> {
        self.entry_of(TypeId::of::<T>())?.code()
    }

    /// Whether `T` has been registered in any form.
    pub fn is_registered<T: 'static>(&self) -> bool {
        self.entry_of(TypeId::of::<T>()).is_some()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.by_type.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("types", &self.len())
            .finish()
    }
}

fn encode_erased<T>(value: &dyn Message, writer: &mut ObjectWriter<'_>) -> Result<()>
where
    T: Wire + fmt::Debug + Send + Sync + 'static,
{
    let value = value
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| {
            ProtocolError::Decode(format!(
                "codec entry for {} fed a different type",
                std::any::type_name::<T>()
            ))
        })?;
    value.encode(writer)
}

fn decode_erased<T>(reader: &mut ObjectReader<'_>) -> Result<Box<dyn Message>>
where
    T: Wire + fmt::Debug + Send + Sync + 'static,
{
    Ok(Box::new(T::decode(reader)?))
}

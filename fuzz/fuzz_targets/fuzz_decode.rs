#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;

use http_transport::core::{CodecRegistry, ObjectReader};
use http_transport::protocol::register_builtin_messages;

fn registry() -> &'static CodecRegistry {
    static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = CodecRegistry::new();
        let _ = register_builtin_messages(&registry);
        registry
    })
}

fuzz_target!(|data: &[u8]| {
    // Fuzz object decoding - test for panics, crashes, runaway allocation
    let mut reader = ObjectReader::new(registry(), data.to_vec());
    let _ = reader.take_object();
});

//! Utility functions for id generation and key derivation

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32 with a human readable prefix
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

// derive a stable storage key from an ordered list of parts. The parts are
// encoded into CBOR first so the boundary between them survives hashing.
pub fn composite_key(parts: &[&str]) -> String {
    let cbor = minicbor::to_vec(parts).unwrap_or_default();
    sha256::digest(cbor)
}

use rand::RngCore;
use sha2::{Digest, Sha256};

const KEY_PREFIX: &str = "ak_";
const KEY_BYTES: usize = 16;

/// A freshly issued API key. The raw form is shown to the buyer exactly
/// once; only the digest is ever persisted or compared.
#[derive(Clone, Debug)]
pub struct IssuedKey {
    pub raw: String,
    pub digest: String,
}

pub fn issue_key() -> IssuedKey {
    let mut material = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut material);
    let raw = format!("{KEY_PREFIX}{}", hex_encode(&material));
    let digest = digest_key(&raw);
    IssuedKey { raw, digest }
}

/// SHA-256 over the raw key. Lookups hash the presented key and match on
/// the digest column, so an unknown key costs one indexed miss and leaks
/// nothing about stored keys.
pub fn digest_key(raw: &str) -> String {
    hex_encode(&Sha256::digest(raw.as_bytes()))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

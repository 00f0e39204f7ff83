//! Proof of work stamps
//!
//! A stamp reads `v1:<bits>:<nonce>:<binding>`. The sha256 of
//! `<input>:<bits>:<nonce>` must start with at least `<bits>` zero bits, and
//! `<binding>` is the owner's signature over the stamp prefix and the input
//! hash, so the work cannot be lifted onto another key. Anonymous stamps
//! carry an empty binding.

use ed25519_dalek::SigningKey;
use sha2::{Digest, Sha256};

use super::crypto;

const VERSION: &str = "v1";

pub fn leading_zero_bits(hash: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in hash {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

fn binding_input(bits: u32, nonce: u64, input: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        VERSION,
        bits,
        nonce,
        hex::encode(crypto::sha256(input.as_bytes()))
    )
}

/// Search for a nonce meeting `bits` and bind it to `key`.
pub fn create(input: &str, bits: u32, key: Option<&SigningKey>) -> String {
    let mut prefix = Sha256::new();
    prefix.update(input.as_bytes());
    prefix.update(format!(":{}:", bits).as_bytes());

    let mut nonce: u64 = 0;
    loop {
        let mut hasher = prefix.clone();
        hasher.update(nonce.to_string().as_bytes());
        if leading_zero_bits(&hasher.finalize()) >= bits {
            break;
        }
        nonce += 1;
    }

    let binding = key
        .map(|k| crypto::sign(&binding_input(bits, nonce, input), k))
        .unwrap_or_default();
    format!("{}:{}:{}:{}", VERSION, bits, nonce, binding)
}

/// Check a stamp against `input` and the owner's public key (empty for
/// anonymous). Returns the proven strength.
pub fn verify(input: &str, stamp: &str, public_key: &str) -> Result<u32, String> {
    let mut parts = stamp.splitn(4, ':');
    let (Some(version), Some(bits), Some(nonce), Some(binding)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("malformed stamp {:?}", stamp));
    };
    if version != VERSION {
        return Err(format!("unsupported stamp version {}", version));
    }
    let bits: u32 = bits.parse().map_err(|_| format!("bad strength {:?}", bits))?;
    let nonce: u64 = nonce.parse().map_err(|_| format!("bad nonce {:?}", nonce))?;

    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", input, bits, nonce).as_bytes());
    let proven = leading_zero_bits(&hasher.finalize());
    if proven < bits {
        return Err(format!("hash has {} zero bits, stamp claims {}", proven, bits));
    }

    if !crypto::verify_signature(&binding_input(bits, nonce, input), binding, public_key) {
        return Err("stamp is not bound to the owner key".to_string());
    }
    Ok(bits)
}

//! Hashing and ed25519 signing
//!
//! Signatures are made over the sha256 of the input, never the input itself.
//! Keys and signatures travel as lowercase hex.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// Content fingerprint: hex sha256 of the canonical input.
pub fn fingerprint_of(input: &str) -> String {
    hex::encode(sha256(input.as_bytes()))
}

pub fn public_key_hex(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_bytes())
}

pub fn sign(input: &str, key: &SigningKey) -> String {
    let digest = sha256(input.as_bytes());
    hex::encode(key.sign(&digest).to_bytes())
}

/// Check `signature` over `input` with a hex public key.
///
/// Both empty verifies (anonymous). Exactly one empty fails.
pub fn verify_signature(input: &str, signature: &str, public_key: &str) -> bool {
    match (signature.is_empty(), public_key.is_empty()) {
        (true, true) => return true,
        (true, false) | (false, true) => return false,
        (false, false) => {}
    }

    let Some(verifying_key) = parse_public_key(public_key) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_arr);
    let digest = sha256(input.as_bytes());
    verifying_key.verify(&digest, &signature).is_ok()
}

pub fn parse_public_key(public_key: &str) -> Option<VerifyingKey> {
    let bytes = hex::decode(public_key).ok()?;
    let arr: [u8; 32] = bytes.as_slice().try_into().ok()?;
    VerifyingKey::from_bytes(&arr).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::generate(&mut OsRng);
        let sig = sign("hello", &key);
        let pk = public_key_hex(&key);

        assert!(verify_signature("hello", &sig, &pk));
        assert!(!verify_signature("hello!", &sig, &pk));
    }

    #[test]
    fn test_empty_signature_rules() {
        let key = SigningKey::generate(&mut OsRng);
        let pk = public_key_hex(&key);

        assert!(verify_signature("x", "", ""));
        assert!(!verify_signature("x", "", &pk));
        assert!(!verify_signature("x", &sign("x", &key), ""));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let pk = public_key_hex(&key);
        assert!(!verify_signature("x", "zz", &pk));
        assert!(!verify_signature("x", "abcd", &pk));
        assert!(!verify_signature("x", &sign("x", &key), "not-hex"));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint_of("abc");
        assert_eq!(
            fp,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

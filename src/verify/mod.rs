//! Content trust model
//!
//! Every entity is checked in a fixed order, stopping at the first failure:
//! fingerprint, proof of work, owner/key binding, signature. Anonymous
//! entities (no owner) pass the last two only when they carry no signature.
//!
//! Keys are looked up in the batch being verified first, so a peer can ship
//! a key next to the content it signed, then in the local store.

pub mod crypto;
pub mod pow;

use ed25519_dalek::SigningKey;
use tracing::{debug, error, warn};

use crate::api::{Answer, ApiResponse, Entity, EntityKind, Key, Response, Seal};
use crate::config::PowConfig;
use crate::error::VerifyError;
use crate::store::Store;

/// Pages with this many bad fingerprints are thrown out whole.
pub const PAGE_FINGERPRINT_TOLERANCE: usize = 3;

// ============================================================================
// Single entity
// ============================================================================

/// Whether the fingerprint matches the entity's content.
pub fn check_fingerprint(entity: &Entity) -> bool {
    let expected = crypto::fingerprint_of(&entity.sealing_input(Seal::Fingerprint));
    !entity.fingerprint().is_empty() && entity.fingerprint() == expected
}

/// Verify an entity against the key that should own it. `key` is `None` for
/// anonymous entities.
pub fn verify(entity: &Entity, key: Option<&Key>, pow_config: &PowConfig) -> Result<(), VerifyError> {
    let fingerprint = entity.fingerprint().to_string();

    if !check_fingerprint(entity) {
        return Err(VerifyError::FingerprintInvalid(fingerprint));
    }

    let updated = entity.is_updated();
    let (signature, stamp, sig_seal, pow_seal) = match entity.updateable() {
        Some(u) if updated => (
            u.update_signature.as_str(),
            u.update_proof_of_work.as_str(),
            Seal::UpdateSignature,
            Seal::UpdateProofOfWork,
        ),
        _ => {
            let p = entity.provable();
            (
                p.signature.as_str(),
                p.proof_of_work.as_str(),
                Seal::Signature,
                Seal::ProofOfWork,
            )
        }
    };
    let public_key = key.map(|k| k.key.as_str()).unwrap_or("");

    let minimum = pow_config.minimum(entity.kind(), updated);
    match pow::verify(&entity.sealing_input(pow_seal), stamp, public_key) {
        Ok(bits) if bits >= minimum => {}
        Ok(bits) => {
            return Err(VerifyError::ProofOfWorkInvalid {
                fingerprint,
                reason: format!("strength {} below minimum {}", bits, minimum),
            })
        }
        Err(reason) => return Err(VerifyError::ProofOfWorkInvalid { fingerprint, reason }),
    }

    let key_fingerprint = key.map(|k| k.provable.fingerprint.as_str()).unwrap_or("");
    if entity.owner() != key_fingerprint {
        return Err(VerifyError::WrongKeyProvided {
            fingerprint,
            owner: entity.owner().to_string(),
            key: key_fingerprint.to_string(),
        });
    }

    if !crypto::verify_signature(&entity.sealing_input(sig_seal), signature, public_key) {
        return Err(VerifyError::SignatureInvalid(fingerprint));
    }
    Ok(())
}

/// Key that must have signed an entity with this owner.
///
/// Returns `Ok(None)` for anonymous owners. A key from the batch that fails
/// verification is `KeyInvalid`; one from the store is `StoreCorruption`.
pub fn find_key(
    owner: &str,
    batch: &Answer,
    store: &dyn Store,
    pow_config: &PowConfig,
) -> Result<Option<Key>, VerifyError> {
    if owner.is_empty() {
        return Ok(None);
    }

    if let Some(key) = batch.keys.iter().find(|k| k.provable.fingerprint == owner) {
        let entity = Entity::Key(key.clone());
        return match verify(&entity, Some(key), pow_config) {
            Ok(()) => Ok(Some(key.clone())),
            Err(e) => {
                debug!(key = owner, error = %e, "Key shipped in response failed verification");
                Err(VerifyError::KeyInvalid(owner.to_string()))
            }
        };
    }

    let mut stored = store
        .read_keys(owner)
        .map_err(|e| VerifyError::Store(format!("{:#}", e)))?;
    if stored.len() > 1 {
        error!(key = owner, count = stored.len(), "Store holds duplicate keys");
        return Err(VerifyError::StoreCorruption(format!(
            "{} rows for key {}",
            stored.len(),
            owner
        )));
    }
    let Some(key) = stored.pop() else {
        return Err(VerifyError::KeyNotFound(owner.to_string()));
    };

    if let Err(e) = verify(&Entity::Key(key.clone()), Some(&key), pow_config) {
        error!(key = owner, error = %e, "Stored key no longer verifies");
        return Err(VerifyError::StoreCorruption(format!("stored key {}: {}", owner, e)));
    }
    Ok(Some(key))
}

/// Find the owner's key and verify.
pub fn verify_with_lookup(
    entity: &Entity,
    batch: &Answer,
    store: &dyn Store,
    pow_config: &PowConfig,
) -> Result<(), VerifyError> {
    let key = find_key(entity.owner(), batch, store, pow_config)?;
    verify(entity, key.as_ref(), pow_config)
}

// ============================================================================
// Batches
// ============================================================================

/// Filter a response down to the entities that verify.
///
/// Failing entities are dropped and logged; the rest are kept. Addresses pass
/// through untouched. Returns the filtered response and the rejection count.
pub fn verify_response(
    response: Response,
    store: &dyn Store,
    pow_config: &PowConfig,
) -> (Response, usize) {
    let Response {
        body,
        cache_links,
        most_recent_source_timestamp,
    } = response;

    let mut kept = Answer {
        addresses: body.addresses.clone(),
        ..Default::default()
    };
    for kind in EntityKind::ALL {
        *kept.index_mut(kind) = body.index(kind).to_vec();
    }

    let mut rejected = 0;
    for entity in body.entities() {
        match verify_with_lookup(&entity, &body, store, pow_config) {
            Ok(()) => kept.push(entity),
            Err(VerifyError::StoreCorruption(msg)) => {
                rejected += 1;
                error!(fingerprint = entity.fingerprint(), "Store corruption: {}", msg);
            }
            Err(e) => {
                rejected += 1;
                warn!(
                    entity = %entity.kind(),
                    fingerprint = entity.fingerprint(),
                    error = %e,
                    "Rejected entity"
                );
            }
        }
    }

    (
        Response {
            body: kept,
            cache_links,
            most_recent_source_timestamp,
        },
        rejected,
    )
}

/// Entities in a page body whose fingerprint does not match their content.
pub fn fingerprint_failures(body: &Answer) -> usize {
    body.entities()
        .iter()
        .filter(|e| !check_fingerprint(e))
        .count()
}

// ============================================================================
// Pages
// ============================================================================

fn page_signing_input(page: &ApiResponse) -> String {
    let mut copy = page.clone();
    copy.signature.clear();
    serde_json::to_string(&copy).unwrap_or_default()
}

fn page_work_input(page: &ApiResponse) -> String {
    let mut copy = page.clone();
    copy.signature.clear();
    copy.proof_of_work.clear();
    serde_json::to_string(&copy).unwrap_or_default()
}

/// Check a page signature and return the node id of its signer.
///
/// Unsigned pages (no key, no signature) are accepted and keep the node id
/// they report.
pub fn verify_page(page: &ApiResponse) -> Result<String, VerifyError> {
    if !crypto::verify_signature(&page_signing_input(page), &page.signature, &page.node_public_key) {
        return Err(VerifyError::SignatureInvalid(format!(
            "page from {}",
            page.node_id
        )));
    }
    if page.node_public_key.is_empty() {
        return Ok(page.node_id.clone());
    }
    Ok(crypto::fingerprint_of(&page.node_public_key))
}

/// Check the proof of work on a presentation page.
pub fn verify_page_work(page: &ApiResponse, minimum: u32) -> Result<(), VerifyError> {
    let invalid = |reason: String| VerifyError::ProofOfWorkInvalid {
        fingerprint: page.node_id.clone(),
        reason,
    };
    let bits = pow::verify(&page_work_input(page), &page.proof_of_work, &page.node_public_key)
        .map_err(invalid)?;
    if bits < minimum {
        return Err(invalid(format!("strength {} below minimum {}", bits, minimum)));
    }
    Ok(())
}

/// Sign a page in place, filling in the signer's key and node id. With
/// `work_bits`, a proof of work is stamped first and covered by the
/// signature.
pub fn sign_page(page: &mut ApiResponse, key: &SigningKey, work_bits: Option<u32>) {
    page.node_public_key = crypto::public_key_hex(key);
    page.node_id = crypto::fingerprint_of(&page.node_public_key);
    page.signature.clear();
    page.proof_of_work = match work_bits {
        Some(bits) => pow::create(&page_work_input(page), bits, Some(key)),
        None => String::new(),
    };
    page.signature = crypto::sign(&page_signing_input(page), key);
}

// ============================================================================
// Sealing
// ============================================================================

/// Seal a freshly created entity: sign, stamp, then fingerprint.
pub fn seal(entity: &mut Entity, key: Option<&SigningKey>, bits: u32) {
    let signature = key
        .map(|k| crypto::sign(&entity.sealing_input(Seal::Signature), k))
        .unwrap_or_default();
    entity.provable_mut().signature = signature;

    let stamp = pow::create(&entity.sealing_input(Seal::ProofOfWork), bits, key);
    entity.provable_mut().proof_of_work = stamp;

    let fingerprint = crypto::fingerprint_of(&entity.sealing_input(Seal::Fingerprint));
    entity.provable_mut().fingerprint = fingerprint;
}

/// Seal an edit of an updateable entity. The caller sets `last_update` and
/// the changed fields first. No-op for immutable kinds.
pub fn seal_update(entity: &mut Entity, key: Option<&SigningKey>, bits: u32) {
    if entity.updateable().is_none() {
        return;
    }
    let signature = key
        .map(|k| crypto::sign(&entity.sealing_input(Seal::UpdateSignature), k))
        .unwrap_or_default();
    if let Some(u) = entity.updateable_mut() {
        u.update_signature = signature;
    }

    let stamp = pow::create(&entity.sealing_input(Seal::UpdateProofOfWork), bits, key);
    if let Some(u) = entity.updateable_mut() {
        u.update_proof_of_work = stamp;
    }
}

/// Create a sealed key entity for a signing key. A key owns itself, so its
/// fingerprint is computed before it can be referenced.
pub fn new_key_entity(signing_key: &SigningKey, name: &str, creation: i64, bits: u32) -> Key {
    let mut key = Key {
        key: crypto::public_key_hex(signing_key),
        key_type: "ed25519".to_string(),
        name: name.to_string(),
        ..Default::default()
    };
    key.provable.creation = creation;

    let mut entity = Entity::Key(key.clone());
    seal(&mut entity, Some(signing_key), bits);
    key.provable = entity.provable().clone();
    key
}

//! Deterministic input fingerprints for journaled futures.
//!
//! A fingerprint covers everything that determines what executing a future
//! does once its dependencies are resolved: kind, target, arguments, sender
//! and value. Comparing it against the journal detects modules that changed
//! between runs.

use serde::Serialize;

use crate::execute::ResolvedAction;
use crate::types::FutureId;

/// Bumped whenever the hashed layout changes.
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct FingerprintInput<'a> {
    version: u32,
    future_id: &'a FutureId,
    action: &'a ResolvedAction,
}

/// Compute the fingerprint of `action` for `id`.
///
/// # Algorithm
/// - Canonical JSON of `{version, future_id, action}` (maps are ordered)
/// - Hash format: `blake3(json)`
/// - Output: hex string
pub fn fingerprint(id: &FutureId, action: &ResolvedAction) -> Result<String, serde_json::Error> {
    let input = FingerprintInput {
        version: FORMAT_VERSION,
        future_id: id,
        action,
    };
    let encoded = serde_json::to_vec(&input)?;
    Ok(blake3::hash(&encoded).to_hex().to_string())
}

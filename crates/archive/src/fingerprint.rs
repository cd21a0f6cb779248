//! Deterministic archive fingerprints.
//!
//! A fingerprint is a UUIDv5 over the archive's sorted member paths joined
//! with the version being published. Two publishers packing the same member
//! set for the same version therefore always produce the same identifier,
//! which is what makes interrupted publishes restartable. Callers must
//! treat fingerprints as opaque strings.

use uuid::Uuid;

/// Compute the fingerprint for an archive holding `members`, published as
/// part of `version`.
///
/// Member order does not matter; the paths are sorted before hashing.
pub fn fingerprint<S: AsRef<str>>(members: &[S], version: &str) -> String {
    let mut paths: Vec<&str> = members.iter().map(|m| m.as_ref()).collect();
    paths.sort_unstable();
    let mut material = paths.join("\n");
    material.push('\n');
    material.push_str(version);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, material.as_bytes()).to_string()
}

//! Structural device fingerprint.
//!
//! Two devices share a signature when they expose the same ordered parameter
//! names. The device's display name never enters the hash, so every preset of
//! the same plugin structure resolves to one mapping.

use uuid::Uuid;

/// Fixed namespace for name-based (SHA-1) signature UUIDs.
const SIGNATURE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93b7_4d0e_8a51_c2f4_7d90_1b36);

/// Text that gets hashed: `"{count}|{comma-joined names}"`.
pub fn signature_source<S: AsRef<str>>(names: &[S]) -> String {
    let joined = names
        .iter()
        .map(|n| n.as_ref())
        .collect::<Vec<_>>()
        .join(",");
    format!("{}|{}", names.len(), joined)
}

/// Compute the signature for an ordered parameter name list.
///
/// Returns 32 lowercase hex characters. An empty list is a valid (degenerate)
/// input and yields a stable signature of its own.
pub fn compute_signature<S: AsRef<str>>(names: &[S]) -> String {
    let source = signature_source(names);
    Uuid::new_v5(&SIGNATURE_NAMESPACE, source.as_bytes())
        .simple()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_stable() {
        let names = ["Wet", "Dry", "Room Size", "Dampening"];
        assert_eq!(compute_signature(&names), compute_signature(&names));
        assert_eq!(compute_signature(&names).len(), 32);
    }

    #[test]
    fn test_signature_changes_with_names_or_count() {
        let base = compute_signature(&["Wet", "Dry", "Room Size"]);
        assert_ne!(base, compute_signature(&["Wet", "Dry", "Room size"]));
        assert_ne!(base, compute_signature(&["Wet", "Dry"]));
        assert_ne!(base, compute_signature(&["Dry", "Wet", "Room Size"]));
    }

    #[test]
    fn test_joined_names_do_not_collide_with_count() {
        // "a,b" as a single name must not hash like two names "a" and "b".
        assert_ne!(compute_signature(&["a,b"]), compute_signature(&["a", "b"]));
    }

    #[test]
    fn test_empty_signature_is_valid() {
        let empty: [&str; 0] = [];
        assert_eq!(signature_source(&empty), "0|");
        assert_eq!(compute_signature(&empty), compute_signature(&empty));
    }
}

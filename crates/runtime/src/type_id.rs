//! Content-addressed type identity.
//!
//! Two independently compiled binaries agree that a value is "the same type"
//! by hashing the type's canonical name with a fixed digest. No registry, no
//! coordination between the module compiler and the host: equal names produce
//! equal identifiers, and distinct names are assumed non-colliding.

use moult_abi::{TypeId, TYPE_ID_LEN};
use sha2::{Digest, Sha256};

/// Derive the identifier for a canonical type name.
///
/// Pure and deterministic: SHA-256 of the UTF-8 name, truncated to 16 bytes.
/// Both sides of the ABI must use this exact derivation.
pub fn type_id_of(canonical_name: &str) -> TypeId {
    let digest = Sha256::digest(canonical_name.as_bytes());
    let mut b = [0u8; TYPE_ID_LEN];
    b.copy_from_slice(&digest[..TYPE_ID_LEN]);
    TypeId { b }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_id() {
        assert_eq!(type_id_of("core::i64"), type_id_of("core::i64"));
        assert_eq!(type_id_of("Point"), type_id_of("Point"));
    }

    #[test]
    fn distinct_names_distinct_ids() {
        let corpus = [
            "core::bool",
            "core::i8",
            "core::i16",
            "core::i32",
            "core::i64",
            "core::u8",
            "core::u16",
            "core::u32",
            "core::u64",
            "core::f32",
            "core::f64",
            "core::empty",
            "struct",
            "Point",
            "Vector3",
            "game::Enemy",
        ];

        for (i, a) in corpus.iter().enumerate() {
            for b in &corpus[i + 1..] {
                assert_ne!(type_id_of(a), type_id_of(b), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn id_is_independent_of_call_site() {
        // The whole point: two computations that never share state agree.
        let first = type_id_of("game::Enemy");
        let second = type_id_of(&String::from("game::Enemy"));
        assert_eq!(first, second);
    }
}

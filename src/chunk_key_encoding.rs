use std::fmt::Write;

use crate::storage::StoreKey;

/// Key of the array metadata document.
pub const METADATA_KEY: &str = "array.json";

pub fn metadata_key() -> StoreKey {
    StoreKey::new(METADATA_KEY).expect("metadata key should be valid")
}

/// Encode chunk grid indices as a store key, one path segment per axis.
pub fn chunk_key(chunk_indices: &[u64]) -> StoreKey {
    let mut s = String::with_capacity(1 + chunk_indices.len() * 2);
    s.push('c');
    for idx in chunk_indices {
        s.push('/');
        s.write_fmt(format_args!("{idx}")).unwrap();
    }
    StoreKey::new(s).expect("chunk key should be valid")
}

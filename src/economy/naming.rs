//! Flexvol and qtree naming
//!
//! Owned Flexvols carry a fixed prefix plus the configured storage prefix, so
//! listing by prefix finds exactly the pool. Soft-deleted qtrees carry a
//! deletion marker so the reaper can find them.

use crate::error::{Error, Result};
use rand::Rng;

/// Prefix shared by every pooled Flexvol
pub const FLEXVOL_NAME_PREFIX: &str = "qtree_pool_";

/// Marker prepended to soft-deleted qtrees
pub const DELETED_QTREE_PREFIX: &str = "deleted_";

/// Longest qtree name the array accepts
pub const MAX_QTREE_NAME_LENGTH: usize = 64;

/// Smallest qtree a request may ask for (1 MiB)
pub const MIN_QTREE_SIZE_BYTES: u64 = 1024 * 1024;

/// Size of a freshly created Flexvol before the first qtree grows it (1 GiB)
pub const FLEXVOL_PLACEHOLDER_BYTES: u64 = 1024 * 1024 * 1024;

/// Permissions on the Flexvol root
pub const FLEXVOL_UNIX_PERMISSIONS: &str = "0711";

const FLEXVOL_SUFFIX_LENGTH: usize = 10;
const DELETED_SUFFIX_LENGTH: usize = 5;
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Prefix of every Flexvol owned by a driver with `storage_prefix`
pub fn flexvol_prefix(storage_prefix: &str) -> String {
    if storage_prefix.is_empty() {
        FLEXVOL_NAME_PREFIX.to_string()
    } else {
        format!("{}{}_", FLEXVOL_NAME_PREFIX, storage_prefix)
    }
}

/// Lowercase alphanumeric suffix of `len` characters
pub fn random_suffix<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

/// New Flexvol name under `prefix`
pub fn new_flexvol_name<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    format!("{}{}", prefix, random_suffix(rng, FLEXVOL_SUFFIX_LENGTH))
}

/// Random suffix for a soft-delete rename
pub fn deleted_suffix<R: Rng + ?Sized>(rng: &mut R) -> String {
    random_suffix(rng, DELETED_SUFFIX_LENGTH)
}

/// Soft-delete name for `name`.
///
/// Shape is `deleted_<name>_<suffix>`. When that exceeds
/// [`MAX_QTREE_NAME_LENGTH`] the tail of `name` is cut so the marker and the
/// full suffix always survive; the same inputs always give the same output.
pub fn deleted_qtree_name(name: &str, suffix: &str) -> String {
    let candidate = format!("{}{}_{}", DELETED_QTREE_PREFIX, name, suffix);
    if candidate.len() <= MAX_QTREE_NAME_LENGTH {
        return candidate;
    }

    let room = MAX_QTREE_NAME_LENGTH.saturating_sub(DELETED_QTREE_PREFIX.len() + 1 + suffix.len());
    let mut end = room.min(name.len());
    while !name.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}{}_{}", DELETED_QTREE_PREFIX, &name[..end], suffix)
}

/// Whether a qtree has been soft-deleted
pub fn is_deleted_qtree(name: &str) -> bool {
    name.starts_with(DELETED_QTREE_PREFIX)
}

/// Check a caller-supplied qtree name
pub fn validate_qtree_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidVolumeName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_QTREE_NAME_LENGTH {
        return Err(invalid(&format!(
            "name is longer than {} characters",
            MAX_QTREE_NAME_LENGTH
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("only letters, digits, and underscores are allowed"));
    }
    if is_deleted_qtree(name) {
        return Err(invalid("names may not start with the deletion marker"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_flexvol_prefix() {
        assert_eq!(flexvol_prefix("prod"), "qtree_pool_prod_");
        assert_eq!(flexvol_prefix(""), "qtree_pool_");

        let mut rng = StdRng::seed_from_u64(7);
        let name = new_flexvol_name("qtree_pool_prod_", &mut rng);
        assert!(name.starts_with("qtree_pool_prod_"));
        assert_eq!(name.len(), "qtree_pool_prod_".len() + 10);
    }

    #[test]
    fn test_deleted_name_short() {
        assert_eq!(deleted_qtree_name("q1", "abcde"), "deleted_q1_abcde");
        assert!(is_deleted_qtree("deleted_q1_abcde"));
        assert!(!is_deleted_qtree("q1"));
    }

    #[test]
    fn test_deleted_name_truncation() {
        let name = "a".repeat(MAX_QTREE_NAME_LENGTH);
        let deleted = deleted_qtree_name(&name, "xyz12");
        assert_eq!(deleted.len(), MAX_QTREE_NAME_LENGTH);
        assert!(deleted.starts_with(DELETED_QTREE_PREFIX));
        assert!(deleted.ends_with("_xyz12"));

        // Same inputs, same output
        assert_eq!(deleted, deleted_qtree_name(&name, "xyz12"));
    }

    #[test]
    fn test_truncated_names_stay_unique() {
        let name = "b".repeat(60);
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let deleted = deleted_qtree_name(&name, &deleted_suffix(&mut rng));
            assert!(deleted.len() <= MAX_QTREE_NAME_LENGTH);
            seen.insert(deleted);
        }
        // Distinct suffixes yield distinct names
        assert!(seen.len() > 490);
    }

    #[test]
    fn test_validate_qtree_name() {
        assert!(validate_qtree_name("pvc_1234").is_ok());
        assert!(validate_qtree_name("").is_err());
        assert!(validate_qtree_name("has-dash").is_err());
        assert!(validate_qtree_name("deleted_q1").is_err());
        assert!(validate_qtree_name(&"x".repeat(65)).is_err());
        assert!(validate_qtree_name(&"x".repeat(64)).is_ok());
    }
}

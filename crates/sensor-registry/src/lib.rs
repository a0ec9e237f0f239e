//! Bidirectional sensor name/hash registry.
//!
//! The registry maps a human-readable sensor name to the stable 64-bit hash
//! used as the sensor's identity everywhere else in the system (storage,
//! the engine, output sinks). Name is a display attribute only — it is
//! never used for equality or lookup once a `SensorKey` has been minted.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Stable 64-bit sensor identifier.
pub type SensorHash = i64;

/// An immutable (hash, name) pair. Equality and ordering are by hash only,
/// matching the data model's "equality by hash" invariant.
#[derive(Debug, Clone)]
pub struct SensorKey {
    hash: SensorHash,
    name: String,
}

impl SensorKey {
    /// Build a key from an explicit name and hash. Callers that don't have
    /// an explicit hash should go through [`SensorKey::from_name`] instead.
    fn new(name: impl Into<String>, hash: SensorHash) -> Self {
        Self {
            hash,
            name: name.into(),
        }
    }

    /// Derive the canonical hash for a name and build a key from it.
    #[must_use]
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let hash = hash_name(&name);
        Self { hash, name }
    }

    #[must_use]
    pub fn hash(&self) -> SensorHash {
        self.hash
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for SensorKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for SensorKey {}

impl PartialOrd for SensorKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SensorKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.hash.cmp(&other.hash)
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.hash)
    }
}

/// FNV-1a over the UTF-8 bytes of `name`, reinterpreted as a signed 64-bit
/// hash. Deterministic across process restarts and platforms, which is the
/// data model's only requirement on the hash function — adapters never
/// need to know which function produced a given identity.
#[must_use]
pub fn hash_name(name: &str) -> SensorHash {
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET_BASIS;
    for byte in name.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as i64
}

/// Errors raised while building or looking up a registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate sensor name: {0}")]
    DuplicateName(String),
    #[error("duplicate sensor hash {0} (names {1:?} and {2:?})")]
    DuplicateHash(SensorHash, String, String),
    #[error("empty sensor name at entry {0}")]
    EmptyName(usize),
    #[error("malformed registry entry at line {0}: {1}")]
    Malformed(usize, String),
}

/// Read-only bidirectional lookup, consulted by storage adapters and by
/// output formatting. Implementations are expected to be cheap to clone
/// (an `Arc` around an immutable map, typically) since every engine
/// instance, storage adapter, and sink formatter holds one.
pub trait SensorRegistry: Send + Sync {
    fn hash_to_name(&self, hash: SensorHash) -> Option<&str>;
    fn name_to_hash(&self, name: &str) -> Option<SensorHash>;
    fn contains(&self, hash: SensorHash) -> bool {
        self.hash_to_name(hash).is_some()
    }
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-memory registry built from a fixed set of `SensorKey`s, loaded once
/// at process start.
#[derive(Debug, Default, Clone)]
pub struct InMemorySensorRegistry {
    by_hash: HashMap<SensorHash, String>,
    by_name: HashMap<String, SensorHash>,
}

impl InMemorySensorRegistry {
    /// Build a registry from a set of entries, rejecting duplicates by
    /// name or by hash as required by the data model.
    pub fn build(entries: Vec<SensorKey>) -> Result<Self, RegistryError> {
        let mut by_hash = HashMap::with_capacity(entries.len());
        let mut by_name = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.into_iter().enumerate() {
            if entry.name.is_empty() {
                return Err(RegistryError::EmptyName(idx));
            }
            if let Some(existing) = by_name.insert(entry.name.clone(), entry.hash) {
                if existing != entry.hash {
                    return Err(RegistryError::DuplicateName(entry.name));
                }
                continue;
            }
            if let Some(existing_name) = by_hash.insert(entry.hash, entry.name.clone()) {
                return Err(RegistryError::DuplicateHash(
                    entry.hash,
                    existing_name,
                    entry.name,
                ));
            }
        }
        Ok(Self { by_hash, by_name })
    }

    /// Parse the reference newline-delimited `name[,hash]` text format.
    ///
    /// A line with only a name derives its hash via [`hash_name`]; a line
    /// with an explicit `name,hash` pins the hash (useful for migrating an
    /// existing on-disk identity scheme into the registry). Blank lines and
    /// lines starting with `#` are ignored.
    pub fn parse(source: &str) -> Result<Self, RegistryError> {
        let mut entries = Vec::new();
        for (line_no, raw_line) in source.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, ',');
            let name = parts.next().unwrap_or("").trim();
            if name.is_empty() {
                return Err(RegistryError::Malformed(
                    line_no + 1,
                    "missing sensor name".to_owned(),
                ));
            }
            let key = match parts.next() {
                Some(hash_str) => {
                    let hash = hash_str.trim().parse::<SensorHash>().map_err(|_| {
                        RegistryError::Malformed(line_no + 1, format!("bad hash {hash_str:?}"))
                    })?;
                    SensorKey::new(name, hash)
                }
                None => SensorKey::from_name(name),
            };
            entries.push(key);
        }
        Self::build(entries)
    }

    /// Every sensor hash known to this registry. Used by callers that
    /// default a sensor-set selector to "everything in the registry".
    #[must_use]
    pub fn all_hashes(&self) -> Vec<SensorHash> {
        self.by_hash.keys().copied().collect()
    }
}

impl SensorRegistry for InMemorySensorRegistry {
    fn hash_to_name(&self, hash: SensorHash) -> Option<&str> {
        self.by_hash.get(&hash).map(String::as_str)
    }

    fn name_to_hash(&self, name: &str) -> Option<SensorHash> {
        self.by_name.get(name).copied()
    }

    fn len(&self) -> usize {
        self.by_hash.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_name_is_deterministic() {
        assert_eq!(hash_name("pump-1"), hash_name("pump-1"));
        assert_ne!(hash_name("pump-1"), hash_name("pump-2"));
    }

    #[test]
    fn build_rejects_duplicate_name_with_different_hash() {
        let entries = vec![SensorKey::new("pump-1", 1), SensorKey::new("pump-1", 2)];
        let err = InMemorySensorRegistry::build(entries).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("pump-1".to_owned()));
    }

    #[test]
    fn build_allows_repeated_identical_entry() {
        let entries = vec![SensorKey::new("pump-1", 1), SensorKey::new("pump-1", 1)];
        let registry = InMemorySensorRegistry::build(entries).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn build_rejects_duplicate_hash_across_names() {
        let entries = vec![SensorKey::new("pump-1", 1), SensorKey::new("pump-2", 1)];
        let err = InMemorySensorRegistry::build(entries).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateHash(1, "pump-1".to_owned(), "pump-2".to_owned())
        );
    }

    #[test]
    fn build_rejects_empty_name() {
        let entries = vec![SensorKey::new("", 1)];
        let err = InMemorySensorRegistry::build(entries).unwrap_err();
        assert_eq!(err, RegistryError::EmptyName(0));
    }

    #[test]
    fn parse_derives_hash_when_absent_and_honors_explicit_hash() {
        let registry = InMemorySensorRegistry::parse(
            "# comment\npump-1\nvalve-2,42\n\nvalve-3, 43\n",
        )
        .unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.name_to_hash("pump-1"), Some(hash_name("pump-1")));
        assert_eq!(registry.name_to_hash("valve-2"), Some(42));
        assert_eq!(registry.name_to_hash("valve-3"), Some(43));
        assert_eq!(registry.hash_to_name(42), Some("valve-2"));
    }

    #[test]
    fn parse_rejects_malformed_hash() {
        let err = InMemorySensorRegistry::parse("pump-1,not-a-number\n").unwrap_err();
        assert!(matches!(err, RegistryError::Malformed(1, _)));
    }

    #[test]
    fn registry_round_trips_lookups_both_directions() {
        let registry =
            InMemorySensorRegistry::build(vec![SensorKey::from_name("pump-1")]).unwrap();
        let hash = registry.name_to_hash("pump-1").unwrap();
        assert_eq!(registry.hash_to_name(hash), Some("pump-1"));
        assert!(registry.contains(hash));
        assert!(!registry.is_empty());
    }
}

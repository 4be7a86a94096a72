//! In-memory authoritative record store
//!
//! Maps canonical DNS names to typed, insertion-ordered record data.
//! Names are stored lowercase; duplicate rdata within a (name, type)
//! bucket is rejected. Entries appear when a peer is accepted and
//! disappear on removal; nothing survives the process.

use std::collections::HashMap;

use hickory_proto::rr::{Name, RData, RecordType};
use tracing::debug;

/// The record store. Not shareable by itself; wrap in a lock when
/// written from multiple tasks.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: HashMap<Name, HashMap<RecordType, Vec<RData>>>,
}

impl RecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Returns `false` (and changes nothing) when the
    /// identical rdata is already present for the name and type.
    pub fn add(&mut self, name: &Name, rtype: RecordType, rdata: RData) -> bool {
        let bucket = self
            .records
            .entry(name.to_lowercase())
            .or_default()
            .entry(rtype)
            .or_default();
        if bucket.contains(&rdata) {
            debug!("Record {} {} already present", name, rtype);
            return false;
        }
        bucket.push(rdata);
        true
    }

    /// Remove records with a three-level cascade: exact rdata, all of
    /// a type, or everything under the name.
    pub fn remove(&mut self, name: &Name, rtype: Option<RecordType>, rdata: Option<&RData>) {
        let key = name.to_lowercase();
        let Some(types) = self.records.get_mut(&key) else {
            return;
        };
        match (rtype, rdata) {
            (Some(rtype), Some(rdata)) => {
                if let Some(bucket) = types.get_mut(&rtype) {
                    bucket.retain(|existing| existing != rdata);
                    if bucket.is_empty() {
                        types.remove(&rtype);
                    }
                }
            }
            (Some(rtype), None) => {
                types.remove(&rtype);
            }
            (None, _) => {
                types.clear();
            }
        }
        if types.is_empty() {
            self.records.remove(&key);
        }
    }

    /// Records for a (name, type) pair, in insertion order. Empty when
    /// unknown.
    pub fn get(&self, name: &Name, rtype: RecordType) -> Vec<RData> {
        self.records
            .get(&name.to_lowercase())
            .and_then(|types| types.get(&rtype))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether any record exists under the name
    pub fn has(&self, name: &Name) -> bool {
        self.records.contains_key(&name.to_lowercase())
    }

    /// Deep copy of the whole store, for diagnostics
    pub fn all(&self) -> Vec<(Name, RecordType, Vec<RData>)> {
        let mut out = Vec::new();
        for (name, types) in &self.records {
            for (rtype, bucket) in types {
                out.push((name.clone(), *rtype, bucket.clone()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::{A, AAAA};
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn name(s: &str) -> Name {
        Name::from_ascii(s).unwrap()
    }

    fn aaaa(s: &str) -> RData {
        RData::AAAA(AAAA(s.parse::<Ipv6Addr>().unwrap()))
    }

    #[test]
    fn test_add_and_get() {
        let mut store = RecordStore::new();
        assert!(store.add(&name("h1.zerowire."), RecordType::AAAA, aaaa("fd01::1")));
        assert_eq!(
            store.get(&name("h1.zerowire."), RecordType::AAAA),
            vec![aaaa("fd01::1")]
        );
    }

    #[test]
    fn test_duplicate_suppressed() {
        let mut store = RecordStore::new();
        assert!(store.add(&name("h1.zerowire."), RecordType::AAAA, aaaa("fd01::1")));
        assert!(!store.add(&name("h1.zerowire."), RecordType::AAAA, aaaa("fd01::1")));
        assert_eq!(
            store.get(&name("h1.zerowire."), RecordType::AAAA),
            vec![aaaa("fd01::1")]
        );
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut store = RecordStore::new();
        store.add(&name("h1.zerowire."), RecordType::AAAA, aaaa("fd01::2"));
        store.add(&name("h1.zerowire."), RecordType::AAAA, aaaa("fd01::1"));
        assert_eq!(
            store.get(&name("h1.zerowire."), RecordType::AAAA),
            vec![aaaa("fd01::2"), aaaa("fd01::1")]
        );
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut store = RecordStore::new();
        store.add(&name("H1.ZeroWire."), RecordType::AAAA, aaaa("fd01::1"));
        assert_eq!(
            store.get(&name("h1.zerowire."), RecordType::AAAA).len(),
            1
        );
        assert!(store.has(&name("h1.ZEROWIRE.")));
    }

    #[test]
    fn test_remove_exact() {
        let mut store = RecordStore::new();
        store.add(&name("h1.zerowire."), RecordType::AAAA, aaaa("fd01::1"));
        store.add(&name("h1.zerowire."), RecordType::AAAA, aaaa("fd01::2"));
        let gone = aaaa("fd01::1");
        store.remove(&name("h1.zerowire."), Some(RecordType::AAAA), Some(&gone));
        assert_eq!(
            store.get(&name("h1.zerowire."), RecordType::AAAA),
            vec![aaaa("fd01::2")]
        );
    }

    #[test]
    fn test_remove_type() {
        let mut store = RecordStore::new();
        store.add(&name("h1.zerowire."), RecordType::AAAA, aaaa("fd01::1"));
        store.add(
            &name("h1.zerowire."),
            RecordType::A,
            RData::A(A(Ipv4Addr::new(192, 0, 2, 1))),
        );
        store.remove(&name("h1.zerowire."), Some(RecordType::AAAA), None);
        assert!(store.get(&name("h1.zerowire."), RecordType::AAAA).is_empty());
        assert!(!store.get(&name("h1.zerowire."), RecordType::A).is_empty());
    }

    #[test]
    fn test_remove_name() {
        let mut store = RecordStore::new();
        store.add(&name("h1.zerowire."), RecordType::AAAA, aaaa("fd01::1"));
        store.remove(&name("h1.zerowire."), None, None);
        assert!(!store.has(&name("h1.zerowire.")));
    }

    #[test]
    fn test_all_is_deep_copy() {
        let mut store = RecordStore::new();
        store.add(&name("h1.zerowire."), RecordType::AAAA, aaaa("fd01::1"));
        let snapshot = store.all();
        store.remove(&name("h1.zerowire."), None, None);
        assert_eq!(snapshot.len(), 1);
    }
}

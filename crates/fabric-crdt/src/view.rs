//! CRDT view & delta (spec.md §4.D): the model a `diff` call serves to a
//! remote peer, keyed by a deterministic `DeepHash` over the canonical fetch
//! query so concurrent identical queries share one underlying model.

use std::collections::HashMap;

use dashmap::DashMap;
use fabric_record::HashOutput;
use serde::Serialize;

use crate::delta::{self, Patch};
use crate::error::CrdtError;
use crate::model::{Id1, NodeValues};

/// `{list, nodesById1, dataById1}` (spec.md §4.D).
#[derive(Default)]
pub struct CrdtModel {
    pub list: Vec<[u8; 32]>,
    pub nodes_by_id1: HashMap<[u8; 32], NodeValues>,
    pub data_by_id1: HashMap<[u8; 32], Vec<u8>>,
    deleted_at: HashMap<[u8; 32], u64>,
}

impl CrdtModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server-side `diff`: given the authoritative ordering (already
    /// computed via §4.C) produce the delta frame to ship plus the set of
    /// `id1`s whose data the peer needs alongside it.
    pub fn diff(&mut self, authoritative: &[NodeValues]) -> (Vec<u8>, Vec<Id1>) {
        let new_list: Vec<[u8; 32]> = authoritative.iter().map(|e| *e.id1.as_bytes()).collect();
        let patch = delta::diff(&self.list, &new_list);
        let frame = delta::encode_frame(&patch);

        let mut missing = Vec::new();
        for entry in authoritative {
            let key = *entry.id1.as_bytes();
            match self.nodes_by_id1.get(&key) {
                None => missing.push(entry.id1),
                Some(previous) => {
                    if previous.transient_hash != entry.transient_hash
                        || previous.annotations != entry.annotations
                    {
                        missing.push(entry.id1);
                    }
                }
            }
        }

        self.list = new_list;
        for entry in authoritative {
            self.nodes_by_id1.insert(*entry.id1.as_bytes(), entry.clone());
            self.deleted_at.remove(entry.id1.as_bytes());
        }
        (frame, missing)
    }

    /// Consumer-side apply: reconstruct the list from `frame`, mark any
    /// dropped `id1` deleted (with `now` as its deletion timestamp), and
    /// purge entries whose grace period has elapsed.
    pub fn apply(&mut self, frame: &[u8], now: u64, grace_period: u64) -> Result<(), CrdtError> {
        let patch: Patch = delta::decode_frame(frame)?;
        let new_list =
            delta::apply(&self.list, &patch).map_err(CrdtError::MalformedPatch)?;
        let new_set: std::collections::HashSet<[u8; 32]> = new_list.iter().copied().collect();
        for &id in &self.list {
            if !new_set.contains(&id) {
                self.deleted_at.entry(id).or_insert(now);
            }
        }

        let expired: Vec<[u8; 32]> = self
            .deleted_at
            .iter()
            .filter(|(_, &deleted)| now.saturating_sub(deleted) >= grace_period)
            .map(|(&id, _)| id)
            .collect();
        for id in expired {
            self.deleted_at.remove(&id);
            self.nodes_by_id1.remove(&id);
            self.data_by_id1.remove(&id);
        }

        self.list = new_list;
        Ok(())
    }

    pub fn insert_data(&mut self, id1: Id1, bytes: Vec<u8>) {
        self.data_by_id1.insert(*id1.as_bytes(), bytes);
    }
}

/// Deterministic hash over the canonical fetch query (every field except
/// the CRDT cursor/head/tail/reverse, the query-time cutoff, and trigger
/// options) that identifies a shared model instance (spec.md §4.D).
///
/// `serde_json`'s default `Map` is `BTreeMap`-backed (the `preserve_order`
/// feature is not enabled anywhere in this workspace), so `to_value` already
/// produces a canonical, key-sorted tree; `HashList` over that JSON's bytes
/// is the `DeepHash`.
pub fn deep_hash<Q: Serialize>(query: &Q) -> Result<HashOutput, CrdtError> {
    let value = serde_json::to_value(query)
        .map_err(|_| CrdtError::MalformedPatch("query is not serializable"))?;
    let canonical = serde_json::to_vec(&value)
        .map_err(|_| CrdtError::MalformedPatch("query is not serializable"))?;
    Ok(fabric_record::hash_list(&[Some(canonical.as_slice())]))
}

/// Registry of live models keyed by `DeepHash`, with a GC sweep over models
/// that haven't been touched in `idle_after` (spec.md §5's "configurable GC
/// removes cold keys").
pub struct ViewRegistry {
    models: DashMap<[u8; 32], (CrdtModel, u64)>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self {
            models: DashMap::new(),
        }
    }

    /// Run `f` against the model for `key`, creating it if absent, and
    /// stamp its last-touched time to `now`.
    pub fn with_model<F, R>(&self, key: HashOutput, now: u64, f: F) -> R
    where
        F: FnOnce(&mut CrdtModel) -> R,
    {
        let mut entry = self.models.entry(*key.as_bytes()).or_insert_with(|| (CrdtModel::new(), now));
        entry.1 = now;
        f(&mut entry.0)
    }

    /// Remove every model whose last touch is older than `idle_after`
    /// relative to `now`; returns the number of models dropped.
    pub fn gc_idle(&self, now: u64, idle_after: u64) -> usize {
        let stale: Vec<[u8; 32]> = self
            .models
            .iter()
            .filter(|entry| now.saturating_sub(entry.value().1) >= idle_after)
            .map(|entry| *entry.key())
            .collect();
        for key in &stale {
            self.models.remove(key);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_record::HashOutput;

    fn node(id: u8, transient: u8, creation_time: u64) -> NodeValues {
        NodeValues {
            id1: HashOutput::new([id; 32]),
            id2: None,
            owner: vec![id],
            transient_hash: HashOutput::new([transient; 32]),
            creation_time,
            transient_storage_time: 0,
            ref_id: None,
            annotations: None,
        }
    }

    #[test]
    fn diff_then_apply_reconstructs_list() {
        let mut server = CrdtModel::new();
        let (frame, missing) = server.diff(&[node(1, 1, 10), node(2, 1, 20)]);
        assert_eq!(missing.len(), 2);

        let mut client = CrdtModel::new();
        client.apply(&frame, 0, 3600).unwrap();
        assert_eq!(client.list, server.list);
    }

    #[test]
    fn diff_reports_transient_hash_changes_as_missing() {
        let mut server = CrdtModel::new();
        server.diff(&[node(1, 1, 10)]);
        let (_frame, missing) = server.diff(&[node(1, 2, 10)]);
        assert_eq!(missing.len(), 1);
    }

    #[test]
    fn deep_hash_is_order_independent_key_wise() {
        #[derive(Serialize)]
        struct Query {
            a: u32,
            b: u32,
        }
        #[derive(Serialize)]
        struct QueryReordered {
            b: u32,
            a: u32,
        }
        let h1 = deep_hash(&Query { a: 1, b: 2 }).unwrap();
        let h2 = deep_hash(&QueryReordered { b: 2, a: 1 }).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn gc_idle_removes_stale_models() {
        let registry = ViewRegistry::new();
        registry.with_model(HashOutput::new([1u8; 32]), 0, |_| ());
        registry.with_model(HashOutput::new([2u8; 32]), 100, |_| ());
        let removed = registry.gc_idle(200, 150);
        assert_eq!(removed, 1);
        assert_eq!(registry.len(), 1);
    }
}

//! Annotation CRDT (spec.md §4.G): folds edit, reaction, and nested-
//! conversation facts from child records onto a parent's `annotations`
//! field, invoked by the ordering algorithms (§4.C) whenever a record's
//! `parentId` resolves to an existing entry.
//!
//! The packer that would carry `isAnnotationEdit`/`isAnnotationReaction` as
//! dedicated flag bits is out of scope (spec.md §1); this crate reads the
//! same distinction off `modelType` (`"edt"` / `"rxn"`, anything else is a
//! nested-conversation reply), recorded as an Open Question resolution.

use std::collections::HashMap;

use fabric_record::{indexes, PackedRecord};
use serde::Serialize;

use crate::error::CrdtError;
use crate::model::Id1;

/// Maximum serialized size of one parent's condensed `annotations` export
/// (spec.md §4.G).
pub const MAX_ANNOTATION_BYTES: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
struct EditNode {
    id1: [u8; 32],
    owner: Vec<u8>,
    creation_time: u64,
    body: Vec<u8>,
}

#[derive(Clone, Debug)]
struct ReactionEvent {
    is_react: bool,
    creation_time: u64,
    id1: [u8; 32],
}

/// Per-parent aggregate state; `export()` condenses this into the JSON image
/// stored on the parent's `NodeValues::annotations`.
#[derive(Default)]
struct Aggregate {
    edit: Option<EditNode>,
    /// Keyed by `(reactionName, ownerHex)`; only the newest event per key is
    /// kept (spec.md §4.G).
    reactions: HashMap<(String, String), ReactionEvent>,
    has_nested_conversation: bool,
}

#[derive(Serialize)]
struct ReactionSummary {
    count: usize,
    #[serde(rename = "publicKeys")]
    public_keys: Vec<String>,
}

#[derive(Serialize)]
struct ReactionsExport {
    #[serde(rename = "hasMore")]
    has_more: bool,
    reactions: std::collections::BTreeMap<String, ReactionSummary>,
}

#[derive(Serialize)]
struct EditExport {
    id1: String,
    owner: String,
    #[serde(rename = "creationTime")]
    creation_time: u64,
}

#[derive(Serialize)]
struct AnnotationsExport {
    edit: Option<EditExport>,
    #[serde(rename = "hasNestedConversation")]
    has_nested_conversation: bool,
    reactions: ReactionsExport,
}

fn classify(record: &PackedRecord) -> Classification {
    match record.field_payload(indexes::MODEL_TYPE) {
        Some(b"edt") => Classification::Edit,
        Some(b"rxn") => Classification::Reaction,
        _ => Classification::NestedConversation,
    }
}

enum Classification {
    Edit,
    Reaction,
    NestedConversation,
}

/// Owns the per-parent aggregate state and produces the condensed JSON image
/// stored in [`crate::model::NodeValues::annotations`].
pub struct AnnotationAggregator {
    by_parent: HashMap<[u8; 32], Aggregate>,
}

impl AnnotationAggregator {
    pub fn new() -> Self {
        Self {
            by_parent: HashMap::new(),
        }
    }

    /// Fold `record`'s annotation fact onto `parent_id1` (whose owner is
    /// `parent_owner`, needed to check the edit-ownership rule) and return
    /// the re-condensed `annotations` JSON image.
    pub fn apply(
        &mut self,
        parent_id1: Id1,
        parent_owner: &[u8],
        record: &PackedRecord,
    ) -> Result<serde_json::Value, CrdtError> {
        let aggregate = self.by_parent.entry(*parent_id1.as_bytes()).or_default();

        let owner = record.field_payload(indexes::OWNER).unwrap_or(&[]).to_vec();
        let creation_time = record
            .field_payload(indexes::CREATION_TIME)
            .map(|bytes| bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
            .unwrap_or(0);
        let id1 = record
            .field_payload(indexes::ID1)
            .and_then(|b| <[u8; 32]>::try_from(b).ok())
            .unwrap_or([0u8; 32]);

        match classify(record) {
            Classification::Edit if owner == parent_owner => {
                let candidate = EditNode {
                    id1,
                    owner,
                    creation_time,
                    body: record
                        .field_payload(indexes::ANNOTATION_BODY)
                        .unwrap_or(&[])
                        .to_vec(),
                };
                let replace = match &aggregate.edit {
                    None => true,
                    Some(current) => {
                        (candidate.creation_time, candidate.id1) > (current.creation_time, current.id1)
                    }
                };
                if replace {
                    aggregate.edit = Some(candidate);
                }
            }
            Classification::Edit => {
                // isAnnotationEdit but owner mismatch: falls through to
                // nested-conversation per spec.md §4.G's `else` chain.
                aggregate.has_nested_conversation = true;
            }
            Classification::Reaction => {
                if let Some(body) = record.field_payload(indexes::ANNOTATION_BODY) {
                    let text = String::from_utf8_lossy(body);
                    let (is_react, name) = if let Some(rest) = text.strip_prefix("react/") {
                        (true, rest.to_string())
                    } else if let Some(rest) = text.strip_prefix("unreact/") {
                        (false, rest.to_string())
                    } else {
                        aggregate.has_nested_conversation = true;
                        return export(aggregate, parent_owner);
                    };
                    let owner_hex = hex::encode(&owner);
                    let key = (name, owner_hex);
                    let newer = ReactionEvent { is_react, creation_time, id1 };
                    let replace = match aggregate.reactions.get(&key) {
                        None => true,
                        Some(current) => (newer.creation_time, newer.id1) > (current.creation_time, current.id1),
                    };
                    if replace {
                        aggregate.reactions.insert(key, newer);
                    }
                }
            }
            Classification::NestedConversation => {
                aggregate.has_nested_conversation = true;
            }
        }

        export(aggregate, parent_owner)
    }
}

impl Default for AnnotationAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn export(aggregate: &Aggregate, target_owner: &[u8]) -> Result<serde_json::Value, CrdtError> {
    let mut by_name: std::collections::BTreeMap<String, Vec<(String, u64)>> = Default::default();
    for ((name, owner_hex), event) in &aggregate.reactions {
        if event.is_react {
            by_name
                .entry(name.clone())
                .or_default()
                .push((owner_hex.clone(), event.creation_time));
        }
    }
    let target_hex = hex::encode(target_owner);
    for list in by_name.values_mut() {
        list.sort_by(|a, b| {
            let a_is_target = a.0 == target_hex;
            let b_is_target = b.0 == target_hex;
            b_is_target.cmp(&a_is_target).then_with(|| b.1.cmp(&a.1))
        });
    }

    let mut has_more = false;
    loop {
        let reactions: std::collections::BTreeMap<String, ReactionSummary> = by_name
            .iter()
            .map(|(name, owners)| {
                (
                    name.clone(),
                    ReactionSummary {
                        count: owners.len(),
                        public_keys: owners.iter().map(|(hex, _)| hex.clone()).collect(),
                    },
                )
            })
            .collect();

        let export = AnnotationsExport {
            edit: aggregate.edit.as_ref().map(|e| EditExport {
                id1: hex::encode(e.id1),
                owner: hex::encode(&e.owner),
                creation_time: e.creation_time,
            }),
            has_nested_conversation: aggregate.has_nested_conversation,
            reactions: ReactionsExport {
                has_more,
                reactions,
            },
        };
        let value = serde_json::to_value(&export).expect("annotations export serializes");
        let size = serde_json::to_vec(&value).expect("annotations export serializes").len();
        if size <= MAX_ANNOTATION_BYTES {
            return Ok(value);
        }

        let largest = by_name
            .iter()
            .max_by_key(|(_, owners)| owners.len())
            .map(|(name, _)| name.clone());
        match largest {
            Some(name) => {
                let list = by_name.get_mut(&name).expect("key just looked up");
                if list.is_empty() {
                    return Err(CrdtError::AnnotationOverflow);
                }
                let keep = list.len() / 2;
                list.truncate(keep);
                has_more = true;
                if keep == 0 {
                    return Err(CrdtError::AnnotationOverflow);
                }
            }
            None => return Err(CrdtError::AnnotationOverflow),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_record::encode_field;

    fn reaction_record(kind: &str, owner: u8, creation_time: u64) -> PackedRecord {
        let mut buf = Vec::new();
        buf.extend(encode_field(indexes::MODEL_TYPE, 0, b"rxn"));
        buf.extend(encode_field(indexes::OWNER, 0, &[owner]));
        buf.extend(encode_field(indexes::CREATION_TIME, 0, &creation_time.to_be_bytes()));
        buf.extend(encode_field(indexes::ANNOTATION_BODY, 0, kind.as_bytes()));
        PackedRecord::parse(&buf).unwrap()
    }

    fn reaction_record_full_key(kind: &str, owner: [u8; 32], creation_time: u64) -> PackedRecord {
        let mut buf = Vec::new();
        buf.extend(encode_field(indexes::MODEL_TYPE, 0, b"rxn"));
        buf.extend(encode_field(indexes::OWNER, 0, &owner));
        buf.extend(encode_field(indexes::CREATION_TIME, 0, &creation_time.to_be_bytes()));
        buf.extend(encode_field(indexes::ANNOTATION_BODY, 0, kind.as_bytes()));
        PackedRecord::parse(&buf).unwrap()
    }

    fn edit_record(owner: u8, creation_time: u64, id1: u8, body: &[u8]) -> PackedRecord {
        let mut buf = Vec::new();
        buf.extend(encode_field(indexes::MODEL_TYPE, 0, b"edt"));
        buf.extend(encode_field(indexes::OWNER, 0, &[owner]));
        buf.extend(encode_field(indexes::CREATION_TIME, 0, &creation_time.to_be_bytes()));
        buf.extend(encode_field(indexes::ANNOTATION_BODY, 0, body));
        buf.extend(encode_field(indexes::ID1, 0, &[id1; 32]));
        PackedRecord::parse(&buf).unwrap()
    }

    #[test]
    fn reactions_accumulate_and_unreact_removes_them() {
        let mut aggregator = AnnotationAggregator::new();
        let parent = fabric_record::HashOutput::new([1u8; 32]);
        aggregator.apply(parent, b"parent-owner", &reaction_record("react/thumbsup", 1, 10)).unwrap();
        let image = aggregator.apply(parent, b"parent-owner", &reaction_record("react/thumbsup", 2, 20)).unwrap();
        assert_eq!(image["reactions"]["reactions"]["thumbsup"]["count"], 2);

        let image = aggregator
            .apply(parent, b"parent-owner", &reaction_record("unreact/thumbsup", 1, 30))
            .unwrap();
        assert_eq!(image["reactions"]["reactions"]["thumbsup"]["count"], 1);
    }

    #[test]
    fn edit_requires_matching_owner_and_newest_wins() {
        let mut aggregator = AnnotationAggregator::new();
        let parent = fabric_record::HashOutput::new([1u8; 32]);
        let image = aggregator
            .apply(parent, b"owner-a", &edit_record(b'a', 10, 1, b"first"))
            .unwrap();
        assert_eq!(image["edit"]["creationTime"], 10);

        let image = aggregator
            .apply(parent, b"owner-a", &edit_record(b'a', 20, 2, b"second"))
            .unwrap();
        assert_eq!(image["edit"]["creationTime"], 20);

        // A child from a different owner never replaces the edit.
        let image = aggregator
            .apply(parent, b"owner-a", &edit_record(b'b', 30, 3, b"intruder"))
            .unwrap();
        assert_eq!(image["edit"]["creationTime"], 20);
        assert_eq!(image["hasNestedConversation"], true);
    }

    #[test]
    fn unrecognized_model_type_sets_nested_conversation() {
        let mut aggregator = AnnotationAggregator::new();
        let parent = fabric_record::HashOutput::new([1u8; 32]);
        let mut buf = Vec::new();
        buf.extend(encode_field(indexes::MODEL_TYPE, 0, b"msg"));
        buf.extend(encode_field(indexes::OWNER, 0, b"x"));
        let record = PackedRecord::parse(&buf).unwrap();
        let image = aggregator.apply(parent, b"parent-owner", &record).unwrap();
        assert_eq!(image["hasNestedConversation"], true);
    }

    #[test]
    fn reaction_list_halves_until_it_fits() {
        let mut aggregator = AnnotationAggregator::new();
        let parent = fabric_record::HashOutput::new([1u8; 32]);
        let mut last = serde_json::Value::Null;
        for i in 0..300u64 {
            let mut owner = [0u8; 32];
            owner[0] = (i % 255) as u8;
            owner[1] = (i / 255) as u8;
            last = aggregator
                .apply(parent, b"parent-owner", &reaction_record_full_key("react/fire", owner, i))
                .unwrap();
        }
        let size = serde_json::to_vec(&last).unwrap().len();
        assert!(size <= MAX_ANNOTATION_BYTES);
        assert_eq!(last["reactions"]["hasMore"], true);
    }
}

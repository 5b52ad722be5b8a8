//! Permission structure and the per-action filter applied by the router
//! (spec.md §4.E, §6).

use crate::route::{EmbedSpecName, FetchRequest, IncludeLicenses, MessageRequest, ReadBlobRequest,
    StoreRequest, UnsubscribeRequest, WriteBlobRequest};

#[derive(Debug, Clone, Default)]
pub struct StorePermissions {
    pub allow_store: bool,
    pub allow_write_blob: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FetchPermissions {
    pub allow_node_types: Vec<Vec<u8>>,
    pub allow_embed: Vec<EmbedSpecName>,
    pub allow_algos: Vec<String>,
    pub allow_trigger: bool,
    pub allow_read_blob: bool,
    pub allow_include_licenses: IncludeLicenses,
}

#[derive(Debug, Clone, Default)]
pub struct Permissions {
    pub allow_unchecked_access: bool,
    pub store_permissions: StorePermissions,
    pub fetch_permissions: FetchPermissions,
}

/// Applies [`Permissions`] to an inbound request, coercing identity fields
/// to the remote/local keys the table in spec.md §4.E names and rejecting
/// requests the permission set disallows.
pub struct PermissionFilter<'a> {
    permissions: &'a Permissions,
    local_public_key: Vec<u8>,
}

impl<'a> PermissionFilter<'a> {
    pub fn new(permissions: &'a Permissions, local_public_key: Vec<u8>) -> Self {
        Self { permissions, local_public_key }
    }

    fn unchecked(&self) -> bool {
        self.permissions.allow_unchecked_access
    }

    pub fn check_store(&self, remote: &[u8], request: &mut StoreRequest) -> bool {
        if self.unchecked() {
            return true;
        }
        if !self.permissions.store_permissions.allow_store {
            return false;
        }
        request.source_public_key = remote.to_vec();
        request.target_public_key = remote.to_vec();
        true
    }

    pub fn check_write_blob(&self, remote: &[u8], request: &mut WriteBlobRequest) -> bool {
        if self.unchecked() {
            return true;
        }
        if !self.permissions.store_permissions.allow_write_blob {
            return false;
        }
        request.source_public_key = remote.to_vec();
        request.target_public_key = self.local_public_key.clone();
        true
    }

    pub fn check_read_blob(&self, remote: &[u8], request: &mut ReadBlobRequest) -> bool {
        if self.unchecked() {
            return true;
        }
        if !self.permissions.fetch_permissions.allow_read_blob {
            return false;
        }
        request.source_public_key = self.local_public_key.clone();
        request.target_public_key = remote.to_vec();
        true
    }

    pub fn check_unsubscribe(&self, remote: &[u8], request: &mut UnsubscribeRequest) -> bool {
        request.target_public_key = Some(remote.to_vec());
        true
    }

    pub fn check_message(&self, remote: &[u8], request: &mut MessageRequest) -> bool {
        request.source_public_key = Some(remote.to_vec());
        true
    }

    /// Apply the fetch permission table: trigger gating, node-type prefix
    /// matching, algorithm allow-list, `allowEmbed` intersection (deduped by
    /// `DeepHash`), license clamping, and region/jurisdiction intersection.
    pub fn check_fetch(
        &self,
        local_region: Option<&str>,
        local_jurisdiction: Option<&str>,
        request: &mut FetchRequest,
    ) -> bool {
        if self.unchecked() {
            return true;
        }
        let permissions = &self.permissions.fetch_permissions;

        let has_trigger = request.trigger_node_id.is_some() || request.trigger_interval.is_some();
        if has_trigger && !permissions.allow_trigger {
            return false;
        }

        for requested in &request.node_types {
            let allowed = permissions
                .allow_node_types
                .iter()
                .any(|prefix| requested.starts_with(prefix.as_slice()));
            if !allowed {
                return false;
            }
        }

        if !request.algo.is_empty() && !permissions.allow_algos.iter().any(|a| a == &request.algo) {
            return false;
        }

        request.embed.retain(|spec| {
            permissions
                .allow_embed
                .iter()
                .any(|allowed| allowed.node_type == spec.node_type)
        });
        dedup_embed_by_deep_hash(&mut request.embed);

        request.include_licenses = IncludeLicenses::clamp(request.include_licenses, permissions.allow_include_licenses);

        request.region = intersect(request.region.as_deref(), local_region);
        request.jurisdiction = intersect(request.jurisdiction.as_deref(), local_jurisdiction);

        true
    }
}

fn intersect(requested: Option<&str>, local: Option<&str>) -> Option<String> {
    match (requested, local) {
        (Some(a), Some(b)) if a == b => Some(a.to_string()),
        _ => None,
    }
}

/// Dedup `embed` entries by `DeepHash` over their `(nodeType)` key, the same
/// convention `fabric-crdt::view` uses for view fingerprints.
fn dedup_embed_by_deep_hash(embed: &mut Vec<EmbedSpecName>) {
    let mut seen = std::collections::HashSet::new();
    embed.retain(|spec| {
        let hash = fabric_crdt::deep_hash(&spec.node_type).ok();
        match hash {
            Some(h) => seen.insert(*h.as_bytes()),
            None => true,
        }
    });
}

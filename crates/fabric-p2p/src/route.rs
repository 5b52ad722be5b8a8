//! Typed request/response shapes (spec.md §4.E, §6), replacing the source's
//! string-keyed dispatch with a closed `RouteAction` enum and one variant per
//! action (spec.md §9).

use serde::{Deserialize, Serialize};

use crate::error::Status;
use crate::filter::FilterExpr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteAction {
    Store,
    Fetch,
    Unsubscribe,
    ReadBlob,
    WriteBlob,
    Message,
}

/// Tri-state permission clamp for license inclusion (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludeLicenses {
    #[default]
    None,
    Include,
    Extend,
    IncludeExtend,
}

impl IncludeLicenses {
    /// Clamp a requested tri-state to what the permission allows: a request
    /// for more than the permission's own setting is downgraded, never
    /// upgraded.
    pub fn clamp(requested: IncludeLicenses, allowed: IncludeLicenses) -> IncludeLicenses {
        use IncludeLicenses::*;
        let rank = |v: IncludeLicenses| match v {
            None => 0,
            Include => 1,
            Extend => 1,
            IncludeExtend => 2,
        };
        if rank(requested) <= rank(allowed) {
            requested
        } else {
            allowed
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbedSpec {
    pub node_type: Vec<u8>,
    pub filters: Vec<FilterExpr>,
}

#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub source_public_key: Vec<u8>,
    pub target_public_key: Vec<u8>,
    pub records: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct StoreResponse {
    pub status: Status,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WriteBlobRequest {
    pub source_public_key: Vec<u8>,
    pub target_public_key: Vec<u8>,
    pub blob_id: Vec<u8>,
    pub offset: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct WriteBlobResponse {
    pub status: Status,
    pub fseek: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReadBlobRequest {
    pub source_public_key: Vec<u8>,
    pub target_public_key: Vec<u8>,
    pub blob_id: Vec<u8>,
    pub offset: u64,
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ReadBlobResponse {
    pub status: Status,
    pub seq: u32,
    pub end_seq: u32,
    pub data: Vec<u8>,
    pub pos: u64,
    pub size: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub source_public_key: Option<Vec<u8>>,
    pub node_types: Vec<Vec<u8>>,
    pub algo: String,
    pub embed: Vec<EmbedSpecName>,
    pub include_licenses: IncludeLicenses,
    pub region: Option<String>,
    pub jurisdiction: Option<String>,
    pub trigger_node_id: Option<[u8; 32]>,
    pub trigger_interval: Option<u64>,
    pub cursor_id1: Option<[u8; 32]>,
    pub head: i64,
    pub tail: i64,
    pub reverse: bool,
    pub filter: Option<FilterExpr>,
}

/// Just the `nodeType`/filter-name-set shape needed for the `allowEmbed`
/// intersection; kept distinct from [`EmbedSpec`] because inbound requests
/// don't carry a compiled filter, only field selectors.
#[derive(Debug, Clone, Default)]
pub struct EmbedSpecName {
    pub node_type: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: Status,
    pub seq: u32,
    pub end_seq: u32,
    pub records: Vec<Vec<u8>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UnsubscribeRequest {
    pub target_public_key: Option<Vec<u8>>,
    pub msg_id: u64,
}

#[derive(Debug, Clone)]
pub struct UnsubscribeResponse {
    pub status: Status,
}

#[derive(Debug, Clone)]
pub struct MessageRequest {
    pub source_public_key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MessageResponse {
    pub status: Status,
    pub payload: Option<Vec<u8>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Request {
    Store(StoreRequest),
    Fetch(FetchRequest),
    ReadBlob(ReadBlobRequest),
    WriteBlob(WriteBlobRequest),
    Unsubscribe(UnsubscribeRequest),
    Message(MessageRequest),
}

impl Request {
    pub fn action(&self) -> RouteAction {
        match self {
            Request::Store(_) => RouteAction::Store,
            Request::Fetch(_) => RouteAction::Fetch,
            Request::ReadBlob(_) => RouteAction::ReadBlob,
            Request::WriteBlob(_) => RouteAction::WriteBlob,
            Request::Unsubscribe(_) => RouteAction::Unsubscribe,
            Request::Message(_) => RouteAction::Message,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Response {
    Store(StoreResponse),
    Fetch(FetchResponse),
    ReadBlob(ReadBlobResponse),
    WriteBlob(WriteBlobResponse),
    Unsubscribe(UnsubscribeResponse),
    Message(MessageResponse),
}

impl Response {
    pub fn status(&self) -> Status {
        match self {
            Response::Store(r) => r.status,
            Response::Fetch(r) => r.status,
            Response::ReadBlob(r) => r.status,
            Response::WriteBlob(r) => r.status,
            Response::Unsubscribe(r) => r.status,
            Response::Message(r) => r.status,
        }
    }

    /// Build the `NotAllowed` shape for `action` (spec.md §4.E: "reply with
    /// the action's `NotAllowed` response shape and stop processing").
    pub fn not_allowed(action: RouteAction) -> Self {
        match action {
            RouteAction::Store => Response::Store(StoreResponse { status: Status::NotAllowed, error: None }),
            RouteAction::Fetch => Response::Fetch(FetchResponse {
                status: Status::NotAllowed,
                seq: 1,
                end_seq: 1,
                records: Vec::new(),
                error: None,
            }),
            RouteAction::ReadBlob => Response::ReadBlob(ReadBlobResponse {
                status: Status::NotAllowed,
                seq: 1,
                end_seq: 1,
                data: Vec::new(),
                pos: 0,
                size: None,
                error: None,
            }),
            RouteAction::WriteBlob => {
                Response::WriteBlob(WriteBlobResponse { status: Status::NotAllowed, fseek: None, error: None })
            }
            RouteAction::Unsubscribe => Response::Unsubscribe(UnsubscribeResponse { status: Status::NotAllowed }),
            RouteAction::Message => {
                Response::Message(MessageResponse { status: Status::NotAllowed, payload: None, error: None })
            }
        }
    }
}

/// Wire envelope: `{routeAction, msgId, expectingReply, data}` (spec.md §6).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub route_action: RouteAction,
    pub msg_id: u64,
    pub expecting_reply: bool,
    pub seq: u32,
    pub end_seq: u32,
}

//! Server-side routing: permission filtering then dispatch (spec.md §4.E).
//!
//! Actual storage/blob/CRDT-model plumbing is injected via [`Backend`] — no
//! disk storage layout is in scope here (spec.md §1's Non-goals), only the
//! routing, permission, and response-shaping logic that sits in front of it.

use crate::error::Status;
use crate::permissions::{Permissions, PermissionFilter};
use crate::route::{
    FetchRequest, FetchResponse, MessageRequest, MessageResponse, ReadBlobRequest, ReadBlobResponse,
    Request, Response, StoreRequest, StoreResponse, UnsubscribeRequest, UnsubscribeResponse,
    WriteBlobRequest, WriteBlobResponse,
};

/// The storage/transport-facing operations a concrete deployment wires up;
/// the router only handles permission filtering and response shaping.
pub trait Backend: Send + Sync {
    fn store(&self, request: &StoreRequest) -> Result<(), String>;
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<Vec<u8>>, Status>;
    fn read_blob(&self, request: &ReadBlobRequest) -> Result<Vec<u8>, String>;
    fn write_blob(&self, request: &WriteBlobRequest) -> Result<Option<u64>, String>;
    fn message(&self, request: &MessageRequest) -> Result<Option<Vec<u8>>, String>;
}

pub struct Router<'a, B: Backend> {
    permissions: &'a Permissions,
    local_public_key: Vec<u8>,
    local_region: Option<String>,
    local_jurisdiction: Option<String>,
    backend: &'a B,
}

impl<'a, B: Backend> Router<'a, B> {
    pub fn new(
        permissions: &'a Permissions,
        local_public_key: Vec<u8>,
        local_region: Option<String>,
        local_jurisdiction: Option<String>,
        backend: &'a B,
    ) -> Self {
        Self { permissions, local_public_key, local_region, local_jurisdiction, backend }
    }

    /// Apply the permission filter for `request`'s action, then dispatch to
    /// [`Backend`]. On a permission failure, returns the action's
    /// `NotAllowed` response shape (spec.md §4.E) without touching the
    /// backend.
    pub fn route(&self, remote: &[u8], mut request: Request) -> Response {
        let filter = PermissionFilter::new(self.permissions, self.local_public_key.clone());
        match &mut request {
            Request::Store(r) => {
                if !filter.check_store(remote, r) {
                    return Response::not_allowed(request.action());
                }
                self.dispatch_store(r)
            }
            Request::WriteBlob(r) => {
                if !filter.check_write_blob(remote, r) {
                    return Response::not_allowed(request.action());
                }
                self.dispatch_write_blob(r)
            }
            Request::ReadBlob(r) => {
                if !filter.check_read_blob(remote, r) {
                    return Response::not_allowed(request.action());
                }
                self.dispatch_read_blob(r)
            }
            Request::Fetch(r) => {
                if !filter.check_fetch(self.local_region.as_deref(), self.local_jurisdiction.as_deref(), r) {
                    return Response::not_allowed(request.action());
                }
                self.dispatch_fetch(r)
            }
            Request::Unsubscribe(r) => {
                filter.check_unsubscribe(remote, r);
                self.dispatch_unsubscribe(r)
            }
            Request::Message(r) => {
                filter.check_message(remote, r);
                self.dispatch_message(r)
            }
        }
    }

    fn dispatch_store(&self, request: &StoreRequest) -> Response {
        match self.backend.store(request) {
            Ok(()) => Response::Store(StoreResponse { status: Status::Result, error: None }),
            Err(error) => Response::Store(StoreResponse { status: Status::Error, error: Some(error) }),
        }
    }

    fn dispatch_write_blob(&self, request: &WriteBlobRequest) -> Response {
        match self.backend.write_blob(request) {
            Ok(fseek) => Response::WriteBlob(WriteBlobResponse { status: Status::Result, fseek, error: None }),
            Err(error) => {
                Response::WriteBlob(WriteBlobResponse { status: Status::Error, fseek: None, error: Some(error) })
            }
        }
    }

    fn dispatch_read_blob(&self, request: &ReadBlobRequest) -> Response {
        match self.backend.read_blob(request) {
            Ok(data) => Response::ReadBlob(ReadBlobResponse {
                status: Status::Result,
                seq: 1,
                end_seq: 1,
                size: Some(data.len() as u64),
                pos: request.offset,
                data,
                error: None,
            }),
            Err(error) => Response::ReadBlob(ReadBlobResponse {
                status: Status::Error,
                seq: 1,
                end_seq: 1,
                data: Vec::new(),
                pos: request.offset,
                size: None,
                error: Some(error),
            }),
        }
    }

    fn dispatch_fetch(&self, request: &FetchRequest) -> Response {
        match self.backend.fetch(request) {
            Ok(records) => {
                Response::Fetch(FetchResponse { status: Status::Result, seq: 1, end_seq: 1, records, error: None })
            }
            Err(status) => {
                Response::Fetch(FetchResponse { status, seq: 1, end_seq: 1, records: Vec::new(), error: None })
            }
        }
    }

    fn dispatch_unsubscribe(&self, _request: &UnsubscribeRequest) -> Response {
        Response::Unsubscribe(UnsubscribeResponse { status: Status::Result })
    }

    fn dispatch_message(&self, request: &MessageRequest) -> Response {
        match self.backend.message(request) {
            Ok(payload) => Response::Message(MessageResponse { status: Status::Result, payload, error: None }),
            Err(error) => Response::Message(MessageResponse { status: Status::Error, payload: None, error: Some(error) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::StorePermissions;

    struct EchoBackend;
    impl Backend for EchoBackend {
        fn store(&self, _: &StoreRequest) -> Result<(), String> {
            Ok(())
        }
        fn fetch(&self, _: &FetchRequest) -> Result<Vec<Vec<u8>>, Status> {
            Ok(vec![b"record".to_vec()])
        }
        fn read_blob(&self, _: &ReadBlobRequest) -> Result<Vec<u8>, String> {
            Ok(vec![1, 2, 3])
        }
        fn write_blob(&self, _: &WriteBlobRequest) -> Result<Option<u64>, String> {
            Ok(None)
        }
        fn message(&self, request: &MessageRequest) -> Result<Option<Vec<u8>>, String> {
            Ok(Some(request.payload.clone()))
        }
    }

    #[test]
    fn store_without_permission_returns_not_allowed_without_touching_backend() {
        let permissions = Permissions::default();
        let backend = EchoBackend;
        let router = Router::new(&permissions, b"local".to_vec(), None, None, &backend);
        let response = router.route(
            b"remote",
            Request::Store(StoreRequest { source_public_key: vec![], target_public_key: vec![], records: vec![] }),
        );
        assert_eq!(response.status(), Status::NotAllowed);
    }

    #[test]
    fn store_with_permission_dispatches_to_backend() {
        let mut permissions = Permissions::default();
        permissions.store_permissions = StorePermissions { allow_store: true, allow_write_blob: false };
        let backend = EchoBackend;
        let router = Router::new(&permissions, b"local".to_vec(), None, None, &backend);
        let response = router.route(
            b"remote",
            Request::Store(StoreRequest { source_public_key: vec![], target_public_key: vec![], records: vec![] }),
        );
        assert_eq!(response.status(), Status::Result);
    }

    #[test]
    fn message_always_allowed_and_echoes_payload() {
        let permissions = Permissions::default();
        let backend = EchoBackend;
        let router = Router::new(&permissions, b"local".to_vec(), None, None, &backend);
        let response = router.route(
            b"remote",
            Request::Message(MessageRequest { source_public_key: None, payload: b"hi".to_vec() }),
        );
        match response {
            Response::Message(r) => assert_eq!(r.payload, Some(b"hi".to_vec())),
            _ => panic!("expected message response"),
        }
    }
}

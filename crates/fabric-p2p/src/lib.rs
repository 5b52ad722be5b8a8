//! Typed P2P request/response router: permission filtering, serialization
//! format negotiation, session lifecycle, and the send-side `GetResponse`
//! handle (spec.md §4.E, §6).

pub mod error;
pub mod filter;
pub mod format;
pub mod get_response;
pub mod permissions;
pub mod route;
pub mod router;
pub mod session;

pub use error::{P2pError, Status};
pub use filter::{BitOp, Cmp, FilterExpr, Operator};
pub use format::{negotiate as negotiate_format, FormatInfo};
pub use get_response::{channel as get_response_channel, GetResponse, GetResponseEvent, GetResponseSender};
pub use permissions::{FetchPermissions, Permissions, PermissionFilter, StorePermissions};
pub use route::{
    Envelope, IncludeLicenses, Request, Response, RouteAction,
};
pub use router::{Backend, Router};
pub use session::{Session, SessionParams};

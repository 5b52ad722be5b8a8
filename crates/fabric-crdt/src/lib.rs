//! Deterministic CRDT ordering over signed records, the view/delta engine
//! that serves that ordering to remote peers, and the annotation aggregator
//! invoked when an ordering instance runs in annotation mode.

pub mod annotations;
pub mod delta;
pub mod error;
pub mod model;
pub mod ordering;
pub mod view;

pub use annotations::AnnotationAggregator;
pub use error::CrdtError;
pub use model::{node_values_from_record, Id1, NodeValues};
pub use ordering::{AlgoRefId, AlgoSorted, AlgoSortedRefId, AnnotationConfig, OrderingAlgo};
pub use view::{deep_hash, CrdtModel, ViewRegistry};

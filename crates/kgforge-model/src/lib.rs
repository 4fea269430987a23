//! kgforge graph data model
//!
//! The types in this crate are shared by every stage of the construction
//! engine:
//!
//! - `identifier`: canonical `scheme:type:segments...` identifiers
//! - `value`: the tagged attribute value model (decided once, never re-inspected)
//! - `graph`: nodes, edges, confidences and pending reference descriptors
//! - `document`: the flat graph document handed to storage loaders
//! - `digest`: deterministic non-cryptographic digests for stable ids
//!
//! Nothing here performs I/O; the engine crate owns scheduling and reporting.

pub mod digest;
pub mod document;
pub mod graph;
pub mod identifier;
pub mod value;

pub use document::{EdgeRecord, GraphDocument, NodeRecord, GRAPH_DOCUMENT_VERSION_V1};
pub use graph::{
    dedup_edges, Confidence, Edge, EdgeReason, Node, RawReference, ReferenceDescriptor,
    UNRESOLVED_REFERENCE_TYPE,
};
pub use identifier::{
    is_canonical_text, is_well_formed, normalize_identifier, percent_decode, validate_identifier, IdPattern,
    IdentifierError, NodeId, DEFAULT_SCHEME,
};
pub use value::{attributes_to_json, Attributes, Scalar, Value};

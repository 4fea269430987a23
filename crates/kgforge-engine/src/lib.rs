//! # kgforge-engine
//!
//! Turns a batch of loosely structured candidate records into a graph of
//! uniquely identified nodes and validated, typed edges.
//!
//! ```text
//! records ──build (parallel)──▶ nodes + pending refs ──merge──▶ frozen index
//!         ──resolve (parallel)──▶ edges ──link orphans──▶ ──deduplicate──▶
//!         ──validate / repair──▶ graph document + validation report
//! ```
//!
//! Per-record failures never abort the batch; they are collected into the
//! [`ValidationReport`]. Only a hard validator failure (an engine invariant
//! violated in the final graph) returns [`EngineError::HardFailure`].
//!
//! The engine logs through `tracing` and never installs a subscriber.

pub mod builder;
pub mod candidate;
pub mod config;
pub mod dedup;
pub mod error;
pub mod index;
pub mod linker;
pub mod naming;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod validate;

pub use builder::{BuildOutcome, EntityBuilder};
pub use candidate::{CandidateBatch, CandidateRecord, FieldMap, FsRecordLoader, NoLoader, RecordLoader};
pub use config::{
    BuilderConfig, DedupConfig, EngineConfig, FuzzyTiePolicy, IdentifierPolicy, LabelRule,
    LinkDirection, LinkerConfig, NamingRule, ReferenceFieldRule, ResolverConfig, ValidatorConfig,
};
pub use dedup::{
    deduplicate, merge_group, merge_nodes, GroupMerge, MergeConflict, MergeRecord, MergeTrigger, MergedNode,
};
pub use error::{EngineError, RecordError};
pub use index::{EntityIndex, IndexBuilder, PendingNode};
pub use linker::{find_orphans, CandidateEdge, ChangeSet, LinkContext, LinkOutcome, Strategy};
pub use pipeline::{CancellationToken, Engine, GraphOutput, RunContext};
pub use report::{RecordFailure, ReportSummary, ValidationReport, REPORT_VERSION_V1};
pub use resolver::{BrokenReason, BrokenReference, ReferenceResolver, Resolution};
pub use validate::{placeholder_id, validate, HardFailure, PlaceholderRecord, SoftWarning, ValidatedGraph};

pub use kgforge_model as model;

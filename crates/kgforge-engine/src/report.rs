//! Validation report: structured counts plus every finding of the run.
//!
//! Consumed by operators and CI gates, never by the engine itself.

use crate::dedup::{MergeConflict, MergeRecord};
use crate::error::RecordError;
use crate::linker::CandidateEdge;
use crate::resolver::BrokenReference;
use crate::validate::{HardFailure, PlaceholderRecord, SoftWarning};
use kgforge_model::{Edge, Node, NodeId};
use serde::Serialize;
use std::collections::BTreeMap;

pub const REPORT_VERSION_V1: &str = "kgforge_validation_report_v1";

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSummary {
    pub records_seen: usize,
    pub records_built: usize,
    pub records_failed: usize,
    pub nodes: usize,
    pub edges: usize,
    pub entities_by_type: BTreeMap<String, usize>,
    pub edges_by_predicate: BTreeMap<String, usize>,
    pub fields_seen: usize,
    pub fields_consumed: usize,
    pub field_coverage_percent: f64,
    pub placeholders: usize,
    pub discarded_links: usize,
}

impl ReportSummary {
    pub fn count_graph(&mut self, nodes: &[Node], edges: &[Edge]) {
        self.nodes = nodes.len();
        self.edges = edges.len();
        self.entities_by_type.clear();
        for n in nodes {
            *self.entities_by_type.entry(n.node_type.clone()).or_default() += 1;
        }
        self.edges_by_predicate.clear();
        for e in edges {
            *self.edges_by_predicate.entry(e.predicate.clone()).or_default() += 1;
        }
    }

    pub fn set_coverage(&mut self, fields_seen: usize, fields_consumed: usize) {
        self.fields_seen = fields_seen;
        self.fields_consumed = fields_consumed;
        self.field_coverage_percent = if fields_seen == 0 {
            100.0
        } else {
            let pct = fields_consumed as f64 * 100.0 / fields_seen as f64;
            (pct * 100.0).round() / 100.0
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RecordFailure {
    pub origin: String,
    pub code: String,
    pub message: String,
}

impl From<&RecordError> for RecordFailure {
    fn from(err: &RecordError) -> Self {
        Self {
            origin: err.origin().to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub version: String,
    pub summary: ReportSummary,
    pub record_failures: Vec<RecordFailure>,
    pub broken_references: Vec<BrokenReference>,
    pub orphans_before: Vec<NodeId>,
    /// Orphans left by the linker, before deduplication and repair.
    pub orphans_after: Vec<NodeId>,
    /// Orphans in the shipped graph; the orphan threshold applies to these.
    pub final_orphans: Vec<NodeId>,
    pub applied_links: Vec<CandidateEdge>,
    pub suggested_links: Vec<CandidateEdge>,
    pub merge_conflicts: Vec<MergeConflict>,
    pub merges: Vec<MergeRecord>,
    pub placeholders: Vec<PlaceholderRecord>,
    pub soft_warnings: Vec<SoftWarning>,
    pub hard_failures: Vec<HardFailure>,
    pub cancelled: bool,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            version: REPORT_VERSION_V1.to_string(),
            summary: ReportSummary::default(),
            record_failures: Vec::new(),
            broken_references: Vec::new(),
            orphans_before: Vec::new(),
            orphans_after: Vec::new(),
            final_orphans: Vec::new(),
            applied_links: Vec::new(),
            suggested_links: Vec::new(),
            merge_conflicts: Vec::new(),
            merges: Vec::new(),
            placeholders: Vec::new(),
            soft_warnings: Vec::new(),
            hard_failures: Vec::new(),
            cancelled: false,
        }
    }
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.hard_failures.is_empty()
            && self.soft_warnings.is_empty()
            && self.record_failures.is_empty()
            && self.merge_conflicts.is_empty()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Operator summary.
    pub fn render_text(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();
        out.push_str("validation\n");
        out.push_str(&format!(
            "  records: seen={} built={} failed={}{}\n",
            s.records_seen,
            s.records_built,
            s.records_failed,
            if self.cancelled { " (cancelled)" } else { "" }
        ));
        out.push_str(&format!(
            "  graph: nodes={} edges={} placeholders={}\n",
            s.nodes, s.edges, s.placeholders
        ));
        out.push_str(&format!(
            "  field coverage: {:.2}% ({}/{})\n",
            s.field_coverage_percent, s.fields_consumed, s.fields_seen
        ));
        out.push_str(&format!(
            "  orphans: before={} after={} final={}  links: applied={} suggested={} discarded={}\n",
            self.orphans_before.len(),
            self.orphans_after.len(),
            self.final_orphans.len(),
            self.applied_links.len(),
            self.suggested_links.len(),
            s.discarded_links
        ));

        if !s.entities_by_type.is_empty() {
            out.push_str("\nentities by type\n");
            for (t, n) in &s.entities_by_type {
                out.push_str(&format!("  {t}: {n}\n"));
            }
        }
        if !s.edges_by_predicate.is_empty() {
            out.push_str("\nedges by predicate\n");
            for (p, n) in &s.edges_by_predicate {
                out.push_str(&format!("  {p}: {n}\n"));
            }
        }

        if !self.hard_failures.is_empty() {
            out.push_str("\nhard failures\n");
            for f in &self.hard_failures {
                out.push_str(&format!("  - {f}\n"));
            }
        }
        if !self.record_failures.is_empty() {
            out.push_str("\nrecord failures\n");
            for f in &self.record_failures {
                out.push_str(&format!("  - {}: {}\n", f.code, f.message));
            }
        }
        if !self.broken_references.is_empty() {
            out.push_str("\nbroken references\n");
            for b in &self.broken_references {
                out.push_str(&format!(
                    "  - {} {} -> `{}` ({})\n",
                    b.source, b.predicate, b.raw_value, b.reason
                ));
            }
        }
        if !self.merge_conflicts.is_empty() {
            out.push_str("\nmerge conflicts\n");
            for c in &self.merge_conflicts {
                out.push_str(&format!(
                    "  - {} {}: kept {} discarded {}\n",
                    c.canonical,
                    c.attribute,
                    c.kept.to_json(),
                    c.discarded.to_json()
                ));
            }
        }
        if !self.suggested_links.is_empty() {
            out.push_str("\nsuggested links\n");
            for l in &self.suggested_links {
                out.push_str(&format!(
                    "  - {} {} {} [{}]\n",
                    l.edge.source, l.edge.predicate, l.edge.target, l.rationale
                ));
            }
        }
        if self.is_clean() {
            out.push_str("\n  (no findings)\n");
        }
        out
    }
}

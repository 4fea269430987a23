//! End-to-end runs through the public engine API with on-disk inputs.

use kgforge_engine::{
    CancellationToken, CandidateBatch, CandidateRecord, ChangeSet, Engine, EngineConfig, FsRecordLoader,
    RunContext, SoftWarning,
};
use serde_json::json;
use std::fs;
use tempfile::TempDir;

fn write(dir: &TempDir, rel: &str, contents: &str) {
    let path = dir.path().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn record(fields: serde_json::Value, origin: &str) -> CandidateRecord {
    CandidateRecord::from_json(fields).with_origin(origin)
}

#[test]
fn config_file_enables_repair_and_orphan_threshold() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "kgforge.json",
        r#"{ "validator": { "repair": true, "orphan_threshold": 0 }, "parallelism": 2 }"#,
    );
    let config = EngineConfig::load(&dir.path().join("kgforge.json")).unwrap();
    assert!(config.validator.repair);
    assert_eq!(config.parallelism, 2);

    let engine = Engine::new(config).unwrap();
    let out = engine
        .run(CandidateBatch::new(vec![record(
            json!({"type": "Service", "name": "a", "dependsOn": "kg:service:ghost"}),
            "/a",
        )]))
        .unwrap();

    assert_eq!(out.report.placeholders.len(), 1);
    assert!(out.nodes.iter().any(|n| n.is_placeholder()));
    assert!(out
        .report
        .soft_warnings
        .iter()
        .any(|w| matches!(w, SoftWarning::BrokenReferences { count: 1 })));
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = EngineConfig::load(&dir.path().join("absent.json")).unwrap_err();
    assert!(err.to_string().contains("failed to read engine config"));
}

#[test]
fn deferred_records_are_loaded_from_disk() {
    let dir = TempDir::new().unwrap();
    write(&dir, "services/api.json", r#"{ "type": "Service", "name": "api", "owner": "kg:team:platform" }"#);
    write(&dir, "teams/platform.json", r#"{ "id": "kg:team:platform", "name": "Platform" }"#);

    let loader = FsRecordLoader::new(dir.path());
    let batch = CandidateBatch::new(vec![
        CandidateRecord::deferred("/services/api.json"),
        CandidateRecord::deferred("/teams/platform.json"),
        CandidateRecord::deferred("/teams/missing.json"),
    ]);
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let out = engine.run_with(batch, &RunContext::new(&loader)).unwrap();

    let api = out.nodes.iter().find(|n| n.name == "api").unwrap();
    assert_eq!(api.node_type, "Service");
    assert!(out
        .edges
        .iter()
        .any(|e| e.source == api.id && e.predicate == "ownedBy" && e.target.as_str() == "kg:team:platform"));

    assert_eq!(out.report.summary.records_failed, 1);
    let failure = &out.report.record_failures[0];
    assert_eq!(failure.origin, "/teams/missing.json");
    assert_eq!(failure.code, "record_load");
}

#[test]
fn json_lines_batches_load_from_disk() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "batch.jsonl",
        concat!(
            r#"{"fields": {"type": "Service", "name": "a", "next": "./b"}, "origin": "/a"}"#,
            "\n\n",
            r#"{"fields": {"type": "Service", "name": "b"}, "origin": "/b"}"#,
            "\n",
        ),
    );
    let batch = CandidateBatch::load(&dir.path().join("batch.jsonl")).unwrap();
    assert_eq!(batch.len(), 2);

    let out = Engine::new(EngineConfig::default()).unwrap().run(batch).unwrap();
    let doc = out.document();
    assert!(doc.has_edge("kg:service:a", "next", "kg:service:b"));
}

#[test]
fn cancellation_before_run_keeps_report_consistent() {
    let token = CancellationToken::new();
    token.cancel();
    let ctx = RunContext::default().with_cancellation(token);
    let batch = CandidateBatch::new(vec![record(json!({"type": "Service", "name": "a"}), "/a")]);

    let out = Engine::new(EngineConfig::default()).unwrap().run_with(batch, &ctx).unwrap();
    assert!(out.report.cancelled);
    assert!(out.nodes.is_empty());
    assert_eq!(out.report.summary.records_built, 0);
}

#[test]
fn co_occurrence_links_use_caller_change_sets() {
    let mut config = EngineConfig::default();
    config.linker.co_occurrence = true;
    config.linker.min_co_changes = 2;
    let engine = Engine::new(config).unwrap();

    let batch = CandidateBatch::new(vec![
        record(json!({"type": "Service", "name": "billing"}), "/billing"),
        record(json!({"type": "Service", "name": "ledger"}), "/ledger"),
    ]);
    let change: ChangeSet = ["/billing", "/ledger"].into_iter().map(String::from).collect();
    let change_sets = vec![change.clone(), change];
    let out = engine
        .run_with(batch, &RunContext::default().with_change_sets(&change_sets))
        .unwrap();

    assert!(out.report.applied_links.is_empty());
    // Each orphan proposes the other; Medium confidence stays a suggestion.
    assert_eq!(out.report.suggested_links.len(), 2);
    assert!(out.edges.is_empty());
}

#[test]
fn final_orphans_reflect_the_deduplicated_graph() {
    let mut config = EngineConfig::default();
    config.validator.orphan_threshold = Some(0);
    let engine = Engine::new(config).unwrap();
    let out = engine
        .run(CandidateBatch::new(vec![
            record(json!({"type": "Person", "name": "Alice", "email": "alice@example.com"}), "/people/alice"),
            record(json!({"type": "Person", "name": "A. Smith", "email": "ALICE@example.com"}), "/hr/a-smith"),
        ]))
        .unwrap();

    assert_eq!(out.nodes.len(), 1);
    // The linker ran before the merge and still sees both people.
    assert_eq!(out.report.orphans_after.len(), 2);
    assert_eq!(out.report.final_orphans, vec![out.nodes[0].id.clone()]);
    assert!(out
        .report
        .soft_warnings
        .iter()
        .any(|w| matches!(w, SoftWarning::OrphanThresholdExceeded { orphans: 1, threshold: 0 })));
    assert!(out.report.render_text().contains("final=1"));
}

use casescope::batch::{BatchBackend, BatchError, BatchExecutor, ExternalProcessBackend, InProcessBackend, JobSpec};
use casescope::config::EngineConfig;
use casescope::filter::Filter;
use casescope::mapreduce::{MetricValue, MAPPER_ID, REDUCER_ID};
use casescope::record::Record;
use casescope::store::MemoryStore;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
}

fn store() -> MemoryStore {
    let records: Vec<Record> = serde_json::from_value(json!([
        {"petitionId": "1", "department": "Water", "status": "Pending", "priority": "High", "createdAt": "2026-10-02T00:00:00Z"},
        {"petitionId": "2", "department": "Water", "status": "Resolved", "priority": "Low", "createdAt": "2026-10-03T00:00:00Z", "resolvedAt": "2026-10-03T06:00:00Z"},
        {"petitionId": "3", "department": "RTO", "status": "Pending", "priority": "Medium", "createdAt": "2026-10-04T00:00:00Z"}
    ]))
    .unwrap();
    MemoryStore::from_records(records)
}

fn config(dir: &Path) -> EngineConfig {
    EngineConfig { work_dir: dir.to_path_buf(), job_timeout_ms: 10_000, ..EngineConfig::default() }
}

fn count_of(entries: &[casescope::mapreduce::KeyValueRecord], key: &str) -> Option<u64> {
    entries.iter().find(|kv| kv.key == key).map(|kv| kv.value.count())
}

#[tokio::test]
async fn in_process_job_runs_all_three_phases_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let exec = BatchExecutor::new(Arc::new(InProcessBackend::new(3)), &config(dir.path()));
    let job = exec.job_spec(Filter::all(), now());
    let job_dir = job.job_dir.clone();

    let outcome = exec.execute(&store(), job).await.unwrap();
    assert_eq!(outcome.exported, 3);
    assert_eq!(outcome.import.skipped, 0);
    assert_eq!(count_of(&outcome.entries, "department_Water"), Some(2));
    assert_eq!(count_of(&outcome.entries, "department_RTO"), Some(1));
    assert!(matches!(
        outcome.entries.iter().find(|kv| kv.key == "urgent_pending_3days").map(|kv| &kv.value),
        Some(MetricValue::UrgentList(cases)) if cases.len() == 1 && cases[0].id == "1"
    ));
    assert!(!job_dir.exists());
}

#[tokio::test]
async fn intermediate_files_can_be_kept() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig { keep_intermediate: true, ..config(dir.path()) };
    let exec = BatchExecutor::new(Arc::new(InProcessBackend::default()), &cfg);
    let job = exec.job_spec(Filter::all(), now());
    let (input, output) = (job.input_location.clone(), job.output_location.clone());

    exec.execute(&store(), job).await.unwrap();
    let exported: Vec<Record> = serde_json::from_str(&std::fs::read_to_string(&input).unwrap()).unwrap();
    assert_eq!(exported.len(), 3);
    let reduced = std::fs::read_to_string(&output).unwrap();
    assert!(reduced.lines().all(|l| l.contains('\t')));
}

#[tokio::test]
async fn every_attempt_gets_a_fresh_job() {
    let dir = tempfile::tempdir().unwrap();
    let exec = BatchExecutor::new(Arc::new(InProcessBackend::default()), &config(dir.path()));
    let a = exec.execute_with_retry(&store(), &Filter::all(), now()).await.unwrap();
    let b = exec.execute_with_retry(&store(), &Filter::all(), now()).await.unwrap();
    assert_ne!(a.job_name, b.job_name);
    assert_eq!(a.entries, b.entries);
}

#[tokio::test]
async fn unknown_program_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let exec = BatchExecutor::new(Arc::new(InProcessBackend::default()), &config(dir.path()));
    let mut job = exec.job_spec(Filter::all(), now());
    job.mapper_id = "word-count".into();
    let err = exec.execute(&store(), job).await.unwrap_err();
    assert!(matches!(err, BatchError::UnknownProgram(ref id) if id == "word-count"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn failing_external_program_is_an_invocation_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut programs = BTreeMap::new();
    programs.insert(MAPPER_ID.to_string(), vec!["false".to_string()]);
    programs.insert(REDUCER_ID.to_string(), vec!["cat".to_string()]);
    let cfg = EngineConfig { max_attempts: 2, ..config(dir.path()) };
    let exec = BatchExecutor::new(Arc::new(ExternalProcessBackend::new(programs)), &cfg);
    let err = exec.execute_with_retry(&store(), &Filter::all(), now()).await.unwrap_err();
    assert!(matches!(err, BatchError::Invocation { .. }), "{err}");
    // nothing from either attempt is left behind
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn slow_backend_hits_the_request_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let mut programs = BTreeMap::new();
    programs.insert(MAPPER_ID.to_string(), vec!["sleep".to_string(), "5".to_string()]);
    programs.insert(REDUCER_ID.to_string(), vec!["cat".to_string()]);
    let cfg = EngineConfig { job_timeout_ms: 200, ..config(dir.path()) };
    let exec = BatchExecutor::new(Arc::new(ExternalProcessBackend::new(programs)), &cfg);
    let job = exec.job_spec(Filter::all(), now());
    let err = exec.execute(&store(), job).await.unwrap_err();
    assert!(matches!(err, BatchError::Timeout { after_ms: 200, .. }));
}

#[tokio::test]
async fn external_stage_binary_agrees_with_in_process() {
    let dir = tempfile::tempdir().unwrap();
    let external = ExternalProcessBackend::with_stage_binary(Path::new(env!("CARGO_BIN_EXE_casescope")), 3);
    let exec = BatchExecutor::new(Arc::new(external), &config(dir.path()));
    let remote = exec.execute_with_retry(&store(), &Filter::all(), now()).await.unwrap();

    let local_exec = BatchExecutor::new(Arc::new(InProcessBackend::new(3)), &config(dir.path()));
    let local = local_exec.execute_with_retry(&store(), &Filter::all(), now()).await.unwrap();

    let summary = |o: &casescope::batch::BatchOutcome| o.entries.iter().map(|kv| (kv.key.clone(), kv.value.count())).collect::<Vec<_>>();
    assert_eq!(summary(&remote), summary(&local));
    assert!(!remote.entries.is_empty());
}

#[tokio::test]
async fn backend_can_be_driven_directly() {
    let dir = tempfile::tempdir().unwrap();
    let job = JobSpec::new(dir.path(), Filter::all(), now());
    std::fs::create_dir_all(&job.job_dir).unwrap();
    std::fs::write(&job.input_location, "[]").unwrap();
    InProcessBackend::default().run(&job).await.unwrap();
    assert_eq!(std::fs::read_to_string(&job.output_location).unwrap(), "");
}

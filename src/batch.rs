//! Three-phase batch execution: export the filtered slice, run map/reduce on a
//! backend, import the reducer output.
//!
//! Each phase reads the previous phase's complete output from disk. A job's
//! files live under `<work_dir>/<job_name>/` and are never shared between jobs.

use crate::config::{BackendKind, EngineConfig};
use crate::filter::Filter;
use crate::mapreduce::{self, KeyValueRecord, MapContext, MAPPER_ID, REDUCER_ID};
use crate::record::Record;
use crate::store::RecordStore;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, info_span, warn, Instrument};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("export for job {job} failed: {source}")]
    Export {
        job: String,
        #[source]
        source: BoxError,
    },
    #[error("map/reduce invocation for job {job} failed: {reason}")]
    Invocation { job: String, reason: String },
    #[error("import for job {job} failed: {source}")]
    Import {
        job: String,
        #[source]
        source: std::io::Error,
    },
    #[error("job {job} did not finish within {after_ms} ms")]
    Timeout { job: String, after_ms: u64 },
    #[error("no program registered as '{0}'")]
    UnknownProgram(String),
}

impl BatchError {
    /// Whether the whole sequence may be attempted again with a fresh job.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BatchError::UnknownProgram(_))
    }

    fn invocation(job: &JobSpec, reason: impl Into<String>) -> Self {
        BatchError::Invocation { job: job.job_name.clone(), reason: reason.into() }
    }
}

static JOB_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Process-unique, time-qualified job name.
pub fn next_job_name() -> String {
    format!(
        "casescope_{}_{}_{}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        JOB_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

/// One batch execution. Consumed by [`BatchExecutor::execute`]; never reused.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub job_name: String,
    pub job_dir: PathBuf,
    pub input_location: PathBuf,
    pub mapper_id: String,
    pub reducer_id: String,
    pub output_location: PathBuf,
    #[serde(skip)]
    pub filter: Filter,
    pub evaluated_at: DateTime<Utc>,
}

impl JobSpec {
    pub fn new(work_dir: &Path, filter: Filter, evaluated_at: DateTime<Utc>) -> Self {
        let job_name = next_job_name();
        let job_dir = work_dir.join(&job_name);
        Self {
            input_location: job_dir.join("input.json"),
            output_location: job_dir.join("output.tsv"),
            job_dir,
            job_name,
            mapper_id: MAPPER_ID.to_string(),
            reducer_id: REDUCER_ID.to_string(),
            filter,
            evaluated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub entries: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub job_name: String,
    pub exported: usize,
    pub entries: Vec<KeyValueRecord>,
    pub import: ImportStats,
}

#[async_trait]
pub trait BatchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read `job.input_location`, write reduced `key<TAB>value` lines to `job.output_location`.
    async fn run(&self, job: &JobSpec) -> Result<(), BatchError>;
}

/// Map and reduce on the rayon pool of this process.
#[derive(Debug, Clone)]
pub struct InProcessBackend {
    urgent_after_days: u32,
}

impl InProcessBackend {
    pub fn new(urgent_after_days: u32) -> Self {
        Self { urgent_after_days }
    }
}

impl Default for InProcessBackend {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl BatchBackend for InProcessBackend {
    fn name(&self) -> &'static str {
        "in_process"
    }

    async fn run(&self, job: &JobSpec) -> Result<(), BatchError> {
        if job.mapper_id != MAPPER_ID {
            return Err(BatchError::UnknownProgram(job.mapper_id.clone()));
        }
        if job.reducer_id != REDUCER_ID {
            return Err(BatchError::UnknownProgram(job.reducer_id.clone()));
        }
        let input = tokio::fs::read(&job.input_location)
            .await
            .map_err(|e| BatchError::invocation(job, format!("cannot read {}: {e}", job.input_location.display())))?;
        let ctx = MapContext { now: job.evaluated_at, urgent_after_days: self.urgent_after_days };

        let body = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, String> {
            let records: Vec<Record> = serde_json::from_slice(&input).map_err(|e| format!("exported slice is unreadable: {e}"))?;
            let mut out = Vec::new();
            for kv in mapreduce::run_local(&records, &ctx) {
                let line = mapreduce::encode_line(&kv).map_err(|e| e.to_string())?;
                out.extend_from_slice(line.as_bytes());
                out.push(b'\n');
            }
            Ok(out)
        })
        .await
        .map_err(|e| BatchError::invocation(job, format!("map/reduce worker join: {e}")))?
        .map_err(|reason| BatchError::invocation(job, reason))?;

        write_atomic(&job.output_location, &body)
            .await
            .map_err(|e| BatchError::invocation(job, format!("cannot write output: {e}")))
    }
}

/// Streaming-style programs: records on the mapper's stdin, key-sorted mapper
/// output on the reducer's stdin, reducer stdout as the job output.
#[derive(Debug, Clone)]
pub struct ExternalProcessBackend {
    programs: BTreeMap<String, Vec<String>>,
}

impl ExternalProcessBackend {
    pub fn new(programs: BTreeMap<String, Vec<String>>) -> Self {
        Self { programs }
    }

    /// Register the `map`/`reduce` subcommands of `exe` under the standard program ids.
    pub fn with_stage_binary(exe: &Path, urgent_after_days: u32) -> Self {
        let exe = exe.display().to_string();
        let mut programs = BTreeMap::new();
        programs.insert(
            MAPPER_ID.to_string(),
            vec![exe.clone(), "map".into(), "--now".into(), "{now}".into(), "--urgent-after-days".into(), urgent_after_days.to_string()],
        );
        programs.insert(REDUCER_ID.to_string(), vec![exe, "reduce".into()]);
        Self { programs }
    }

    fn argv(&self, id: &str, job: &JobSpec) -> Result<Vec<String>, BatchError> {
        let argv = self.programs.get(id).filter(|a| !a.is_empty()).ok_or_else(|| BatchError::UnknownProgram(id.to_string()))?;
        let now = job.evaluated_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        Ok(argv.iter().map(|a| a.replace("{now}", &now)).collect())
    }
}

async fn pipe_through(argv: &[String], input: Vec<u8>, job: &JobSpec) -> Result<Vec<u8>, BatchError> {
    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BatchError::invocation(job, format!("cannot start {}: {e}", argv[0])))?;

    let mut stdin = child.stdin.take().ok_or_else(|| BatchError::invocation(job, "child stdin unavailable"))?;
    let feeder = tokio::spawn(async move {
        let res = stdin.write_all(&input).await;
        drop(stdin);
        res
    });
    let output = child
        .wait_with_output()
        .await
        .map_err(|e| BatchError::invocation(job, format!("{} did not complete: {e}", argv[0])))?;
    match feeder.await {
        Ok(Ok(())) => {}
        // the child may exit before draining stdin; its exit status decides
        Ok(Err(e)) => debug!(program = %argv[0], error = %e, "stdin closed early"),
        Err(e) => return Err(BatchError::invocation(job, format!("stdin feeder join: {e}"))),
    }
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>().join(" | ");
        return Err(BatchError::invocation(job, format!("{} exited with {}: {}", argv[0], output.status, tail)));
    }
    Ok(output.stdout)
}

/// Stable sort of `key<TAB>value` lines by key; blank lines dropped.
pub fn sort_by_key(stream: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(stream);
    let mut lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines.sort_by(|a, b| {
        let ka = a.split_once('\t').map(|(k, _)| k).unwrap_or(a);
        let kb = b.split_once('\t').map(|(k, _)| k).unwrap_or(b);
        ka.cmp(kb)
    });
    let mut out = Vec::with_capacity(stream.len());
    for l in lines {
        out.extend_from_slice(l.as_bytes());
        out.push(b'\n');
    }
    out
}

#[async_trait]
impl BatchBackend for ExternalProcessBackend {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn run(&self, job: &JobSpec) -> Result<(), BatchError> {
        let mapper = self.argv(&job.mapper_id, job)?;
        let reducer = self.argv(&job.reducer_id, job)?;

        let input = tokio::fs::read(&job.input_location)
            .await
            .map_err(|e| BatchError::invocation(job, format!("cannot read {}: {e}", job.input_location.display())))?;
        let records: Vec<serde_json::Value> =
            serde_json::from_slice(&input).map_err(|e| BatchError::invocation(job, format!("exported slice is unreadable: {e}")))?;
        let mut ndjson = Vec::with_capacity(input.len());
        for r in &records {
            serde_json::to_writer(&mut ndjson, r).map_err(|e| BatchError::invocation(job, e.to_string()))?;
            ndjson.push(b'\n');
        }

        let mapped = pipe_through(&mapper, ndjson, job).await?;
        debug!(bytes = mapped.len(), "mapper finished");
        let reduced = pipe_through(&reducer, sort_by_key(&mapped), job).await?;
        debug!(bytes = reduced.len(), "reducer finished");

        write_atomic(&job.output_location, &reduced)
            .await
            .map_err(|e| BatchError::invocation(job, format!("cannot write output: {e}")))
    }
}

/// Write to a sibling temp file, then rename into place.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".partial");
    let tmp = path.with_file_name(tmp_name);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await
}

/// Parse reducer output: a JSON array of `{key, value}` objects, or `key<TAB>json` lines.
/// Malformed entries are skipped.
pub fn parse_output(content: &str) -> (Vec<KeyValueRecord>, ImportStats) {
    let mut stats = ImportStats::default();
    let mut entries = Vec::new();
    if content.trim_start().starts_with('[') {
        match serde_json::from_str::<Vec<serde_json::Value>>(content) {
            Ok(items) => {
                for (i, item) in items.into_iter().enumerate() {
                    match serde_json::from_value::<KeyValueRecord>(item) {
                        Ok(kv) => entries.push(kv),
                        Err(e) => {
                            warn!(index = i, error = %e, "skipping malformed result entry");
                            stats.skipped += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "result array is not valid JSON; nothing imported");
                stats.skipped += 1;
            }
        }
    } else {
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() { continue; }
            match mapreduce::decode_line(line) {
                Ok(kv) => entries.push(kv),
                Err(e) => {
                    warn!(line = i + 1, error = %e, "skipping malformed result line");
                    stats.skipped += 1;
                }
            }
        }
    }
    stats.entries = entries.len();
    (entries, stats)
}

pub struct BatchExecutor {
    backend: Arc<dyn BatchBackend>,
    work_dir: PathBuf,
    timeout: Duration,
    max_attempts: u32,
    keep_intermediate: bool,
}

impl BatchExecutor {
    pub fn new(backend: Arc<dyn BatchBackend>, config: &EngineConfig) -> Self {
        Self {
            backend,
            work_dir: config.work_dir.clone(),
            timeout: config.job_timeout(),
            max_attempts: config.max_attempts.max(1),
            keep_intermediate: config.keep_intermediate,
        }
    }

    /// Pick the backend named in `config`. The external backend falls back to
    /// this executable's `map`/`reduce` subcommands for unregistered program ids.
    pub fn from_config(config: &EngineConfig) -> Self {
        let backend: Arc<dyn BatchBackend> = match config.backend {
            BackendKind::InProcess => Arc::new(InProcessBackend::new(config.urgent_after_days)),
            BackendKind::External => {
                let mut programs = match std::env::current_exe() {
                    Ok(exe) => ExternalProcessBackend::with_stage_binary(&exe, config.urgent_after_days).programs,
                    Err(e) => {
                        warn!(error = %e, "cannot locate own executable; only configured programs are available");
                        BTreeMap::new()
                    }
                };
                programs.extend(config.programs.clone());
                Arc::new(ExternalProcessBackend::new(programs))
            }
        };
        Self::new(backend, config)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn job_spec(&self, filter: Filter, now: DateTime<Utc>) -> JobSpec {
        JobSpec::new(&self.work_dir, filter, now)
    }

    /// Run all three phases of `job` under the request timeout.
    pub async fn execute(&self, store: &dyn RecordStore, job: JobSpec) -> Result<BatchOutcome, BatchError> {
        let span = info_span!("batch_job", job = %job.job_name, backend = self.backend.name());
        let result = match tokio::time::timeout(self.timeout, self.run_phases(store, &job)).instrument(span.clone()).await {
            Ok(r) => r,
            Err(_) => Err(BatchError::Timeout { job: job.job_name.clone(), after_ms: self.timeout.as_millis() as u64 }),
        };
        if !self.keep_intermediate {
            if let Err(e) = tokio::fs::remove_dir_all(&job.job_dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    span.in_scope(|| warn!(dir = %job.job_dir.display(), error = %e, "could not remove job directory"));
                }
            }
        }
        result
    }

    /// Retry the whole sequence with a fresh [`JobSpec`] per attempt.
    pub async fn execute_with_retry(&self, store: &dyn RecordStore, filter: &Filter, now: DateTime<Utc>) -> Result<BatchOutcome, BatchError> {
        let mut attempt = 1;
        loop {
            let job = self.job_spec(filter.clone(), now);
            match self.execute(store, job).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "batch job failed; retrying with a new job");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_phases(&self, store: &dyn RecordStore, job: &JobSpec) -> Result<BatchOutcome, BatchError> {
        let export_err = |source: BoxError| BatchError::Export { job: job.job_name.clone(), source };

        let records = store.find(&job.filter).map_err(|e| export_err(e.into()))?;
        tokio::fs::create_dir_all(&job.job_dir).await.map_err(|e| export_err(e.into()))?;
        let body = serde_json::to_vec(&records).map_err(|e| export_err(e.into()))?;
        write_atomic(&job.input_location, &body).await.map_err(|e| export_err(e.into()))?;
        info!(records = records.len(), path = %job.input_location.display(), "export complete");

        self.backend.run(job).await?;
        info!(path = %job.output_location.display(), "map/reduce complete");

        let content = tokio::fs::read_to_string(&job.output_location)
            .await
            .map_err(|source| BatchError::Import { job: job.job_name.clone(), source })?;
        let (entries, import) = parse_output(&content);
        info!(entries = import.entries, skipped = import.skipped, "import complete");

        Ok(BatchOutcome { job_name: job.job_name.clone(), exported: records.len(), entries, import })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_are_unique() {
        let a = next_job_name();
        let b = next_job_name();
        assert_ne!(a, b);
        assert!(a.starts_with("casescope_"));
    }

    #[test]
    fn sort_keeps_values_per_key_in_order() {
        let sorted = sort_by_key(b"status_b\t1\ndepartment_a\t2\n\nstatus_b\t3\n");
        assert_eq!(String::from_utf8(sorted).unwrap(), "department_a\t2\nstatus_b\t1\nstatus_b\t3\n");
    }

    #[test]
    fn import_accepts_arrays_and_lines() {
        let (entries, stats) = parse_output("[{\"key\":\"department_Water\",\"value\":2},{\"nope\":1}]");
        assert_eq!(entries.len(), 1);
        assert_eq!(stats, ImportStats { entries: 1, skipped: 1 });

        let (entries, stats) = parse_output("department_Water\t2\ngarbage\n\nstatus_Pending_Water\t1\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(stats.skipped, 1);
    }
}

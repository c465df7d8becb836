// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orchestration engine.
//!
//! The [`Orchestrator`] owns the storage facade, the announcement queue and
//! the per-namespace status counters. Every public operation takes the same
//! async mutex for its whole duration, including the outbound service calls
//! made by [`Orchestrator::announce`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result, ServiceError};
use crate::persistence::{DumpFormat, Storage};
use crate::queue::{AnnouncementQueue, QueueEntry};
use crate::records::{Record, RecordKind, Run, Sample, Status};
use crate::registry::ServiceRegistry;
use crate::services::{BASECALL_SERVICE, SEQUENCE_SERVICE};

/// Default upper bound on a single service request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Requests and reports
// ============================================================================

/// Parameters for [`Orchestrator::create_run`].
#[derive(Debug, Clone, Default)]
pub struct CreateRun {
    /// Unique run label.
    pub label: String,
    /// Top-level output directory.
    pub output_dir: PathBuf,
    /// Raw signal directory.
    pub fast5_dir: PathBuf,
    /// Basecalled output directory.
    pub fastq_dir: PathBuf,
    /// Processing scheme identifier.
    pub scheme: Option<String>,
    /// Comment to add after creation.
    pub comment: Option<String>,
    /// Services to tag the run with.
    pub tags: Vec<String>,
    /// Treat sequencing and basecalling as already done.
    pub mark_historic: bool,
}

impl CreateRun {
    /// Start a request with the mandatory fields.
    pub fn new(
        label: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        fast5_dir: impl Into<PathBuf>,
        fastq_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            label: label.into(),
            output_dir: output_dir.into(),
            fast5_dir: fast5_dir.into(),
            fastq_dir: fastq_dir.into(),
            ..Self::default()
        }
    }

    /// Set the processing scheme.
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    /// Add a comment.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Set the service tags.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the run as historic.
    pub fn historic(mut self) -> Self {
        self.mark_historic = true;
        self
    }
}

/// Parameters for [`Orchestrator::create_sample`].
#[derive(Debug, Clone, Default)]
pub struct CreateSample {
    /// Unique sample label.
    pub label: String,
    /// Label of an existing run.
    pub parent_run: String,
    /// Barcode number.
    pub barcode: i32,
    /// Comment to add after creation.
    pub comment: Option<String>,
    /// Services to tag the sample with.
    pub tags: Vec<String>,
}

impl CreateSample {
    /// Start a request with the mandatory fields.
    pub fn new(label: impl Into<String>, parent_run: impl Into<String>, barcode: i32) -> Self {
        Self {
            label: label.into(),
            parent_run: parent_run.into(),
            barcode,
            ..Self::default()
        }
    }

    /// Add a comment.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Set the service tags.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Records per status in one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// All records.
    pub total: usize,
    /// Records with no tags.
    pub untagged: usize,
    /// Records with pending tags.
    pub tagged_incomplete: usize,
    /// Records with every tag complete.
    pub tagged_complete: usize,
    /// Records that have been announced.
    pub announced: usize,
}

impl StatusCounts {
    /// Count for one status.
    pub fn get(&self, status: Status) -> usize {
        match status {
            Status::Untagged => self.untagged,
            Status::TaggedIncomplete => self.tagged_incomplete,
            Status::TaggedComplete => self.tagged_complete,
            Status::Announced => self.announced,
        }
    }

    fn slot(&mut self, status: Status) -> &mut usize {
        match status {
            Status::Untagged => &mut self.untagged,
            Status::TaggedIncomplete => &mut self.tagged_incomplete,
            Status::TaggedComplete => &mut self.tagged_complete,
            Status::Announced => &mut self.announced,
        }
    }

    fn add(&mut self, status: Status) {
        self.total += 1;
        *self.slot(status) += 1;
    }

    fn remove(&mut self, status: Status) {
        self.total = self.total.saturating_sub(1);
        let slot = self.slot(status);
        *slot = slot.saturating_sub(1);
    }

    fn transition(&mut self, from: Status, to: Status) {
        if from != to {
            let slot = self.slot(from);
            *slot = slot.saturating_sub(1);
            *self.slot(to) += 1;
        }
    }
}

/// Outcome of a successful [`Orchestrator::announce`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnnounceReport {
    /// Runs announced.
    pub runs: usize,
    /// Samples announced.
    pub samples: usize,
    /// Service requests sent.
    pub requests: usize,
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for an [`Orchestrator`].
pub struct OrchestratorBuilder {
    storage: Option<Storage>,
    registry: Option<Arc<ServiceRegistry>>,
    request_timeout: Duration,
}

impl fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("storage", &self.storage.as_ref().map(Storage::location))
            .field("registry", &self.registry.as_ref().map(|r| r.len()))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            storage: None,
            registry: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl OrchestratorBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage facade (required).
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the service registry (required).
    pub fn registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Bound each service request.
    ///
    /// Default: 30 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the orchestrator.
    ///
    /// Runtime state starts empty; call [`Orchestrator::rebuild`] to load it
    /// from storage.
    pub fn build(self) -> Result<Orchestrator> {
        let storage = self
            .storage
            .ok_or_else(|| Error::validation("storage", "storage is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| Error::validation("registry", "registry is required"))?;

        Ok(Orchestrator {
            location: storage.location().to_path_buf(),
            registry,
            request_timeout: self.request_timeout,
            state: Mutex::new(State::new(storage)),
        })
    }
}

// ============================================================================
// Runtime state
// ============================================================================

#[derive(Default)]
struct Namespace {
    counts: StatusCounts,
    labels: Vec<String>,
}

struct State {
    storage: Storage,
    queue: AnnouncementQueue,
    runs: Namespace,
    samples: Namespace,
}

impl State {
    fn new(storage: Storage) -> Self {
        Self {
            storage,
            queue: AnnouncementQueue::new(),
            runs: Namespace::default(),
            samples: Namespace::default(),
        }
    }

    fn namespace(&self, kind: RecordKind) -> &Namespace {
        match kind {
            RecordKind::Run => &self.runs,
            RecordKind::Sample => &self.samples,
        }
    }

    fn namespace_mut(&mut self, kind: RecordKind) -> &mut Namespace {
        match kind {
            RecordKind::Run => &mut self.runs,
            RecordKind::Sample => &mut self.samples,
        }
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.runs = Namespace::default();
        self.samples = Namespace::default();
    }

    /// Enumerate both stores into the (already reset) counters, caches and queue.
    async fn reload(&mut self) -> Result<()> {
        for kind in RecordKind::ALL {
            let reported = self.storage.count(kind).await?;
            let mut enumerated = 0;

            let labels = self.storage.keys(kind).await?;
            for label in labels {
                let mut record = self.storage.get(kind, &label).await?;
                if record.metadata_mut().check_status() {
                    self.storage.update(&record).await?;
                    debug!(kind = %kind, label = %label, "Record tags complete");
                }
                self.track(kind, &label, record.status());
                enumerated += 1;
            }

            check_enumerated(kind, reported, enumerated)?;
        }
        Ok(())
    }

    /// Account for a record that is now in storage.
    fn track(&mut self, kind: RecordKind, label: &str, status: Status) {
        let ns = self.namespace_mut(kind);
        ns.counts.add(status);
        ns.labels.push(label.to_string());
        if status == Status::TaggedIncomplete {
            self.queue.push(kind, label);
        }
    }

    /// Forget a record that was removed from storage.
    fn untrack(&mut self, kind: RecordKind, label: &str, status: Status) {
        let ns = self.namespace_mut(kind);
        ns.counts.remove(status);
        ns.labels.retain(|l| l != label);
        self.queue.remove(kind, label);
    }
}

/// A store must enumerate exactly as many records as it reports.
fn check_enumerated(kind: RecordKind, reported: usize, enumerated: usize) -> Result<()> {
    if enumerated != reported {
        warn!(kind = %kind, reported, enumerated, "Store size mismatch");
        return Err(Error::ConsistencyMismatch {
            kind,
            reported,
            enumerated,
        });
    }
    Ok(())
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Tracks records, their tags and their announcement to services.
pub struct Orchestrator {
    location: PathBuf,
    registry: Arc<ServiceRegistry>,
    request_timeout: Duration,
    state: Mutex<State>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("location", &self.location)
            .field("services", &self.registry.len())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create a builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Reload counters, label caches and the queue from storage.
    ///
    /// Records whose tags have all completed are moved to `TaggedComplete`
    /// and written back.
    #[instrument(skip(self))]
    pub async fn rebuild(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.reset();

        // A failed reload must not leave a partial queue behind
        if let Err(e) = state.reload().await {
            warn!(code = e.error_code(), "Rebuild failed: {}", e);
            state.reset();
            return Err(e);
        }

        info!(
            runs = state.runs.counts.total,
            samples = state.samples.counts.total,
            queued = state.queue.len(),
            "Rebuilt runtime state"
        );
        Ok(())
    }

    /// Create and store a run.
    ///
    /// Nothing is stored if any step fails.
    #[instrument(skip(self, request), fields(label = %request.label))]
    pub async fn create_run(&self, request: CreateRun) -> Result<()> {
        let mut state = self.state.lock().await;
        let CreateRun {
            label,
            output_dir,
            fast5_dir,
            fastq_dir,
            scheme,
            comment,
            tags,
            mark_historic,
        } = request;

        let mut run = Run::new(label, output_dir, fast5_dir, fastq_dir)?;
        if let Some(scheme) = scheme {
            run = run.with_scheme(scheme);
        }
        if let Some(comment) = comment.filter(|c| !c.is_empty()) {
            run.metadata_mut().add_comment(comment)?;
        }
        if !tags.is_empty() {
            run.add_tags(&tags, &self.registry)?;
        }
        if mark_historic {
            for service in [SEQUENCE_SERVICE, BASECALL_SERVICE] {
                if run.metadata().tags().contains_key(service) {
                    run.metadata_mut().set_tag(service, true)?;
                }
            }
            run.metadata_mut().check_status();
        }

        state.storage.runs().put(&run).await?;

        let status = run.metadata().status();
        state.track(RecordKind::Run, run.label(), status);
        info!(status = %status, "Created run");
        Ok(())
    }

    /// Create and store a sample under an existing run.
    #[instrument(skip(self, request), fields(label = %request.label, parent_run = %request.parent_run))]
    pub async fn create_sample(&self, request: CreateSample) -> Result<()> {
        let mut state = self.state.lock().await;
        let CreateSample {
            label,
            parent_run,
            barcode,
            comment,
            tags,
        } = request;

        let mut sample = Sample::new(label, parent_run, barcode)?;
        if let Some(comment) = comment.filter(|c| !c.is_empty()) {
            sample.metadata_mut().add_comment(comment)?;
        }
        if !tags.is_empty() {
            sample.add_tags(&tags, &self.registry)?;
        }

        if !state.storage.runs().contains(sample.parent_run()).await? {
            return Err(Error::ParentNotFound {
                label: sample.label().to_string(),
                parent: sample.parent_run().to_string(),
            });
        }
        state.storage.samples().put(&sample).await?;

        let status = sample.metadata().status();
        state.track(RecordKind::Sample, sample.label(), status);
        info!(status = %status, "Created sample");
        Ok(())
    }

    /// Delete a run that has not been announced.
    pub async fn delete_run(&self, label: &str) -> Result<()> {
        self.delete(RecordKind::Run, label).await
    }

    /// Delete a sample that has not been announced.
    pub async fn delete_sample(&self, label: &str) -> Result<()> {
        self.delete(RecordKind::Sample, label).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, kind: RecordKind, label: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        let status = state.storage.get(kind, label).await?.status();
        if status == Status::Announced {
            return Err(Error::DeleteWhileAnnounced {
                kind,
                label: label.to_string(),
            });
        }

        state.storage.delete(kind, label).await?;
        state.untrack(kind, label, status);
        info!("Deleted record");
        Ok(())
    }

    /// Record completion of a run's service tag.
    pub async fn set_run_tag(&self, label: &str, service: &str, complete: bool) -> Result<Status> {
        self.set_tag(RecordKind::Run, label, service, complete).await
    }

    /// Record completion of a sample's service tag.
    pub async fn set_sample_tag(&self, label: &str, service: &str, complete: bool) -> Result<Status> {
        self.set_tag(RecordKind::Sample, label, service, complete).await
    }

    #[instrument(skip(self))]
    async fn set_tag(
        &self,
        kind: RecordKind,
        label: &str,
        service: &str,
        complete: bool,
    ) -> Result<Status> {
        let mut state = self.state.lock().await;

        let mut record = state.storage.get(kind, label).await?;
        let before = record.status();
        record.metadata_mut().set_tag(service, complete)?;
        record.metadata_mut().check_status();
        state.storage.update(&record).await?;

        let after = record.status();
        state.namespace_mut(kind).counts.transition(before, after);
        if after == Status::TaggedComplete {
            state.queue.remove(kind, label);
        }
        debug!(status = %after, "Tag updated");
        Ok(after)
    }

    /// Dispatch every queued record to its pending services.
    ///
    /// Runs are announced before samples. Every required service must pass a
    /// connectivity check before anything is sent. The first failing request
    /// stops the pass; records announced before it stay announced and the
    /// failing record stays queued.
    #[instrument(skip(self))]
    pub async fn announce(&self) -> Result<AnnounceReport> {
        let mut state = self.state.lock().await;

        // 1. Nothing to do
        if state.queue.is_empty() {
            return Err(Error::EmptyQueue);
        }

        // 2. Snapshot the queue, runs first
        let pending: Vec<QueueEntry> = state
            .queue
            .of_kind(RecordKind::Run)
            .chain(state.queue.of_kind(RecordKind::Sample))
            .cloned()
            .collect();
        let mut records = Vec::with_capacity(pending.len());
        for entry in &pending {
            records.push(state.storage.get(entry.kind, &entry.label).await?);
        }

        // 3. Pre-flight connectivity
        {
            let mut required: Vec<&str> = records
                .iter()
                .flat_map(|r| r.metadata().incomplete_tags())
                .collect();
            required.sort_unstable();
            required.dedup();

            for service in required {
                if !self.registry.check_access(service).await {
                    let address = self
                        .registry
                        .get(service)
                        .map(|s| s.address().to_string())
                        .unwrap_or_default();
                    warn!(service = %service, address = %address, "Service unreachable, nothing announced");
                    return Err(Error::ServiceUnreachable {
                        service: service.to_string(),
                        address,
                    });
                }
            }
        }

        // 4. Dispatch
        let mut report = AnnounceReport::default();
        for mut record in records {
            let kind = record.kind();
            let sent = self.dispatch(&record).await?;

            let previous = record.status();
            let meta = record.metadata_mut();
            for service in &sent {
                meta.add_comment(format!("{service} request sent."))?;
            }
            meta.mark_announced(kind)?;
            state.storage.update(&record).await?;

            state.queue.remove(kind, record.label());
            state
                .namespace_mut(kind)
                .counts
                .transition(previous, Status::Announced);

            match kind {
                RecordKind::Run => report.runs += 1,
                RecordKind::Sample => report.samples += 1,
            }
            report.requests += sent.len();
            info!(kind = %kind, label = %record.label(), requests = sent.len(), "Announced record");
        }

        // 5. Everything queued must have gone out
        if !state.queue.is_empty() {
            return Err(Error::QueueNotDrained {
                remaining: state.queue.len(),
            });
        }

        Ok(report)
    }

    /// Send a record to each of its pending services in request order.
    ///
    /// Returns the services that accepted it.
    async fn dispatch(&self, record: &Record) -> Result<Vec<String>> {
        let payload = record.dispatch_payload();
        let mut sent = Vec::new();

        for name in record.metadata().incomplete_tags() {
            let service = self
                .registry
                .get(name)
                .ok_or_else(|| Error::UnknownService {
                    name: name.to_string(),
                })?;
            debug!(service = %name, label = %record.label(), address = %service.address(), "Sending request");

            let outcome = match tokio::time::timeout(
                self.request_timeout,
                service.client().send_request(service.address(), &payload),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout(self.request_timeout)),
            };

            if let Err(source) = outcome {
                warn!(service = %name, label = %record.label(), error = %source, "Service request failed");
                return Err(Error::DispatchFailed {
                    service: name.to_string(),
                    label: record.label().to_string(),
                    source,
                });
            }
            sent.push(name.to_string());
        }

        Ok(sent)
    }

    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    /// Number of stored runs.
    pub async fn run_count(&self) -> usize {
        self.state.lock().await.runs.counts.total
    }

    /// Number of stored samples.
    pub async fn sample_count(&self) -> usize {
        self.state.lock().await.samples.counts.total
    }

    /// Status breakdown of a namespace.
    pub async fn counts(&self, kind: RecordKind) -> StatusCounts {
        self.state.lock().await.namespace(kind).counts
    }

    /// Number of records waiting to be announced.
    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Whether a record is waiting to be announced.
    pub async fn is_queued(&self, kind: RecordKind, label: &str) -> bool {
        self.state.lock().await.queue.contains(kind, label)
    }

    /// Announced runs plus announced samples.
    pub async fn announced_count(&self) -> usize {
        let state = self.state.lock().await;
        state.runs.counts.announced + state.samples.counts.announced
    }

    /// Label of the `index`th run.
    pub async fn run_label(&self, index: usize) -> Option<String> {
        self.state.lock().await.runs.labels.get(index).cloned()
    }

    /// Label of the `index`th sample.
    pub async fn sample_label(&self, index: usize) -> Option<String> {
        self.state.lock().await.samples.labels.get(index).cloned()
    }

    /// Creation time of the `index`th sample.
    pub async fn sample_created(&self, index: usize) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().await;
        let Some(label) = state.samples.labels.get(index) else {
            return Ok(None);
        };
        let sample = state.storage.samples().get(label).await?;
        Ok(Some(sample.metadata().created()))
    }

    /// Parent run of the `index`th sample.
    pub async fn sample_parent_run(&self, index: usize) -> Result<Option<String>> {
        let state = self.state.lock().await;
        let Some(label) = state.samples.labels.get(index) else {
            return Ok(None);
        };
        let sample = state.storage.samples().get(label).await?;
        Ok(Some(sample.parent_run().to_string()))
    }

    /// Load a record.
    pub async fn record(&self, kind: RecordKind, label: &str) -> Result<Record> {
        self.state.lock().await.storage.get(kind, label).await
    }

    /// Current status of a record.
    pub async fn record_status(&self, kind: RecordKind, label: &str) -> Result<Status> {
        Ok(self.record(kind, label).await?.status())
    }

    /// Render a stored record.
    pub async fn dump(&self, kind: RecordKind, label: &str, format: DumpFormat) -> Result<String> {
        self.state
            .lock()
            .await
            .storage
            .dump(kind, label, format)
            .await
    }

    /// Storage directory.
    pub fn storage_location(&self) -> &Path {
        &self.location
    }

    /// The service catalogue.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Delete every record and reset runtime state.
    #[instrument(skip(self))]
    pub async fn wipe(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.storage.wipe().await?;
        state.reset();
        Ok(())
    }

    /// Flush and close storage.
    pub async fn close(&self) -> Result<()> {
        let state = self.state.lock().await;
        state.storage.close().await?;
        info!(location = %self.location.display(), "Storage closed");
        Ok(())
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Record and metadata model.
//!
//! A [`Run`] is the top-level record for one data-generation session and a
//! [`Sample`] is a barcoded child of a run. Both embed a [`Metadata`] block
//! carrying the tag set and the status state machine:
//!
//! ```text
//! Untagged ──add_tags──► TaggedIncomplete ──check_status──► TaggedComplete
//!                               │
//!                               └──────────announce──────► Announced
//! ```
//!
//! Tag membership is fixed by the single `add_tags` call; afterwards only the
//! completion flags change.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::ServiceRegistry;

// ============================================================================
// Kinds and status
// ============================================================================

/// The two record kinds, one per storage namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// A sequencing run.
    Run,
    /// A sample within a run.
    Sample,
}

impl RecordKind {
    /// Both kinds, runs first.
    pub const ALL: [RecordKind; 2] = [RecordKind::Run, RecordKind::Sample];

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Run => "run",
            RecordKind::Sample => "sample",
        }
    }

    /// Name of the storage namespace holding this kind.
    pub fn namespace(&self) -> &'static str {
        match self {
            RecordKind::Run => "runs",
            RecordKind::Sample => "samples",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "run" => Ok(RecordKind::Run),
            "sample" => Ok(RecordKind::Sample),
            other => Err(Error::validation(
                "kind",
                format!("unsupported record type: {other}"),
            )),
        }
    }
}

/// Lifecycle status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No tags have been added.
    #[default]
    Untagged,
    /// Tagged, at least one tag still pending.
    TaggedIncomplete,
    /// Tagged, every tag complete.
    TaggedComplete,
    /// Requests dispatched to every pending service.
    Announced,
}

impl Status {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Untagged => "untagged",
            Status::TaggedIncomplete => "tagged_incomplete",
            Status::TaggedComplete => "tagged_complete",
            Status::Announced => "announced",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// A timestamped history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// When the comment was added.
    pub timestamp: DateTime<Utc>,
    /// The comment text.
    pub text: String,
}

/// Shared bookkeeping embedded in every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub(crate) label: String,
    pub(crate) created: DateTime<Utc>,
    pub(crate) history: Vec<Comment>,
    pub(crate) tags: BTreeMap<String, bool>,
    pub(crate) request_order: Vec<String>,
    pub(crate) status: Status,
}

impl Metadata {
    fn new(label: String) -> Self {
        Self {
            label,
            created: Utc::now(),
            history: Vec::new(),
            tags: BTreeMap::new(),
            request_order: Vec::new(),
            status: Status::Untagged,
        }
    }

    /// The record label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Creation timestamp.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Comment history, oldest first.
    pub fn history(&self) -> &[Comment] {
        &self.history
    }

    /// Tag set: service name to completion flag.
    pub fn tags(&self) -> &BTreeMap<String, bool> {
        &self.tags
    }

    /// Dependency-respecting dispatch order of the tags.
    pub fn request_order(&self) -> &[String] {
        &self.request_order
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Append a comment to the history.
    pub fn add_comment(&mut self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        if text.is_empty() {
            return Err(Error::validation("comment", "no text in comment"));
        }
        self.history.push(Comment {
            timestamp: Utc::now(),
            text,
        });
        Ok(())
    }

    /// Tag the record with services for a record of `kind`.
    ///
    /// All names are validated before anything is changed, so a failed call
    /// leaves the metadata untouched.
    pub fn add_tags<S: AsRef<str>>(
        &mut self,
        kind: RecordKind,
        names: &[S],
        registry: &ServiceRegistry,
    ) -> Result<()> {
        if names.is_empty() {
            return Err(Error::validation("tags", "no tags provided"));
        }
        if !self.tags.is_empty() {
            return Err(Error::AlreadyTagged {
                label: self.label.clone(),
            });
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in names.iter().map(AsRef::as_ref) {
            if !seen.insert(name) {
                return Err(Error::validation(
                    "tags",
                    format!("duplicate tag name: {name}"),
                ));
            }
            let service = registry.get(name).ok_or_else(|| Error::UnknownService {
                name: name.to_string(),
            })?;
            if service.kind() != kind {
                return Err(Error::WrongRecordKind {
                    service: name.to_string(),
                    expected: service.kind(),
                    actual: kind,
                });
            }
        }

        let order = registry.order(names)?;

        let listing = order.join(", ");
        self.tags = order.iter().map(|name| (name.clone(), false)).collect();
        self.request_order = order;
        self.status = Status::TaggedIncomplete;
        self.add_comment(format!("tagged with: {listing}."))
    }

    /// Set the completion flag of an existing tag.
    pub fn set_tag(&mut self, name: &str, complete: bool) -> Result<()> {
        let Some(flag) = self.tags.get_mut(name) else {
            return Err(Error::UnknownTag {
                label: self.label.clone(),
                tag: name.to_string(),
            });
        };
        *flag = complete;
        self.add_comment(format!("{name} tag marked as {complete}."))
    }

    /// Recompute the status from the tag set.
    ///
    /// Only `TaggedIncomplete` can move (to `TaggedComplete`). Returns whether
    /// the status changed.
    pub fn check_status(&mut self) -> bool {
        if self.status == Status::TaggedIncomplete && self.tags.values().all(|done| *done) {
            self.status = Status::TaggedComplete;
            return true;
        }
        false
    }

    /// Tags still pending, in request order.
    pub fn incomplete_tags(&self) -> impl Iterator<Item = &str> + '_ {
        self.request_order
            .iter()
            .filter(|name| !self.tags.get(name.as_str()).copied().unwrap_or(false))
            .map(String::as_str)
    }

    pub(crate) fn mark_announced(&mut self, kind: RecordKind) -> Result<()> {
        self.add_comment(format!("{kind} announced."))?;
        self.status = Status::Announced;
        Ok(())
    }
}

// ============================================================================
// Records
// ============================================================================

/// A sequencing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub(crate) metadata: Metadata,
    pub(crate) output_dir: PathBuf,
    pub(crate) fast5_dir: PathBuf,
    pub(crate) fastq_dir: PathBuf,
    pub(crate) scheme: Option<String>,
}

impl Run {
    /// Create an untagged run.
    pub fn new(
        label: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        fast5_dir: impl Into<PathBuf>,
        fastq_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let label = label.into();
        if label.is_empty() {
            return Err(Error::validation("label", "run label must not be empty"));
        }
        let mut metadata = Metadata::new(label);
        metadata.add_comment("run created.")?;
        Ok(Self {
            metadata,
            output_dir: output_dir.into(),
            fast5_dir: fast5_dir.into(),
            fastq_dir: fastq_dir.into(),
            scheme: None,
        })
    }

    /// Set the processing scheme identifier.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    /// Shared metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable shared metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// The run label.
    pub fn label(&self) -> &str {
        &self.metadata.label
    }

    /// Top-level output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Directory of raw signal (fast5) output.
    pub fn fast5_dir(&self) -> &Path {
        &self.fast5_dir
    }

    /// Directory of basecalled (fastq) output.
    pub fn fastq_dir(&self) -> &Path {
        &self.fastq_dir
    }

    /// Processing scheme, if any.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Tag with run services. See [`Metadata::add_tags`].
    pub fn add_tags<S: AsRef<str>>(&mut self, names: &[S], registry: &ServiceRegistry) -> Result<()> {
        self.metadata.add_tags(RecordKind::Run, names, registry)
    }
}

/// A barcoded sample belonging to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub(crate) metadata: Metadata,
    pub(crate) barcode: i32,
    pub(crate) parent_run: String,
}

impl Sample {
    /// Create an untagged sample.
    pub fn new(label: impl Into<String>, parent_run: impl Into<String>, barcode: i32) -> Result<Self> {
        let label = label.into();
        if label.is_empty() {
            return Err(Error::validation("label", "sample label must not be empty"));
        }
        let parent_run = parent_run.into();
        if parent_run.is_empty() {
            return Err(Error::validation("parent_run", "parent run must not be empty"));
        }
        let mut metadata = Metadata::new(label);
        metadata.add_comment("sample created.")?;
        Ok(Self {
            metadata,
            barcode,
            parent_run,
        })
    }

    /// Shared metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable shared metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// The sample label.
    pub fn label(&self) -> &str {
        &self.metadata.label
    }

    /// Barcode number.
    pub fn barcode(&self) -> i32 {
        self.barcode
    }

    /// Label of the run this sample belongs to.
    pub fn parent_run(&self) -> &str {
        &self.parent_run
    }

    /// Tag with sample services. See [`Metadata::add_tags`].
    pub fn add_tags<S: AsRef<str>>(&mut self, names: &[S], registry: &ServiceRegistry) -> Result<()> {
        self.metadata.add_tags(RecordKind::Sample, names, registry)
    }
}

/// Either kind of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    /// A run.
    Run(Run),
    /// A sample.
    Sample(Sample),
}

impl Record {
    /// Which namespace the record belongs to.
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Run(_) => RecordKind::Run,
            Record::Sample(_) => RecordKind::Sample,
        }
    }

    /// Shared metadata.
    pub fn metadata(&self) -> &Metadata {
        match self {
            Record::Run(run) => &run.metadata,
            Record::Sample(sample) => &sample.metadata,
        }
    }

    /// Mutable shared metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            Record::Run(run) => &mut run.metadata,
            Record::Sample(sample) => &mut sample.metadata,
        }
    }

    /// The record label.
    pub fn label(&self) -> &str {
        self.metadata().label()
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.metadata().status()
    }

    /// Dispatch order of the tags.
    pub fn request_order(&self) -> &[String] {
        self.metadata().request_order()
    }

    /// The fields a service needs to act on this record.
    pub fn dispatch_payload(&self) -> DispatchPayload {
        match self {
            Record::Run(run) => DispatchPayload::Run {
                label: run.label().to_string(),
                output_dir: run.output_dir.clone(),
                fast5_dir: run.fast5_dir.clone(),
                fastq_dir: run.fastq_dir.clone(),
                scheme: run.scheme.clone(),
            },
            Record::Sample(sample) => DispatchPayload::Sample {
                label: sample.label().to_string(),
                parent_run: sample.parent_run.clone(),
                barcode: sample.barcode,
            },
        }
    }
}

impl From<Run> for Record {
    fn from(run: Run) -> Self {
        Record::Run(run)
    }
}

impl From<Sample> for Record {
    fn from(sample: Sample) -> Self {
        Record::Sample(sample)
    }
}

/// What a [`ServiceClient`](crate::services::ServiceClient) receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DispatchPayload {
    /// Run fields.
    Run {
        /// Run label.
        label: String,
        /// Top-level output directory.
        output_dir: PathBuf,
        /// Raw signal directory.
        fast5_dir: PathBuf,
        /// Basecalled output directory.
        fastq_dir: PathBuf,
        /// Processing scheme.
        scheme: Option<String>,
    },
    /// Sample fields.
    Sample {
        /// Sample label.
        label: String,
        /// Parent run label.
        parent_run: String,
        /// Barcode number.
        barcode: i32,
    },
}

impl DispatchPayload {
    /// Kind of the record this payload came from.
    pub fn kind(&self) -> RecordKind {
        match self {
            DispatchPayload::Run { .. } => RecordKind::Run,
            DispatchPayload::Sample { .. } => RecordKind::Sample,
        }
    }

    /// Label of the record this payload came from.
    pub fn label(&self) -> &str {
        match self {
            DispatchPayload::Run { label, .. } | DispatchPayload::Sample { label, .. } => label,
        }
    }
}

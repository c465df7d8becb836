// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence facade for herald records.
//!
//! Runs and samples live in two physically separate SQLite files inside the
//! storage directory:
//!
//! ```text
//! <store_dir>/
//! ├── runs.db      records(label, data, created_at)
//! └── samples.db   records(label, data, created_at)
//! ```
//!
//! Each [`Store`] enforces label uniqueness and a fixed capacity. Writes are
//! committed before the call returns.

mod codec;
pub mod sqlite;

pub use self::sqlite::{InsertOutcome, SqliteKeyspace};

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::records::{Record, RecordKind, Run, Sample};

/// File name of the run store.
pub const RUNS_FILE: &str = "runs.db";
/// File name of the sample store.
pub const SAMPLES_FILE: &str = "samples.db";

/// Output format for [`Store::dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpFormat {
    /// Debug rendering of the stored message.
    #[default]
    Raw,
    /// Pretty-printed JSON of the record.
    Json,
}

/// A record type with a stable binary encoding.
pub trait StoredRecord: Serialize + Sized + Send + Sync {
    /// Namespace the record lives in.
    const KIND: RecordKind;

    /// Storage key.
    fn label(&self) -> &str;

    /// Encode to the stored binary layout.
    fn encode(&self) -> Vec<u8>;

    /// Decode bytes stored under `key`.
    fn decode(key: &str, bytes: &[u8]) -> Result<Self>;

    /// Render the stored message without converting it.
    fn raw_dump(key: &str, bytes: &[u8]) -> Result<String>;
}

/// Snapshot of a store's labels, in insertion order.
pub type Labels = std::vec::IntoIter<String>;

/// Typed view over one namespace.
pub struct Store<R> {
    keyspace: SqliteKeyspace,
    max_entries: usize,
    _record: PhantomData<fn() -> R>,
}

impl<R: StoredRecord> Store<R> {
    /// Wrap a keyspace.
    pub fn new(keyspace: SqliteKeyspace, max_entries: usize) -> Self {
        Self {
            keyspace,
            max_entries,
            _record: PhantomData,
        }
    }

    /// Namespace of this store.
    pub fn kind(&self) -> RecordKind {
        R::KIND
    }

    /// Capacity of this store.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<usize> {
        self.keyspace.len().await
    }

    /// One-shot snapshot of every label.
    pub async fn keys(&self) -> Result<Labels> {
        Ok(self.keyspace.keys().await?.into_iter())
    }

    /// Whether a record with `label` exists.
    pub async fn contains(&self, label: &str) -> Result<bool> {
        self.keyspace.contains(label).await
    }

    /// Load a record.
    pub async fn get(&self, label: &str) -> Result<R> {
        let bytes = self.raw(label).await?;
        R::decode(label, &bytes)
    }

    /// Add a new record.
    ///
    /// Fails with [`Error::CapacityReached`] when the store is full and with
    /// [`Error::DuplicateLabel`] when the label is taken. Existing records are
    /// never overwritten.
    pub async fn put(&self, record: &R) -> Result<()> {
        let label = record.label();
        match self
            .keyspace
            .insert(label, &record.encode(), self.max_entries)
            .await?
        {
            InsertOutcome::Inserted => {
                debug!(kind = %R::KIND, label = %label, "Stored record");
                Ok(())
            }
            InsertOutcome::Full => Err(Error::CapacityReached {
                kind: R::KIND,
                max: self.max_entries,
            }),
            InsertOutcome::Exists => Err(Error::DuplicateLabel {
                kind: R::KIND,
                label: label.to_string(),
            }),
        }
    }

    /// Replace a stored record.
    pub async fn update(&self, record: &R) -> Result<()> {
        let label = record.label();
        if !self.keyspace.replace(label, &record.encode()).await? {
            return Err(self.not_found(label));
        }
        debug!(kind = %R::KIND, label = %label, "Updated record");
        Ok(())
    }

    /// Remove a record.
    pub async fn delete(&self, label: &str) -> Result<()> {
        if !self.keyspace.remove(label).await? {
            return Err(self.not_found(label));
        }
        debug!(kind = %R::KIND, label = %label, "Deleted record");
        Ok(())
    }

    /// Render a stored record for inspection.
    pub async fn dump(&self, label: &str, format: DumpFormat) -> Result<String> {
        let bytes = self.raw(label).await?;
        match format {
            DumpFormat::Raw => R::raw_dump(label, &bytes),
            DumpFormat::Json => {
                let record = R::decode(label, &bytes)?;
                Ok(serde_json::to_string_pretty(&record)?)
            }
        }
    }

    async fn raw(&self, label: &str) -> Result<Vec<u8>> {
        self.keyspace
            .get(label)
            .await?
            .ok_or_else(|| self.not_found(label))
    }

    fn not_found(&self, label: &str) -> Error {
        Error::NotFound {
            kind: R::KIND,
            label: label.to_string(),
        }
    }
}

/// Both namespaces under one storage directory.
pub struct Storage {
    location: PathBuf,
    runs: Store<Run>,
    samples: Store<Sample>,
}

impl Storage {
    /// Open (or create) the stores in `dir`.
    pub async fn open(dir: impl AsRef<Path>, max_entries: usize) -> Result<Self> {
        let location = dir.as_ref().to_path_buf();
        if max_entries == 0 {
            return Err(Error::validation("max_entries", "must be at least 1"));
        }

        let runs = SqliteKeyspace::open(location.join(RUNS_FILE)).await?;
        let samples = SqliteKeyspace::open(location.join(SAMPLES_FILE)).await?;

        info!(location = %location.display(), max_entries, "Opened storage");

        Ok(Self {
            location,
            runs: Store::new(runs, max_entries),
            samples: Store::new(samples, max_entries),
        })
    }

    /// The run store.
    pub fn runs(&self) -> &Store<Run> {
        &self.runs
    }

    /// The sample store.
    pub fn samples(&self) -> &Store<Sample> {
        &self.samples
    }

    /// Storage directory.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Number of records in a namespace.
    pub async fn count(&self, kind: RecordKind) -> Result<usize> {
        match kind {
            RecordKind::Run => self.runs.count().await,
            RecordKind::Sample => self.samples.count().await,
        }
    }

    /// Labels of a namespace.
    pub async fn keys(&self, kind: RecordKind) -> Result<Labels> {
        match kind {
            RecordKind::Run => self.runs.keys().await,
            RecordKind::Sample => self.samples.keys().await,
        }
    }

    /// Load a record of either kind.
    pub async fn get(&self, kind: RecordKind, label: &str) -> Result<Record> {
        Ok(match kind {
            RecordKind::Run => Record::Run(self.runs.get(label).await?),
            RecordKind::Sample => Record::Sample(self.samples.get(label).await?),
        })
    }

    /// Replace a record of either kind.
    pub async fn update(&self, record: &Record) -> Result<()> {
        match record {
            Record::Run(run) => self.runs.update(run).await,
            Record::Sample(sample) => self.samples.update(sample).await,
        }
    }

    /// Remove a record of either kind.
    pub async fn delete(&self, kind: RecordKind, label: &str) -> Result<()> {
        match kind {
            RecordKind::Run => self.runs.delete(label).await,
            RecordKind::Sample => self.samples.delete(label).await,
        }
    }

    /// Render a record of either kind.
    pub async fn dump(&self, kind: RecordKind, label: &str, format: DumpFormat) -> Result<String> {
        match kind {
            RecordKind::Run => self.runs.dump(label, format).await,
            RecordKind::Sample => self.samples.dump(label, format).await,
        }
    }

    /// Delete every record in both namespaces.
    pub async fn wipe(&self) -> Result<()> {
        let runs = self.runs.keyspace.clear().await?;
        let samples = self.samples.keyspace.clear().await?;
        info!(runs, samples, location = %self.location.display(), "Wiped storage");
        Ok(())
    }

    /// Flush and close both stores.
    pub async fn close(&self) -> Result<()> {
        self.runs.keyspace.close().await?;
        self.samples.keyspace.close().await?;
        debug!(location = %self.location.display(), "Closed storage");
        Ok(())
    }
}

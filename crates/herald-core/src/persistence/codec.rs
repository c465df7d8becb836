// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Binary record layout.
//!
//! Records are stored as protobuf messages with fixed field tags. Changing a
//! tag or a field type makes existing stores unreadable; such changes require
//! a wipe.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use prost::Message;

use crate::error::{Error, Result};
use crate::records::{Comment, Metadata, RecordKind, Run, Sample, Status};

use super::StoredRecord;

// ============================================================================
// Messages
// ============================================================================

/// Point in time, seconds and nanoseconds since the Unix epoch.
#[derive(Clone, PartialEq, Message)]
pub struct StoredTimestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(uint32, tag = "2")]
    pub nanos: u32,
}

/// History entry.
#[derive(Clone, PartialEq, Message)]
pub struct StoredComment {
    #[prost(message, optional, tag = "1")]
    pub timestamp: Option<StoredTimestamp>,
    #[prost(string, tag = "2")]
    pub text: String,
}

/// Record status. Zero is reserved so an unset field is detectable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum StoredStatus {
    Unspecified = 0,
    Untagged = 1,
    TaggedIncomplete = 2,
    TaggedComplete = 3,
    Announced = 4,
}

/// Shared metadata block.
#[derive(Clone, PartialEq, Message)]
pub struct StoredMetadata {
    #[prost(string, tag = "1")]
    pub label: String,
    #[prost(message, optional, tag = "2")]
    pub created: Option<StoredTimestamp>,
    #[prost(message, repeated, tag = "3")]
    pub history: Vec<StoredComment>,
    #[prost(btree_map = "string, bool", tag = "4")]
    pub tags: BTreeMap<String, bool>,
    #[prost(string, repeated, tag = "5")]
    pub request_order: Vec<String>,
    #[prost(enumeration = "StoredStatus", tag = "6")]
    pub status: i32,
}

/// A run.
#[derive(Clone, PartialEq, Message)]
pub struct StoredRun {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<StoredMetadata>,
    #[prost(string, tag = "2")]
    pub output_directory: String,
    #[prost(string, tag = "3")]
    pub fast5_output_directory: String,
    #[prost(string, tag = "4")]
    pub fastq_output_directory: String,
    #[prost(string, optional, tag = "5")]
    pub scheme: Option<String>,
}

/// A sample.
#[derive(Clone, PartialEq, Message)]
pub struct StoredSample {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<StoredMetadata>,
    #[prost(string, tag = "2")]
    pub parent_run: String,
    #[prost(int32, tag = "3")]
    pub barcode: i32,
}

// ============================================================================
// Conversions
// ============================================================================

fn codec_error(label: &str, details: impl Into<String>) -> Error {
    Error::Codec {
        label: label.to_string(),
        details: details.into(),
    }
}

impl From<DateTime<Utc>> for StoredTimestamp {
    fn from(ts: DateTime<Utc>) -> Self {
        Self {
            seconds: ts.timestamp(),
            nanos: ts.timestamp_subsec_nanos(),
        }
    }
}

fn timestamp(label: &str, stored: Option<&StoredTimestamp>) -> Result<DateTime<Utc>> {
    let stored = stored.ok_or_else(|| codec_error(label, "missing timestamp"))?;
    DateTime::from_timestamp(stored.seconds, stored.nanos)
        .ok_or_else(|| codec_error(label, "timestamp out of range"))
}

impl From<Status> for StoredStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Untagged => StoredStatus::Untagged,
            Status::TaggedIncomplete => StoredStatus::TaggedIncomplete,
            Status::TaggedComplete => StoredStatus::TaggedComplete,
            Status::Announced => StoredStatus::Announced,
        }
    }
}

impl From<&Metadata> for StoredMetadata {
    fn from(meta: &Metadata) -> Self {
        Self {
            label: meta.label.clone(),
            created: Some(meta.created.into()),
            history: meta
                .history
                .iter()
                .map(|c| StoredComment {
                    timestamp: Some(c.timestamp.into()),
                    text: c.text.clone(),
                })
                .collect(),
            tags: meta.tags.clone(),
            request_order: meta.request_order.clone(),
            status: StoredStatus::from(meta.status) as i32,
        }
    }
}

impl StoredMetadata {
    fn into_metadata(self, key: &str) -> Result<Metadata> {
        if self.label != key {
            return Err(codec_error(
                key,
                format!("stored under a different label: {}", self.label),
            ));
        }
        let status = match StoredStatus::try_from(self.status) {
            Ok(StoredStatus::Untagged) => Status::Untagged,
            Ok(StoredStatus::TaggedIncomplete) => Status::TaggedIncomplete,
            Ok(StoredStatus::TaggedComplete) => Status::TaggedComplete,
            Ok(StoredStatus::Announced) => Status::Announced,
            Ok(StoredStatus::Unspecified) | Err(_) => {
                return Err(codec_error(key, format!("unknown status {}", self.status)));
            }
        };
        let history = self
            .history
            .into_iter()
            .map(|c| {
                Ok(Comment {
                    timestamp: timestamp(key, c.timestamp.as_ref())?,
                    text: c.text,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Metadata {
            created: timestamp(key, self.created.as_ref())?,
            label: self.label,
            history,
            tags: self.tags,
            request_order: self.request_order,
            status,
        })
    }
}

fn metadata(key: &str, stored: Option<StoredMetadata>) -> Result<Metadata> {
    stored
        .ok_or_else(|| codec_error(key, "missing metadata"))?
        .into_metadata(key)
}

// ============================================================================
// StoredRecord implementations
// ============================================================================

impl StoredRecord for Run {
    const KIND: RecordKind = RecordKind::Run;

    fn label(&self) -> &str {
        Run::label(self)
    }

    fn encode(&self) -> Vec<u8> {
        StoredRun {
            metadata: Some(StoredMetadata::from(&self.metadata)),
            output_directory: self.output_dir.to_string_lossy().into_owned(),
            fast5_output_directory: self.fast5_dir.to_string_lossy().into_owned(),
            fastq_output_directory: self.fastq_dir.to_string_lossy().into_owned(),
            scheme: self.scheme.clone(),
        }
        .encode_to_vec()
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<Self> {
        let stored = StoredRun::decode(bytes).map_err(|e| codec_error(key, e.to_string()))?;
        Ok(Run {
            metadata: metadata(key, stored.metadata)?,
            output_dir: PathBuf::from(stored.output_directory),
            fast5_dir: PathBuf::from(stored.fast5_output_directory),
            fastq_dir: PathBuf::from(stored.fastq_output_directory),
            scheme: stored.scheme,
        })
    }

    fn raw_dump(key: &str, bytes: &[u8]) -> Result<String> {
        let stored = StoredRun::decode(bytes).map_err(|e| codec_error(key, e.to_string()))?;
        Ok(format!("{stored:#?}"))
    }
}

impl StoredRecord for Sample {
    const KIND: RecordKind = RecordKind::Sample;

    fn label(&self) -> &str {
        Sample::label(self)
    }

    fn encode(&self) -> Vec<u8> {
        StoredSample {
            metadata: Some(StoredMetadata::from(&self.metadata)),
            parent_run: self.parent_run.clone(),
            barcode: self.barcode,
        }
        .encode_to_vec()
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<Self> {
        let stored = StoredSample::decode(bytes).map_err(|e| codec_error(key, e.to_string()))?;
        Ok(Sample {
            metadata: metadata(key, stored.metadata)?,
            parent_run: stored.parent_run,
            barcode: stored.barcode,
        })
    }

    fn raw_dump(key: &str, bytes: &[u8]) -> Result<String> {
        let stored = StoredSample::decode(bytes).map_err(|e| codec_error(key, e.to_string()))?;
        Ok(format!("{stored:#?}"))
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Herald Core - Laboratory Record Orchestration Engine
//!
//! This crate tracks sequencing **runs** and their barcoded **samples**, tags
//! them with the external services that must process them, and announces them
//! to those services in dependency order. All record state is persisted to
//! SQLite so a restart picks up exactly where it left off.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Presentation layer                                │
//! │            (herald binary, GUI, scripts: create/tag/announce)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Orchestrator                                   │
//! │        announcement queue · status counters · dispatch algorithm         │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                                              │
//!           │ put / get / update                           │ order / lookup
//!           ▼                                              ▼
//! ┌───────────────────────┐                    ┌─────────────────────────────┐
//! │       Storage         │                    │      ServiceRegistry        │
//! │  runs.db  samples.db  │                    │  descriptors + dependencies │
//! └───────────────────────┘                    └─────────────────────────────┘
//!                                                          │
//!                                                          │ check_access / send_request
//!                                                          ▼
//!                                              ┌─────────────────────────────┐
//!                                              │   ServiceClient (per service)│
//!                                              └─────────────────────────────┘
//! ```
//!
//! # Record Status State Machine
//!
//! ```text
//!        ┌──────────┐  add_tags   ┌───────────────────┐
//!        │ UNTAGGED │────────────►│ TAGGED_INCOMPLETE │──────┐
//!        └──────────┘             └─────────┬─────────┘      │
//!                                           │                │ announce
//!                          all tags complete│                │
//!                                           ▼                ▼
//!                                 ┌────────────────┐   ┌───────────┐
//!                                 │ TAGGED_COMPLETE│   │ ANNOUNCED │
//!                                 └────────────────┘   └───────────┘
//! ```
//!
//! | Status | Queued | Deletable |
//! |--------|--------|-----------|
//! | `untagged` | no | yes |
//! | `tagged_incomplete` | yes | yes |
//! | `tagged_complete` | no | yes |
//! | `announced` | no | no |
//!
//! # Announcement
//!
//! [`Orchestrator::announce`] drains the queue:
//!
//! 1. Fails with `EmptyQueue` when nothing is queued
//! 2. Probes every required service; one unreachable service aborts the pass
//! 3. Sends all queued runs, then all queued samples, in queue order
//! 4. Per record, requests each pending service in dependency order
//! 5. Stops at the first failed request; the failing record stays queued
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `HERALD_STORE_DIR` | No | `.herald` | Directory holding `runs.db` and `samples.db` |
//! | `HERALD_MAX_ENTRIES` | No | `10` | Records per namespace |
//! | `HERALD_REQUEST_TIMEOUT_SECS` | No | `30` | Per-request timeout |
//! | `HERALD_PROBE_TIMEOUT_MS` | No | `1000` | Connectivity probe timeout |
//! | `HERALD_SEQUENCE_ADDR` | No | `127.0.0.1:7777` | Sequencing service |
//! | `HERALD_BASECALL_ADDR` | No | `127.0.0.1:7778` | Basecalling service |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types with string error codes
//! - [`records`]: Runs, samples and the tag/status state machine
//! - [`registry`]: Service catalogue and dependency ordering
//! - [`services`]: Service client contract and built-in clients
//! - [`persistence`]: SQLite-backed run and sample stores
//! - [`queue`]: Announcement queue
//! - [`orchestrator`]: The engine tying it together

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Error types with string error codes.
pub mod error;

/// Orchestration engine: queue, counters and announcement.
pub mod orchestrator;

/// Durable run and sample stores.
pub mod persistence;

/// Announcement queue.
pub mod queue;

/// Run/sample records and their metadata.
pub mod records;

/// Service catalogue with dependency ordering.
pub mod registry;

/// Service client contract, TCP probe and built-in clients.
pub mod services;

pub use error::{Error, Result, ServiceError};
pub use orchestrator::{
    AnnounceReport, CreateRun, CreateSample, Orchestrator, OrchestratorBuilder, StatusCounts,
};
pub use persistence::{DumpFormat, Storage};
pub use records::{Record, RecordKind, Run, Sample, Status};
pub use registry::{ServiceDescriptor, ServiceRegistry};
pub use services::ServiceClient;

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for herald-core integration tests.
//!
//! Provides TestContext with an on-disk orchestrator and scriptable mock
//! service clients.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use herald_core::records::DispatchPayload;
use herald_core::{
    CreateRun, CreateSample, Orchestrator, RecordKind, ServiceClient, ServiceDescriptor,
    ServiceError, ServiceRegistry, Storage,
};

/// Every accepted request as `(service, label)`, in dispatch order.
pub type RequestLog = Arc<Mutex<Vec<(String, String)>>>;

/// Service client that records requests and can be told to misbehave.
pub struct MockClient {
    service: String,
    log: RequestLog,
    reachable: AtomicBool,
    failing: AtomicBool,
    delay_ms: AtomicUsize,
    calls: AtomicUsize,
    probes: AtomicUsize,
}

impl MockClient {
    pub fn new(service: &str, log: RequestLog) -> Arc<Self> {
        Arc::new(Self {
            service: service.to_string(),
            log,
            reachable: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            delay_ms: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Number of `send_request` calls, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceClient for MockClient {
    async fn check_access(&self, _address: &str, _timeout: Duration) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }

    async fn send_request(
        &self,
        _address: &str,
        payload: &DispatchPayload,
    ) -> Result<(), ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::Rejected(format!(
                "{} is down for maintenance",
                self.service
            )));
        }

        self.log
            .lock()
            .unwrap()
            .push((self.service.clone(), payload.label().to_string()));
        Ok(())
    }
}

/// A service to register: name, record kind, dependencies.
pub type ServiceDef = (&'static str, RecordKind, &'static [&'static str]);

/// Run services chained sequence → basecall → upload, plus a sample pipeline.
pub const LAB_SERVICES: &[ServiceDef] = &[
    ("sequence", RecordKind::Run, &[]),
    ("basecall", RecordKind::Run, &["sequence"]),
    ("upload", RecordKind::Run, &["basecall"]),
    ("pipeline", RecordKind::Sample, &[]),
];

/// On-disk orchestrator wired to mock services.
pub struct TestContext {
    pub dir: TempDir,
    pub orchestrator: Orchestrator,
    pub log: RequestLog,
    pub clients: HashMap<String, Arc<MockClient>>,
    pub max_entries: usize,
}

impl TestContext {
    /// Create a context with [`LAB_SERVICES`] and room for 10 records per namespace.
    pub async fn new() -> Self {
        Self::with_services(LAB_SERVICES, 10).await
    }

    pub async fn with_capacity(max_entries: usize) -> Self {
        Self::with_services(LAB_SERVICES, max_entries).await
    }

    pub async fn with_services(services: &[ServiceDef], max_entries: usize) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let log: RequestLog = Arc::new(Mutex::new(Vec::new()));

        // 1. Register services, each with its own mock client
        let mut registry = ServiceRegistry::with_probe_timeout(Duration::from_millis(200));
        let mut clients = HashMap::new();
        for (port, (name, kind, deps)) in services.iter().enumerate() {
            let client = MockClient::new(name, log.clone());
            registry
                .register(
                    ServiceDescriptor::new(
                        *name,
                        *kind,
                        format!("127.0.0.1:{}", 9100 + port),
                        client.clone(),
                    )
                    .depends_on(deps.iter().copied()),
                )
                .expect("Failed to register service");
            clients.insert(name.to_string(), client);
        }

        // 2. Open storage and build the orchestrator
        let storage = Storage::open(dir.path(), max_entries)
            .await
            .expect("Failed to open storage");
        let orchestrator = Orchestrator::builder()
            .storage(storage)
            .registry(Arc::new(registry))
            .request_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build orchestrator");
        orchestrator.rebuild().await.expect("Failed to rebuild");

        Self {
            dir,
            orchestrator,
            log,
            clients,
            max_entries,
        }
    }

    /// Close storage and start a fresh orchestrator over the same files.
    pub async fn restart(&mut self) {
        self.orchestrator.close().await.expect("Failed to close");

        let storage = Storage::open(self.dir.path(), self.max_entries)
            .await
            .expect("Failed to reopen storage");
        self.orchestrator = Orchestrator::builder()
            .storage(storage)
            .registry(self.orchestrator.registry().clone())
            .request_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build orchestrator");
        self.orchestrator.rebuild().await.expect("Failed to rebuild");
    }

    pub fn client(&self, service: &str) -> &Arc<MockClient> {
        self.clients
            .get(service)
            .unwrap_or_else(|| panic!("no mock client for {service}"))
    }

    /// Accepted requests so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().clone()
    }

    /// Run request with data directories under the temp dir.
    pub fn run(&self, label: &str) -> CreateRun {
        let out: PathBuf = self.dir.path().join("data").join(label);
        CreateRun::new(label, &out, out.join("fast5"), out.join("fastq"))
    }

    pub fn sample(&self, label: &str, parent_run: &str, barcode: i32) -> CreateSample {
        CreateSample::new(label, parent_run, barcode)
    }
}

/// Shorthand for building `(service, label)` log entries.
pub fn req(service: &str, label: &str) -> (String, String) {
    (service.to_string(), label.to_string())
}

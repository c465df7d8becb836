// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service clients and the default service catalogue.
//!
//! The engine only sees a service through [`ServiceClient`]: a connectivity
//! probe and a request that either succeeds or fails. How a request travels
//! to the service is up to the client implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, ServiceError};
use crate::records::{DispatchPayload, RecordKind};
use crate::registry::{ServiceDescriptor, ServiceRegistry};

/// Name of the sequencing service.
pub const SEQUENCE_SERVICE: &str = "sequence";
/// Name of the basecalling service.
pub const BASECALL_SERVICE: &str = "basecall";

/// Contract between the engine and a remote service.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Whether the service at `address` answers within `timeout`.
    ///
    /// Defaults to a plain TCP connect.
    async fn check_access(&self, address: &str, timeout: Duration) -> bool {
        match probe_tcp(address, timeout).await {
            Ok(()) => true,
            Err(e) => {
                debug!(address = %address, error = %e, "TCP probe failed");
                false
            }
        }
    }

    /// Submit a record to the service at `address`.
    async fn send_request(
        &self,
        address: &str,
        payload: &DispatchPayload,
    ) -> std::result::Result<(), ServiceError>;
}

/// Try to open a TCP connection to `address` within `timeout`.
pub async fn probe_tcp(address: &str, timeout: Duration) -> std::result::Result<(), ServiceError> {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(source)) => Err(ServiceError::Connect {
            address: address.to_string(),
            source,
        }),
        Err(_) => Err(ServiceError::Timeout(timeout)),
    }
}

/// Data product a [`DirectorySentinel`] watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataProduct {
    /// Raw signal files.
    Fast5,
    /// Basecalled reads.
    Fastq,
}

/// Client that treats the presence of a run's output directory as success.
///
/// Sequencing and basecalling happen on the instrument; the request succeeds
/// once their output is on disk. The service address is not used, so the
/// sentinel is always reachable.
#[derive(Debug, Clone, Copy)]
pub struct DirectorySentinel {
    product: DataProduct,
}

impl DirectorySentinel {
    /// Watch a run's fast5 directory.
    pub fn fast5() -> Self {
        Self {
            product: DataProduct::Fast5,
        }
    }

    /// Watch a run's fastq directory.
    pub fn fastq() -> Self {
        Self {
            product: DataProduct::Fastq,
        }
    }
}

#[async_trait]
impl ServiceClient for DirectorySentinel {
    async fn check_access(&self, _address: &str, _timeout: Duration) -> bool {
        true
    }

    async fn send_request(
        &self,
        _address: &str,
        payload: &DispatchPayload,
    ) -> std::result::Result<(), ServiceError> {
        let DispatchPayload::Run {
            fast5_dir,
            fastq_dir,
            ..
        } = payload
        else {
            return Err(ServiceError::WrongRecordKind {
                expected: RecordKind::Run,
                actual: payload.kind(),
            });
        };

        let dir: &Path = match self.product {
            DataProduct::Fast5 => fast5_dir,
            DataProduct::Fastq => fastq_dir,
        };
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(ServiceError::Rejected(format!(
                "not a directory: {}",
                dir.display()
            ))),
            Err(e) => Err(ServiceError::Rejected(format!(
                "no output at {}: {e}",
                dir.display()
            ))),
        }
    }
}

/// Client that accepts every request and is always reachable.
///
/// Useful for dry runs and for services that only need bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopClient;

#[async_trait]
impl ServiceClient for NoopClient {
    async fn check_access(&self, _address: &str, _timeout: Duration) -> bool {
        true
    }

    async fn send_request(
        &self,
        address: &str,
        payload: &DispatchPayload,
    ) -> std::result::Result<(), ServiceError> {
        debug!(address = %address, label = %payload.label(), "No-op request");
        Ok(())
    }
}

/// Build the catalogue used by the `herald` binary.
///
/// `basecall` depends on `sequence`; both operate on runs.
pub fn default_registry(config: &Config) -> Result<ServiceRegistry> {
    let mut registry = ServiceRegistry::with_probe_timeout(config.probe_timeout);
    registry.register(ServiceDescriptor::new(
        SEQUENCE_SERVICE,
        RecordKind::Run,
        config.sequence_addr.clone(),
        Arc::new(DirectorySentinel::fast5()),
    ))?;
    registry.register(
        ServiceDescriptor::new(
            BASECALL_SERVICE,
            RecordKind::Run,
            config.basecall_addr.clone(),
            Arc::new(DirectorySentinel::fastq()),
        )
        .depends_on([SEQUENCE_SERVICE]),
    )?;
    Ok(registry)
}

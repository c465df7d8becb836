// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service registry.
//!
//! Services are registered once at bootstrap, each naming the services it
//! depends on. Dependencies must already be registered, so the full catalogue
//! is acyclic by construction; [`ServiceRegistry::order`] still checks the
//! requested subset and reports [`Error::CycleDetected`] rather than looping.
//!
//! The registry is built once and then shared read-only behind an `Arc`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::records::RecordKind;
use crate::services::ServiceClient;

/// Default connectivity probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// A named external service.
#[derive(Clone)]
pub struct ServiceDescriptor {
    name: String,
    kind: RecordKind,
    depends_on: Vec<String>,
    address: String,
    client: Arc<dyn ServiceClient>,
}

impl ServiceDescriptor {
    /// Describe a service with no dependencies.
    pub fn new(
        name: impl Into<String>,
        kind: RecordKind,
        address: impl Into<String>,
        client: Arc<dyn ServiceClient>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            depends_on: Vec::new(),
            address: address.into(),
            client,
        }
    }

    /// Declare services that must be requested before this one.
    pub fn depends_on<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for service in services {
            let service = service.into();
            if !self.depends_on.contains(&service) {
                self.depends_on.push(service);
            }
        }
        self
    }

    /// Unique service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record kind the service operates on.
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Names of the services this one depends on.
    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    /// Network address of the service.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Client used to reach the service.
    pub fn client(&self) -> &Arc<dyn ServiceClient> {
        &self.client
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("depends_on", &self.depends_on)
            .field("address", &self.address)
            .field("client", &"<dyn ServiceClient>")
            .finish()
    }
}

/// Catalogue of services in registration order.
#[derive(Debug)]
pub struct ServiceRegistry {
    services: Vec<ServiceDescriptor>,
    index: HashMap<String, usize>,
    probe_timeout: Duration,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    /// Create an empty registry with the default probe timeout.
    pub fn new() -> Self {
        Self::with_probe_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    /// Create an empty registry with a custom probe timeout.
    pub fn with_probe_timeout(probe_timeout: Duration) -> Self {
        Self {
            services: Vec::new(),
            index: HashMap::new(),
            probe_timeout,
        }
    }

    /// Add a service to the catalogue.
    ///
    /// Fails if the name is taken, if the service depends on itself, or if a
    /// dependency has not been registered yet.
    pub fn register(&mut self, descriptor: ServiceDescriptor) -> Result<()> {
        if descriptor.name.is_empty() {
            return Err(Error::validation("name", "service name must not be empty"));
        }
        if self.index.contains_key(&descriptor.name) {
            return Err(Error::DuplicateService {
                name: descriptor.name,
            });
        }
        for dependency in &descriptor.depends_on {
            if *dependency == descriptor.name {
                return Err(Error::SelfDependency {
                    name: descriptor.name,
                });
            }
            if !self.index.contains_key(dependency) {
                return Err(Error::MissingDependency {
                    name: descriptor.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        debug!(
            service = %descriptor.name,
            kind = %descriptor.kind,
            address = %descriptor.address,
            depends_on = ?descriptor.depends_on,
            "Registered service"
        );
        self.index
            .insert(descriptor.name.clone(), self.services.len());
        self.services.push(descriptor);
        Ok(())
    }

    /// Look up a service by name.
    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.index.get(name).map(|&pos| &self.services[pos])
    }

    /// Whether a service with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Service names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.services.iter().map(|s| s.name.as_str())
    }

    /// Services that operate on `kind`, in registration order.
    pub fn services_for(&self, kind: RecordKind) -> impl Iterator<Item = &ServiceDescriptor> + '_ {
        self.services.iter().filter(move |s| s.kind == kind)
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no services are registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Timeout applied to connectivity probes.
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Order a subset of services so every dependency comes first.
    ///
    /// Only dependencies between the requested services are considered.
    /// Ties are broken by registration order, so the result is deterministic.
    pub fn order<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>> {
        // 1. Resolve names to registration positions
        let mut positions = Vec::with_capacity(names.len());
        for name in names.iter().map(AsRef::as_ref) {
            let pos = self
                .index
                .get(name)
                .copied()
                .ok_or_else(|| Error::UnknownService {
                    name: name.to_string(),
                })?;
            positions.push(pos);
        }
        positions.sort_unstable();
        positions.dedup();

        // 2. Build the dependency graph restricted to the subset
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(positions.len(), 0);
        let nodes: HashMap<usize, NodeIndex> = positions
            .iter()
            .map(|&pos| (pos, graph.add_node(pos)))
            .collect();
        for &pos in &positions {
            for dependency in &self.services[pos].depends_on {
                let Some(dep_pos) = self.index.get(dependency) else {
                    continue;
                };
                if let (Some(&from), Some(&to)) = (nodes.get(dep_pos), nodes.get(&pos)) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        // 3. Kahn's algorithm, lowest registration position first
        let mut in_degree: HashMap<NodeIndex, usize> =
            graph.node_indices().map(|idx| (idx, 0)).collect();
        for edge in graph.edge_references() {
            *in_degree.entry(edge.target()).or_insert(0) += 1;
        }

        let mut ready: BTreeSet<usize> = graph
            .node_indices()
            .filter(|idx| in_degree.get(idx).copied().unwrap_or(0) == 0)
            .map(|idx| graph[idx])
            .collect();

        let mut ordered = Vec::with_capacity(positions.len());
        while let Some(pos) = ready.pop_first() {
            ordered.push(self.services[pos].name.clone());
            let Some(&idx) = nodes.get(&pos) else {
                continue;
            };
            for next in graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&next) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.insert(graph[next]);
                    }
                }
            }
        }

        // 4. Anything left over sits on a cycle
        if ordered.len() != graph.node_count() {
            let mut stuck: Vec<usize> = in_degree
                .iter()
                .filter(|(_, deg)| **deg > 0)
                .map(|(idx, _)| graph[*idx])
                .collect();
            stuck.sort_unstable();
            return Err(Error::CycleDetected {
                services: stuck
                    .into_iter()
                    .map(|pos| self.services[pos].name.clone())
                    .collect(),
            });
        }

        Ok(ordered)
    }

    /// Probe a service through its client.
    ///
    /// Unknown services are reported as unreachable.
    pub async fn check_access(&self, name: &str) -> bool {
        let Some(service) = self.get(name) else {
            warn!(service = %name, "Connectivity check for unregistered service");
            return false;
        };
        let reachable = service
            .client
            .check_access(&service.address, self.probe_timeout)
            .await;
        debug!(service = %name, address = %service.address, reachable, "Connectivity check");
        reachable
    }
}

//! Registry engine: announce, look up, list, and watch services.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::{NodeKey, Service, ServiceRecord};
use crate::transport::{Transport, SERVICE_ENUMERATION};
use crate::watcher::{self, Watcher};

/// Timing policy for a registry instance.
///
/// The defaults suit a real segment; constrained environments without
/// multicast reach (CI sandboxes) want much shorter collection timeouts so
/// callers are not left waiting on answers that cannot arrive.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a lookup collects responses. Default: 3 seconds.
    pub timeout: Duration,
    /// How long a list collects responses; shorter, since many responders
    /// answer a wildcard at once. Default: 1 second.
    pub list_timeout: Duration,
    /// How often self-announcements repeat. Default: 30 seconds.
    pub announce_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            list_timeout: Duration::from_secs(1),
            announce_interval: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    /// Set the lookup collection timeout.
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    /// Set the list collection timeout.
    pub fn list_timeout(mut self, d: Duration) -> Self {
        self.list_timeout = d;
        self
    }

    /// Set the self-announcement interval.
    pub fn announce_interval(mut self, d: Duration) -> Self {
        self.announce_interval = d;
        self
    }
}

/// One announced node: its wire record and the task re-announcing it.
struct Announced {
    record: ServiceRecord,
    task: JoinHandle<()>,
}

/// Zero-configuration service registry over a multicast segment.
///
/// Owns the authoritative set of locally-announced nodes. Entries announced
/// by peers are never cached here; lookup and list reconstruct them from
/// responses per call.
pub struct Registry {
    transport: Arc<dyn Transport>,
    config: RegistryConfig,
    announced: Mutex<HashMap<NodeKey, Announced>>,
    shutdown: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl Registry {
    /// Create a registry with default timing on the given segment.
    pub fn new(transport: impl Transport) -> Self {
        Self::with_config(transport, RegistryConfig::default())
    }

    /// Create a registry with an explicit timing policy.
    pub fn with_config(transport: impl Transport, config: RegistryConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            transport: Arc::new(transport),
            config,
            announced: Mutex::new(HashMap::new()),
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Register every node of `service` and keep announcing each until it
    /// is deregistered.
    ///
    /// Idempotent: re-registering a node refreshes its announcement
    /// schedule and content without duplicating state.
    pub async fn register(&self, service: &Service) -> Result<()> {
        self.ensure_open()?;
        for node in &service.nodes {
            let record = ServiceRecord::announce(&service.name, &service.version, node)?;
            // first announce is synchronous so a send failure surfaces to
            // the registering caller
            self.transport.announce(&record).await?;

            let task = self.spawn_announcer(record.clone());
            let key = NodeKey::new(&service.name, &service.version, &node.id);
            let previous = self
                .announced
                .lock()
                .expect("registry lock poisoned")
                .insert(key, Announced { record, task });
            if let Some(previous) = previous {
                previous.task.abort();
            }
            debug!(
                service = %service.name,
                version = %service.version,
                node = %node.id,
                "registered node"
            );
        }
        Ok(())
    }

    /// Stop announcing the nodes of `service` and multicast goodbyes so
    /// peers evict them promptly. Unknown nodes are a no-op, not an error.
    pub async fn deregister(&self, service: &Service) -> Result<()> {
        self.ensure_open()?;
        for node in &service.nodes {
            let key = NodeKey::new(&service.name, &service.version, &node.id);
            let removed = self
                .announced
                .lock()
                .expect("registry lock poisoned")
                .remove(&key);
            let Some(entry) = removed else {
                debug!(service = %service.name, node = %node.id, "deregister of unknown node ignored");
                continue;
            };
            entry.task.abort();
            self.transport.goodbye(&as_goodbye(entry.record)).await?;
            debug!(service = %service.name, node = %node.id, "deregistered node");
        }
        Ok(())
    }

    /// Find all registered entries for a service name.
    ///
    /// Responses are collected until the configured timeout elapses or the
    /// segment has no responders left, then grouped by (name, version) with
    /// nodes merged by id. Nothing answering yields an empty vec, not an
    /// error. Dropping the returned future cancels the collection.
    pub async fn lookup_service(&self, name: &str) -> Result<Vec<Service>> {
        self.collect(name, self.config.timeout).await
    }

    /// Enumerate every service on the segment.
    ///
    /// Same collection semantics as [`lookup_service`](Self::lookup_service)
    /// under the shorter list timeout; duplicate names are merged across
    /// responses.
    pub async fn list_services(&self) -> Result<Vec<Service>> {
        self.collect(SERVICE_ENUMERATION, self.config.list_timeout).await
    }

    /// Attach a watcher to the live stream of membership changes.
    ///
    /// The subscription is in place before this returns; records announced
    /// afterwards are never missed.
    pub fn watch(&self) -> Result<Watcher> {
        self.ensure_open()?;
        Ok(watcher::spawn(
            self.transport.subscribe(),
            self.shutdown.subscribe(),
            None,
        ))
    }

    /// Attach a watcher filtered to a single service name.
    pub fn watch_service(&self, name: &str) -> Result<Watcher> {
        self.ensure_open()?;
        Ok(watcher::spawn(
            self.transport.subscribe(),
            self.shutdown.subscribe(),
            Some(name.to_string()),
        ))
    }

    /// Deregister everything, stop all background tasks, and cancel
    /// in-flight lookup/list calls with [`Error::Cancelled`]. Watchers fed
    /// by this registry drain and close. Idempotent; later operations on
    /// the registry fail with [`Error::Cancelled`].
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let drained: Vec<Announced> = {
            let mut announced = self.announced.lock().expect("registry lock poisoned");
            announced.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.task.abort();
            let record = as_goodbye(entry.record);
            if let Err(e) = self.transport.goodbye(&record).await {
                warn!(instance = %record.instance, error = %e, "goodbye failed during shutdown");
            }
        }

        // goodbyes are on the wire before watchers and in-flight calls are
        // told to wind down, so deletes still classify
        let _ = self.shutdown.send(());
        info!("registry shut down");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Periodic re-announcement of one record until deregistration or
    /// registry shutdown.
    fn spawn_announcer(&self, record: ServiceRecord) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let interval = self.config.announce_interval;
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the registering call already announced once; skip the
            // immediate first tick
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = transport.announce(&record).await {
                            warn!(instance = %record.instance, error = %e, "re-announce failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    async fn collect(&self, name: &str, timeout: Duration) -> Result<Vec<Service>> {
        self.ensure_open()?;
        let mut responses = self.transport.query(name).await?;
        let mut shutdown_rx = self.shutdown.subscribe();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut grouped: HashMap<(String, String), Service> = HashMap::new();
        loop {
            tokio::select! {
                record = responses.next() => match record {
                    Some(record) => {
                        if record.is_goodbye() {
                            continue;
                        }
                        let Some(service) = record.resolve() else {
                            // unrelated or damaged traffic on this name
                            continue;
                        };
                        merge(&mut grouped, service);
                    }
                    // no responder left; waiting longer cannot add results
                    None => break,
                },
                _ = &mut deadline => break,
                _ = shutdown_rx.recv() => return Err(Error::Cancelled),
            }
        }

        let mut services: Vec<Service> = grouped.into_values().collect();
        services.sort_by(|a, b| {
            (a.name.as_str(), a.version.as_str()).cmp(&(b.name.as_str(), b.version.as_str()))
        });
        Ok(services)
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // no goodbyes from drop (nothing to await on); shutdown() is the
        // graceful path
        if let Ok(mut announced) = self.announced.lock() {
            for (_, entry) in announced.drain() {
                entry.task.abort();
            }
        }
    }
}

fn as_goodbye(mut record: ServiceRecord) -> ServiceRecord {
    record.ttl = 0;
    record
}

/// Fold one single-node response into the (name, version) groups.
fn merge(grouped: &mut HashMap<(String, String), Service>, incoming: Service) {
    let entry = grouped
        .entry((incoming.name.clone(), incoming.version.clone()))
        .or_insert_with(|| Service {
            name: incoming.name.clone(),
            version: incoming.version.clone(),
            nodes: Vec::new(),
        });
    for node in incoming.nodes {
        match entry.nodes.iter_mut().find(|n| n.id == node.id) {
            // duplicate answers for one node refresh it, never duplicate it
            Some(existing) => *existing = node,
            None => entry.nodes.push(node),
        }
    }
}

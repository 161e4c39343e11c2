//! The multicast segment seam.
//!
//! The registry never touches raw sockets: it shapes [`ServiceRecord`]s and
//! timing policy on top of a [`Transport`] that puts records on the local
//! segment and yields the records observed there. [`memory`] provides an
//! in-process segment for tests and single-process wiring; packet-level
//! mDNS lives behind the same trait.

pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::Result;
use crate::record::ServiceRecord;

/// Query name that enumerates every instance on the segment regardless of
/// service (the DNS-SD service-enumeration name).
pub const SERVICE_ENUMERATION: &str = "_services";

/// Stream of records observed on the segment.
pub type RecordStream = Pin<Box<dyn Stream<Item = ServiceRecord> + Send>>;

/// A multicast segment capability.
///
/// Implementations multiplex inbound and outbound records by query name and
/// may be shared by any number of registries and watchers concurrently.
/// Group membership follows the last live handle.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Multicast an announce record.
    async fn announce(&self, record: &ServiceRecord) -> Result<()>;

    /// Multicast a goodbye (TTL zero) record.
    async fn goodbye(&self, record: &ServiceRecord) -> Result<()>;

    /// Issue a query for a service name, yielding responses as they arrive
    /// until the stream is dropped or responders are exhausted.
    ///
    /// [`SERVICE_ENUMERATION`] queries all instances on the segment.
    async fn query(&self, name: &str) -> Result<RecordStream>;

    /// Attach a listener to every record observed on the segment, announce
    /// and goodbye alike. The listener is attached before this returns, so
    /// no record sent afterwards is missed.
    fn subscribe(&self) -> RecordStream;
}

//! In-process multicast segment.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use super::{RecordStream, Transport, SERVICE_ENUMERATION};
use crate::error::Result;
use crate::record::ServiceRecord;

/// An in-process network segment.
///
/// Live announces are kept in a shared map so queries are answered from the
/// segment itself, the way an mDNS responder answers from its zone. Every
/// observed record, announce and goodbye alike, is fanned out to
/// subscribers. Clones share the segment; it is released when the last
/// clone drops.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

struct Inner {
    /// Live records keyed by (service, instance).
    records: RwLock<HashMap<(String, String), ServiceRecord>>,
    /// Fan-out of every observed record.
    observed: broadcast::Sender<ServiceRecord>,
}

impl MemoryTransport {
    /// Create a fresh, empty segment.
    pub fn new() -> Self {
        let (observed, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                records: RwLock::new(HashMap::new()),
                observed,
            }),
        }
    }

    /// Number of live records on the segment.
    pub async fn live_records(&self) -> usize {
        self.inner.records.read().await.len()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn announce(&self, record: &ServiceRecord) -> Result<()> {
        let key = (record.service.clone(), record.instance.clone());
        self.inner.records.write().await.insert(key, record.clone());
        let _ = self.inner.observed.send(record.clone());
        Ok(())
    }

    async fn goodbye(&self, record: &ServiceRecord) -> Result<()> {
        let key = (record.service.clone(), record.instance.clone());
        self.inner.records.write().await.remove(&key);
        let _ = self.inner.observed.send(record.clone());
        Ok(())
    }

    async fn query(&self, name: &str) -> Result<RecordStream> {
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        Ok(Box::pin(async_stream::stream! {
            let matching: Vec<ServiceRecord> = {
                let records = inner.records.read().await;
                records
                    .values()
                    .filter(|r| name == SERVICE_ENUMERATION || r.service == name)
                    .cloned()
                    .collect()
            };
            trace!(name = %name, responses = matching.len(), "answering query");
            for record in matching {
                yield record;
            }
        }))
    }

    fn subscribe(&self) -> RecordStream {
        // lagged subscribers skip dropped records rather than erroring
        BroadcastStream::new(self.inner.observed.subscribe())
            .filter_map(|msg| async move { msg.ok() })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::record::Node;

    fn record(service: &str, id: &str, address: &str) -> ServiceRecord {
        let node = Node {
            id: id.to_string(),
            address: address.to_string(),
            metadata: Default::default(),
        };
        ServiceRecord::announce(service, "1.0.0", &node).unwrap()
    }

    #[tokio::test]
    async fn announce_makes_record_queryable() {
        let segment = MemoryTransport::new();
        segment.announce(&record("svc", "a", "10.0.0.1:80")).await.unwrap();

        let found: Vec<_> = segment.query("svc").await.unwrap().collect().await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].instance, "a.svc");

        let none: Vec<_> = segment.query("other").await.unwrap().collect().await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn goodbye_removes_record() {
        let segment = MemoryTransport::new();
        let rec = record("svc", "a", "10.0.0.1:80");
        segment.announce(&rec).await.unwrap();
        assert_eq!(segment.live_records().await, 1);

        let mut bye = rec;
        bye.ttl = 0;
        segment.goodbye(&bye).await.unwrap();
        assert_eq!(segment.live_records().await, 0);
    }

    #[tokio::test]
    async fn enumeration_query_sees_every_service() {
        let segment = MemoryTransport::new();
        segment.announce(&record("svc-a", "a", "10.0.0.1:80")).await.unwrap();
        segment.announce(&record("svc-b", "b", "10.0.0.2:80")).await.unwrap();

        let found: Vec<_> = segment
            .query(SERVICE_ENUMERATION)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn subscribers_observe_announces_and_goodbyes() {
        let segment = MemoryTransport::new();
        let mut observed = segment.subscribe();

        let rec = record("svc", "a", "10.0.0.1:80");
        segment.announce(&rec).await.unwrap();
        let mut bye = rec;
        bye.ttl = 0;
        segment.goodbye(&bye).await.unwrap();

        let first = timeout(Duration::from_secs(1), observed.next())
            .await
            .unwrap()
            .unwrap();
        assert!(!first.is_goodbye());

        let second = timeout(Duration::from_secs(1), observed.next())
            .await
            .unwrap()
            .unwrap();
        assert!(second.is_goodbye());
    }
}

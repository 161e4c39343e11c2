//! Live membership watching.
//!
//! A [`Watcher`] turns the segment's raw announce/goodbye traffic into
//! typed create/update/delete transitions, pulled one at a time with
//! [`Watcher::next`].

use std::collections::HashMap;

use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::record::{NodeKey, Service};
use crate::transport::RecordStream;

/// The kind of membership transition a watcher observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    /// A previously-unseen node appeared.
    Create,
    /// A known node re-announced with different content.
    Update,
    /// A node said goodbye.
    Delete,
}

/// One observed membership transition for one service node.
#[derive(Debug, Clone)]
pub struct WatchResult {
    /// What happened.
    pub action: WatchAction,
    /// The service the transition applies to, carrying the affected node.
    pub service: Service,
}

/// A live subscription to membership changes on the segment.
///
/// Events for the same node identity arrive in the order the underlying
/// records were observed; no order is guaranteed across identities.
pub struct Watcher {
    events: mpsc::UnboundedReceiver<WatchResult>,
    task: JoinHandle<()>,
    stopped: bool,
}

impl Watcher {
    /// Wait for the next membership change.
    ///
    /// Fails with [`Error::WatcherClosed`] once the watcher is stopped or
    /// its feed has ended.
    pub async fn next(&mut self) -> Result<WatchResult> {
        if self.stopped {
            return Err(Error::WatcherClosed);
        }
        self.events.recv().await.ok_or(Error::WatcherClosed)
    }

    /// Detach from the segment. Idempotent; a pending [`next`](Self::next)
    /// and every later call fail with [`Error::WatcherClosed`].
    pub fn stop(&mut self) {
        self.stopped = true;
        self.task.abort();
        self.events.close();
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Attach a classification task to an already-subscribed record stream.
pub(crate) fn spawn(
    records: RecordStream,
    shutdown: broadcast::Receiver<()>,
    filter: Option<String>,
) -> Watcher {
    let (tx, events) = mpsc::unbounded_channel();
    let task = tokio::spawn(classify(records, shutdown, filter, tx));
    Watcher {
        events,
        task,
        stopped: false,
    }
}

async fn classify(
    mut records: RecordStream,
    mut shutdown: broadcast::Receiver<()>,
    filter: Option<String>,
    events: mpsc::UnboundedSender<WatchResult>,
) {
    // node identity -> content hash of the last announce; classifies
    // create vs update and coalesces periodic self-announces. Lives only
    // as long as this watch session.
    let mut seen: HashMap<NodeKey, u64> = HashMap::new();

    loop {
        // biased: drain records already observed before honoring shutdown,
        // so goodbyes sent during a graceful stop still classify
        let record = tokio::select! {
            biased;
            record = records.next() => match record {
                Some(record) => record,
                None => break,
            },
            _ = shutdown.recv() => break,
        };

        if let Some(ref name) = filter {
            if record.service != *name {
                continue;
            }
        }
        let Some(service) = record.resolve() else {
            trace!(instance = %record.instance, "dropping unresolvable record");
            continue;
        };
        let node = &service.nodes[0];
        let key = NodeKey::new(&service.name, &service.version, &node.id);

        let action = if record.is_goodbye() {
            if seen.remove(&key).is_none() {
                // repeated or unmatched goodbye; nothing left to delete
                continue;
            }
            WatchAction::Delete
        } else {
            let hash = node.content_hash(&service.version);
            match seen.insert(key, hash) {
                None => WatchAction::Create,
                Some(previous) if previous != hash => WatchAction::Update,
                Some(_) => continue,
            }
        };

        debug!(service = %service.name, node = %node.id, ?action, "membership change");
        if events.send(WatchResult { action, service }).is_err() {
            break;
        }
    }
}

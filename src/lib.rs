//! Zero-configuration service registry over multicast DNS.
//!
//! Services announce themselves on the local segment and are discovered by
//! peers without a central directory. A [`Registry`] owns the set of
//! locally-announced nodes and answers lookup/list queries against the
//! segment; a [`Watcher`] streams live membership changes. The segment
//! itself is an injected [`Transport`] capability: this crate shapes
//! records and timing policy, never raw sockets.
//!
//! ```no_run
//! use mdns_registry::{MemoryTransport, Node, Registry, Service};
//!
//! # async fn run() -> mdns_registry::Result<()> {
//! let registry = Registry::new(MemoryTransport::new());
//! registry
//!     .register(&Service {
//!         name: "greeter".into(),
//!         version: "1.0.0".into(),
//!         nodes: vec![Node {
//!             id: "greeter-1".into(),
//!             address: "10.0.0.1:8080".into(),
//!             metadata: Default::default(),
//!         }],
//!     })
//!     .await?;
//!
//! let found = registry.lookup_service("greeter").await?;
//! assert_eq!(found.len(), 1);
//! registry.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod record;
pub mod registry;
pub mod transport;
pub mod txt;
pub mod watcher;

// Re-export key types
pub use error::{Error, Result};
pub use record::{Node, Service, ServiceRecord, DEFAULT_TTL};
pub use registry::{Registry, RegistryConfig};
pub use transport::memory::MemoryTransport;
pub use transport::{RecordStream, Transport, SERVICE_ENUMERATION};
pub use txt::TxtPayload;
pub use watcher::{WatchAction, WatchResult, Watcher};

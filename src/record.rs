//! Service data model and its mDNS record translation.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};
use crate::txt::{self, TxtPayload};

/// Time-to-live advertised on announce records, in seconds.
pub const DEFAULT_TTL: u32 = 120;

/// A discoverable service: one name/version pair and its registered nodes.
///
/// Several versions of the same name may coexist on a segment; they are
/// distinct entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Service {
    /// Service name, e.g. `greeter`.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Registered instances. Never empty in lookup/list results.
    pub nodes: Vec<Node>,
}

/// One instance of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Instance identifier, unique within a service name + version.
    pub id: String,
    /// Reachable endpoint as `host:port`.
    pub address: String,
    /// Arbitrary small key-value data (tags and the like).
    pub metadata: HashMap<String, String>,
}

impl Node {
    /// Hash over the node's announced content, used to tell a periodic
    /// refresh from a real change.
    pub(crate) fn content_hash(&self, version: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        version.hash(&mut hasher);
        self.address.hash(&mut hasher);
        let mut entries: Vec<(&String, &String)> = self.metadata.iter().collect();
        entries.sort();
        entries.hash(&mut hasher);
        hasher.finish()
    }
}

/// Identity of one announced node: service name, version, node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct NodeKey {
    service: String,
    version: String,
    id: String,
}

impl NodeKey {
    pub(crate) fn new(service: &str, version: &str, id: &str) -> Self {
        Self {
            service: service.to_string(),
            version: version.to_string(),
            id: id.to_string(),
        }
    }
}

/// The wire-level shadow of one announced instance: the fields that cross
/// the segment as DNS-SD pointer, service, and text records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Service name the instance belongs to.
    pub service: String,
    /// Instance name, `<node-id>.<service>`.
    pub instance: String,
    /// Target host.
    pub host: String,
    /// Target port.
    pub port: u16,
    /// Chunked TXT payload carrying version and metadata.
    pub txt: Vec<String>,
    /// Advertised time-to-live in seconds; zero announces departure.
    pub ttl: u32,
}

impl ServiceRecord {
    /// Build an announce record for one node of a service.
    pub fn announce(service: &str, version: &str, node: &Node) -> Result<Self> {
        Self::build(service, version, node, DEFAULT_TTL)
    }

    /// Build a goodbye record (TTL zero) for one node of a service.
    pub fn goodbye(service: &str, version: &str, node: &Node) -> Result<Self> {
        Self::build(service, version, node, 0)
    }

    fn build(service: &str, version: &str, node: &Node, ttl: u32) -> Result<Self> {
        let (host, port) = split_address(&node.address)?;
        let txt = txt::encode(&TxtPayload {
            version: version.to_string(),
            metadata: node.metadata.clone(),
        })?;
        Ok(Self {
            service: service.to_string(),
            instance: format!("{}.{}", node.id, service),
            host,
            port,
            txt,
            ttl,
        })
    }

    /// Whether this record announces departure.
    pub fn is_goodbye(&self) -> bool {
        self.ttl == 0
    }

    /// Reconstruct the single-node service this record describes.
    ///
    /// Returns `None` for records whose instance name does not belong to
    /// their named service or that are otherwise malformed. The segment may
    /// carry unrelated noise, so callers drop these silently.
    pub fn resolve(&self) -> Option<Service> {
        let id = self
            .instance
            .strip_suffix(&format!(".{}", self.service))?
            .to_string();
        if id.is_empty() || self.host.is_empty() {
            return None;
        }
        let payload = txt::decode(&self.txt);
        Some(Service {
            name: self.service.clone(),
            version: payload.version,
            nodes: vec![Node {
                id,
                address: format!("{}:{}", self.host, self.port),
                metadata: payload.metadata,
            }],
        })
    }
}

fn split_address(address: &str) -> Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::encoding(format!("node address `{address}` is not host:port")))?;
    if host.is_empty() {
        return Err(Error::encoding(format!(
            "node address `{address}` has an empty host"
        )));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::encoding(format!("node address `{address}` has an invalid port")))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, address: &str) -> Node {
        Node {
            id: id.to_string(),
            address: address.to_string(),
            metadata: [("foo".to_string(), "bar".to_string())].into(),
        }
    }

    #[test]
    fn announce_round_trips_through_resolve() {
        let node = node("greeter-1", "10.0.0.1:10001");
        let record = ServiceRecord::announce("greeter", "1.0.1", &node).unwrap();
        assert_eq!(record.instance, "greeter-1.greeter");
        assert_eq!(record.host, "10.0.0.1");
        assert_eq!(record.port, 10001);
        assert_eq!(record.ttl, DEFAULT_TTL);

        let service = record.resolve().unwrap();
        assert_eq!(service.name, "greeter");
        assert_eq!(service.version, "1.0.1");
        assert_eq!(service.nodes, vec![node]);
    }

    #[test]
    fn dotted_node_ids_survive() {
        let node = node("host.rack-3", "192.168.1.7:9000");
        let record = ServiceRecord::announce("db", "2.0.0", &node).unwrap();
        let service = record.resolve().unwrap();
        assert_eq!(service.nodes[0].id, "host.rack-3");
    }

    #[test]
    fn goodbye_has_zero_ttl() {
        let record = ServiceRecord::goodbye("greeter", "1.0.1", &node("a", "10.0.0.1:1")).unwrap();
        assert!(record.is_goodbye());
        assert!(record.resolve().is_some());
    }

    #[test]
    fn foreign_instance_does_not_resolve() {
        let mut record =
            ServiceRecord::announce("greeter", "1.0.1", &node("a", "10.0.0.1:1")).unwrap();
        record.instance = "printer-4.ipp".to_string();
        assert!(record.resolve().is_none());
    }

    #[test]
    fn missing_host_does_not_resolve() {
        let mut record =
            ServiceRecord::announce("greeter", "1.0.1", &node("a", "10.0.0.1:1")).unwrap();
        record.host.clear();
        assert!(record.resolve().is_none());
    }

    #[test]
    fn bad_addresses_are_encoding_errors() {
        for address in ["10.0.0.1", "10.0.0.1:notaport", ":8080"] {
            let result = ServiceRecord::announce("svc", "1.0.0", &node("a", address));
            assert!(matches!(result, Err(Error::Encoding(_))), "{address}");
        }
    }

    #[test]
    fn ipv6_addresses_split_on_last_colon() {
        let node = node("v6-1", "[::1]:4433");
        let record = ServiceRecord::announce("svc", "1.0.0", &node).unwrap();
        assert_eq!(record.host, "[::1]");
        assert_eq!(record.port, 4433);
        assert_eq!(record.resolve().unwrap().nodes[0].address, "[::1]:4433");
    }
}

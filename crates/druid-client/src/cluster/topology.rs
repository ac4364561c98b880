//! The set of services that make up a cluster.
//!
//! The topology is rebuilt from `sys.servers`. One physical node can appear
//! in several rows (one per role); rows are joined on the node's address.
//! Endpoints that survive a refresh keep their cached transport so that a
//! refresh does not reconnect to every node.
//!
//! A `Cluster` is not safe for concurrent mutation: `refresh` and the role
//! accessors take `&mut self`, and callers sharing one across tasks must
//! serialize access themselves.

use super::mapper::{port_from_sys, ServiceMapper};
use super::services::{Broker, Coordinator, Overlord, Service};
use crate::consts;
use crate::error::{ClientError, Result};
use crate::request::SqlRequest;
use crate::result::memoize;
use crate::transport::{Transport, TransportFactory};
use serde_json::Value;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, OnceLock};

/// `host:port`, or `None` when the port is not offered.
fn service_key(host: &str, port: Option<u16>) -> Option<String> {
    port.map(|p| format!("{host}:{p}"))
}

/// Join key for a node: its plain-text and TLS addresses.
fn index_key(http_key: Option<&str>, tls_key: Option<&str>) -> String {
    match (http_key, tls_key) {
        (Some(http), Some(tls)) => format!("{http}/{tls}"),
        (Some(key), None) | (None, Some(key)) => key.to_string(),
        (None, None) => String::new(),
    }
}

/// One service node, as of the last refresh.
#[derive(Debug)]
pub struct ServiceEndpoint {
    index_key: String,
    host: String,
    plaintext_port: Option<u16>,
    tls_port: Option<u16>,
    /// role -> is leader
    roles: BTreeMap<String, bool>,
    url: Option<String>,
    instance_id: u64,
    client: OnceLock<Arc<dyn Transport>>,
}

impl ServiceEndpoint {
    pub fn index_key(&self) -> &str {
        &self.index_key
    }

    /// Host as reported by the cluster (before mapping).
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn plaintext_port(&self) -> Option<u16> {
        self.plaintext_port
    }

    pub fn tls_port(&self) -> Option<u16> {
        self.tls_port
    }

    /// URL the client dials, `None` when the address could not be mapped.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Roles this node offers.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn is_a(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    pub fn is_lead(&self, role: &str) -> bool {
        self.roles.get(role).copied().unwrap_or(false)
    }

    /// Distinguishes endpoint objects: a replaced endpoint gets a new id
    /// even when its index key is unchanged.
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// True when a transport has been opened to this node.
    pub fn is_connected(&self) -> bool {
        self.client.get().is_some()
    }

    fn offers_all(&self, roles: &BTreeMap<String, bool>) -> bool {
        roles.keys().all(|role| self.roles.contains_key(role))
    }

    /// The cached transport for this node, created on first use.
    pub fn client(&self, factory: &dyn TransportFactory) -> Result<Arc<dyn Transport>> {
        let url = self.url.as_deref().ok_or_else(|| {
            ClientError::Config(format!("No usable address for service {}", self.index_key))
        })?;
        memoize(&self.client, || factory.connect(url)).map(Arc::clone)
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            tracing::debug!(service = %self.index_key, "Closed service client");
        }
    }
}

/// One row of `sys.servers`, reduced to what the topology needs.
#[derive(Debug)]
struct ServerRecord {
    host: String,
    plaintext_port: Option<u16>,
    tls_port: Option<u16>,
    roles: BTreeMap<String, bool>,
}

impl ServerRecord {
    fn from_row(row: &Value) -> Result<Self> {
        let host = row
            .get("host")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::InvalidResponse(format!("server row has no host: {row}")))?;
        let role = row
            .get("server_type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ClientError::InvalidResponse(format!("server row has no server_type: {row}"))
            })?;
        let port = |name: &str| row.get(name).and_then(Value::as_i64).and_then(port_from_sys);
        let is_leader = match row.get("is_leader") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        };
        Ok(Self {
            host: host.to_string(),
            plaintext_port: port("plaintext_port"),
            tls_port: port("tls_port"),
            roles: BTreeMap::from([(role.to_string(), is_leader)]),
        })
    }

    fn index_key(&self) -> String {
        index_key(
            service_key(&self.host, self.plaintext_port).as_deref(),
            service_key(&self.host, self.tls_port).as_deref(),
        )
    }
}

/// Known services of a Druid cluster, keyed by node address.
#[derive(Debug)]
pub struct Cluster {
    factory: Arc<dyn TransportFactory>,
    mapper: Arc<dyn ServiceMapper>,
    prefer_tls: bool,
    services: HashMap<String, ServiceEndpoint>,
    servers: Vec<Value>,
    lead_coordinator: Option<String>,
    lead_overlord: Option<String>,
    broker: Option<String>,
    next_instance: u64,
}

impl Cluster {
    /// Create an empty topology. Call [`refresh`](Self::refresh) to populate it.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        mapper: Arc<dyn ServiceMapper>,
        prefer_tls: bool,
    ) -> Self {
        Self {
            factory,
            mapper,
            prefer_tls,
            services: HashMap::new(),
            servers: Vec::new(),
            lead_coordinator: None,
            lead_overlord: None,
            broker: None,
            next_instance: 0,
        }
    }

    /// Re-read `sys.servers` through `router` and update the topology.
    ///
    /// Call this when nodes are added or removed, or when leadership moves.
    pub async fn refresh(&mut self, router: &dyn Transport) -> Result<()> {
        let payload = SqlRequest::new(consts::SERVERS_QUERY).to_payload();
        let rows = router
            .post_json(consts::REQ_SQL, &payload, &[])
            .await?
            .into_json()?;
        let Value::Array(rows) = rows else {
            return Err(ClientError::InvalidResponse(format!(
                "expected an array of servers, got {rows}"
            )));
        };
        self.apply_snapshot(rows)
    }

    /// Update the topology from a `sys.servers` snapshot.
    ///
    /// A node whose existing endpoint already offers every role in the
    /// snapshot keeps that endpoint and its transport; its role and leader
    /// flags are updated in place. Any other node gets a new endpoint and
    /// the old one is closed. Cached leader and broker choices are dropped
    /// when their endpoint is replaced, removed, or no longer holds the role.
    pub fn apply_snapshot(&mut self, rows: Vec<Value>) -> Result<()> {
        let mut grouped: BTreeMap<String, ServerRecord> = BTreeMap::new();
        for row in &rows {
            let record = ServerRecord::from_row(row)?;
            match grouped.entry(record.index_key()) {
                Entry::Occupied(mut entry) => entry.get_mut().roles.extend(record.roles),
                Entry::Vacant(entry) => {
                    entry.insert(record);
                }
            }
        }

        let mut previous = std::mem::take(&mut self.services);
        let mut discarded = HashSet::new();
        for (key, record) in grouped {
            let endpoint = match previous.remove(&key) {
                Some(mut existing) if existing.offers_all(&record.roles) => {
                    existing.roles = record.roles;
                    existing
                }
                Some(mut stale) => {
                    stale.close();
                    tracing::info!(service = %key, "Replacing service endpoint");
                    discarded.insert(key.clone());
                    self.new_endpoint(key.clone(), record)
                }
                None => {
                    tracing::info!(service = %key, "Adding service endpoint");
                    self.new_endpoint(key.clone(), record)
                }
            };
            self.services.insert(key, endpoint);
        }
        for (key, mut stale) in previous {
            stale.close();
            tracing::info!(service = %key, "Removing service endpoint");
            discarded.insert(key);
        }

        self.invalidate_cached(&discarded);
        self.servers = rows;
        Ok(())
    }

    fn new_endpoint(&mut self, index_key: String, record: ServerRecord) -> ServiceEndpoint {
        let url = match self.mapper.url_for(
            &record.host,
            record.plaintext_port,
            record.tls_port,
            self.prefer_tls,
        ) {
            Ok(addr) => Some(addr.url()),
            Err(e) => {
                tracing::warn!(service = %index_key, error = %e, "Cannot map service address");
                None
            }
        };
        self.next_instance += 1;
        ServiceEndpoint {
            index_key,
            host: record.host,
            plaintext_port: record.plaintext_port,
            tls_port: record.tls_port,
            roles: record.roles,
            url,
            instance_id: self.next_instance,
            client: OnceLock::new(),
        }
    }

    fn invalidate_cached(&mut self, discarded: &HashSet<String>) {
        let services = &self.services;
        let still_valid = |key: &String, role: &str, need_lead: bool| {
            !discarded.contains(key)
                && services.get(key).is_some_and(|ep| {
                    if need_lead {
                        ep.is_lead(role)
                    } else {
                        ep.is_a(role)
                    }
                })
        };
        if let Some(key) = &self.lead_coordinator {
            if !still_valid(key, consts::COORDINATOR, true) {
                self.lead_coordinator = None;
            }
        }
        if let Some(key) = &self.lead_overlord {
            if !still_valid(key, consts::OVERLORD, true) {
                self.lead_overlord = None;
            }
        }
        if let Some(key) = &self.broker {
            if !still_valid(key, consts::BROKER, false) {
                self.broker = None;
            }
        }
    }

    /// Rows of the last `sys.servers` snapshot.
    pub fn servers(&self) -> &[Value] {
        &self.servers
    }

    /// All known endpoints, in no particular order.
    pub fn endpoints(&self) -> impl Iterator<Item = &ServiceEndpoint> {
        self.services.values()
    }

    /// Endpoint by index key.
    pub fn endpoint(&self, index_key: &str) -> Option<&ServiceEndpoint> {
        self.services.get(index_key)
    }

    /// The endpoint flagged as leader for `role`.
    pub fn leader_for(&self, role: &str) -> Result<&ServiceEndpoint> {
        self.services
            .values()
            .find(|ep| ep.is_lead(role))
            .ok_or_else(|| ClientError::Unavailable(format!("No lead {role} is available.")))
    }

    /// Endpoints offering `role`, in no particular order.
    pub fn endpoints_for(&self, role: &str) -> Vec<&ServiceEndpoint> {
        self.services.values().filter(|ep| ep.is_a(role)).collect()
    }

    /// Transport for the endpoint with the given index key.
    pub fn transport_for(&self, index_key: &str) -> Result<Arc<dyn Transport>> {
        let endpoint = self.services.get(index_key).ok_or_else(|| {
            ClientError::Unavailable(format!("Service {index_key} is no longer in the cluster"))
        })?;
        endpoint.client(self.factory.as_ref())
    }

    /// Resolve the index key for `role`, caching the choice in `slot`.
    fn cached_key(
        slot: &mut Option<String>,
        services: &HashMap<String, ServiceEndpoint>,
        pick: impl FnOnce(&HashMap<String, ServiceEndpoint>) -> Result<String>,
    ) -> Result<String> {
        if let Some(key) = slot {
            return Ok(key.clone());
        }
        let key = pick(services)?;
        *slot = Some(key.clone());
        Ok(key)
    }

    /// Client for the lead Coordinator.
    pub fn coordinator(&mut self) -> Result<Coordinator> {
        let key = Self::cached_key(&mut self.lead_coordinator, &self.services, |services| {
            lead_key(services, consts::COORDINATOR)
        })?;
        Ok(Coordinator::new(self.transport_for(&key)?))
    }

    /// Client for the lead Overlord.
    pub fn overlord(&mut self) -> Result<Overlord> {
        let key = Self::cached_key(&mut self.lead_overlord, &self.services, |services| {
            lead_key(services, consts::OVERLORD)
        })?;
        Ok(Overlord::new(self.transport_for(&key)?))
    }

    /// Client for a Broker. The first one found is chosen and remembered.
    pub fn broker(&mut self) -> Result<Broker> {
        let key = Self::cached_key(&mut self.broker, &self.services, |services| {
            services
                .values()
                .find(|ep| ep.is_a(consts::BROKER))
                .map(|ep| ep.index_key.clone())
                .ok_or_else(|| ClientError::Unavailable("No Broker is available.".to_string()))
        })?;
        Ok(Broker::new(self.transport_for(&key)?))
    }

    /// Generic clients for every endpoint offering `role`.
    pub fn clients_for_role(&self, role: &str) -> Result<Vec<Service>> {
        self.endpoints_for(role)
            .into_iter()
            .map(|ep| ep.client(self.factory.as_ref()).map(Service::new))
            .collect()
    }
}

fn lead_key(services: &HashMap<String, ServiceEndpoint>, role: &str) -> Result<String> {
    services
        .values()
        .find(|ep| ep.is_lead(role))
        .map(|ep| ep.index_key.clone())
        .ok_or_else(|| ClientError::Unavailable(format!("No lead {role} is available.")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mapper::IdentityMapper;
    use crate::transport::HttpResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct NullTransport(String);

    #[async_trait]
    impl Transport for NullTransport {
        fn base_url(&self) -> &str {
            &self.0
        }

        async fn get(&self, _path: &str, _query: &[(&str, String)]) -> Result<HttpResponse> {
            Ok(HttpResponse::new(200, HashMap::new(), "{}"))
        }

        async fn post_json(
            &self,
            _path: &str,
            _body: &Value,
            _headers: &[(String, String)],
        ) -> Result<HttpResponse> {
            Ok(HttpResponse::new(200, HashMap::new(), "{}"))
        }

        async fn delete(&self, _path: &str) -> Result<HttpResponse> {
            Ok(HttpResponse::new(200, HashMap::new(), "{}"))
        }
    }

    #[derive(Debug, Default)]
    struct CountingFactory {
        connects: AtomicUsize,
    }

    impl TransportFactory for CountingFactory {
        fn connect(&self, base_url: &str) -> Result<Arc<dyn Transport>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullTransport(base_url.to_string())))
        }
    }

    fn cluster() -> (Cluster, Arc<CountingFactory>) {
        let factory = Arc::new(CountingFactory::default());
        let cluster = Cluster::new(factory.clone(), Arc::new(IdentityMapper), false);
        (cluster, factory)
    }

    fn row(host: &str, port: i64, tls: i64, role: &str, leader: Value) -> Value {
        json!({
            "server": format!("{host}:{port}"),
            "host": host,
            "plaintext_port": port,
            "tls_port": tls,
            "server_type": role,
            "tier": null,
            "curr_size": 0,
            "max_size": 0,
            "is_leader": leader
        })
    }

    fn basic_snapshot() -> Vec<Value> {
        vec![
            row("coord", 8081, -1, "coordinator", json!(1)),
            row("coord", 8081, -1, "overlord", json!(1)),
            row("broker", 8082, -1, "broker", Value::Null),
            row("router", 8888, -1, "router", Value::Null),
        ]
    }

    #[test]
    fn test_keys() {
        assert_eq!(service_key("h", Some(8081)).as_deref(), Some("h:8081"));
        assert_eq!(service_key("h", None), None);
        assert_eq!(index_key(Some("h:1"), Some("h:2")), "h:1/h:2");
        assert_eq!(index_key(None, Some("h:2")), "h:2");
        assert_eq!(index_key(Some("h:1"), None), "h:1");
    }

    #[test]
    fn test_multi_role_nodes_are_merged() {
        let (mut cluster, _) = cluster();
        cluster.apply_snapshot(basic_snapshot()).unwrap();

        assert_eq!(cluster.endpoints().count(), 3);
        let coord = cluster.endpoint("coord:8081").unwrap();
        assert_eq!(coord.roles().collect::<Vec<_>>(), vec!["coordinator", "overlord"]);
        assert_eq!(coord.url(), Some("http://coord:8081"));
        assert_eq!(cluster.servers().len(), 4);
    }

    #[test]
    fn test_leader_and_role_lookup() {
        let (mut cluster, _) = cluster();
        cluster.apply_snapshot(basic_snapshot()).unwrap();

        assert_eq!(cluster.leader_for("coordinator").unwrap().index_key(), "coord:8081");
        assert_eq!(cluster.endpoints_for("broker").len(), 1);
        assert!(cluster.endpoints_for("historical").is_empty());

        let err = cluster.leader_for("broker").unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("No lead broker"));
    }

    #[test]
    fn test_unchanged_node_keeps_identity_and_client() {
        let (mut cluster, factory) = cluster();
        cluster.apply_snapshot(basic_snapshot()).unwrap();
        cluster.coordinator().unwrap();
        let before = cluster.endpoint("coord:8081").unwrap().instance_id();

        cluster.apply_snapshot(basic_snapshot()).unwrap();
        let endpoint = cluster.endpoint("coord:8081").unwrap();
        assert_eq!(endpoint.instance_id(), before);
        assert!(endpoint.is_connected());

        cluster.coordinator().unwrap();
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_grown_role_set_replaces_endpoint() {
        let (mut cluster, factory) = cluster();
        cluster
            .apply_snapshot(vec![row("coord", 8081, -1, "coordinator", json!(true))])
            .unwrap();
        cluster.coordinator().unwrap();
        let before = cluster.endpoint("coord:8081").unwrap().instance_id();

        cluster
            .apply_snapshot(vec![
                row("coord", 8081, -1, "coordinator", json!(true)),
                row("coord", 8081, -1, "overlord", json!(true)),
            ])
            .unwrap();
        let endpoint = cluster.endpoint("coord:8081").unwrap();
        assert_ne!(endpoint.instance_id(), before);
        assert!(!endpoint.is_connected());
        assert!(cluster.lead_coordinator.is_none());

        cluster.coordinator().unwrap();
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shrunk_role_set_keeps_endpoint() {
        let (mut cluster, _) = cluster();
        cluster.apply_snapshot(basic_snapshot()).unwrap();
        cluster.overlord().unwrap();
        let before = cluster.endpoint("coord:8081").unwrap().instance_id();

        cluster
            .apply_snapshot(vec![row("coord", 8081, -1, "coordinator", json!(1))])
            .unwrap();
        let endpoint = cluster.endpoint("coord:8081").unwrap();
        assert_eq!(endpoint.instance_id(), before);
        assert!(!endpoint.is_a("overlord"));
        assert!(cluster.lead_overlord.is_none());
        assert!(cluster.overlord().unwrap_err().is_unavailable());
    }

    #[test]
    fn test_leadership_change_invalidates_cached_leader() {
        let (mut cluster, _) = cluster();
        let snapshot = |first_leads: bool| {
            vec![
                row("c1", 8081, -1, "coordinator", json!(first_leads)),
                row("c2", 8081, -1, "coordinator", json!(!first_leads)),
            ]
        };
        cluster.apply_snapshot(snapshot(true)).unwrap();
        assert_eq!(cluster.coordinator().unwrap().base_url(), "http://c1:8081");

        cluster.apply_snapshot(snapshot(false)).unwrap();
        assert_eq!(cluster.coordinator().unwrap().base_url(), "http://c2:8081");
    }

    #[test]
    fn test_removed_node_is_dropped() {
        let (mut cluster, _) = cluster();
        cluster.apply_snapshot(basic_snapshot()).unwrap();
        cluster.broker().unwrap();

        cluster
            .apply_snapshot(vec![row("router", 8888, -1, "router", Value::Null)])
            .unwrap();
        assert!(cluster.endpoint("broker:8082").is_none());
        assert!(cluster.broker.is_none());
        assert!(cluster.broker().unwrap_err().is_unavailable());
        assert!(cluster.transport_for("broker:8082").is_err());
    }

    #[test]
    fn test_tls_only_node() {
        let (mut cluster, _) = cluster();
        cluster
            .apply_snapshot(vec![row("secure", -1, 8282, "broker", Value::Null)])
            .unwrap();
        let endpoint = cluster.endpoint("secure:8282").unwrap();
        assert_eq!(endpoint.url(), Some("https://secure:8282"));
        assert_eq!(endpoint.plaintext_port(), None);
    }

    #[test]
    fn test_clients_for_role() {
        let (mut cluster, _) = cluster();
        cluster
            .apply_snapshot(vec![
                row("h1", 8083, -1, "historical", Value::Null),
                row("h2", 8083, -1, "historical", Value::Null),
            ])
            .unwrap();
        let mut urls: Vec<String> = cluster
            .clients_for_role("historical")
            .unwrap()
            .iter()
            .map(|s| s.base_url().to_string())
            .collect();
        urls.sort();
        assert_eq!(urls, vec!["http://h1:8083", "http://h2:8083"]);
    }

    #[test]
    fn test_bad_row() {
        let (mut cluster, _) = cluster();
        let err = cluster.apply_snapshot(vec![json!({"host": "x"})]).unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }
}

//! Integration tests for cluster discovery and service clients using wiremock.

use druid_client::{
    ClientConfig, DockerMapper, DruidClient, ExtensionProvider, ExtensionRegistry, Result,
    TaskFilter, Transport,
};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test Helpers
// ============================================================================

fn test_config(server: &MockServer) -> ClientConfig {
    ClientConfig::builder(server.uri())
        .timeout(Duration::from_secs(5))
        .max_retries(0)
        .build()
        .unwrap()
}

fn server_row(host: &str, port: u16, role: &str, is_leader: Value) -> Value {
    json!({
        "server": format!("{host}:{port}"),
        "host": host,
        "plaintext_port": port,
        "tls_port": -1,
        "server_type": role,
        "tier": null,
        "curr_size": 0,
        "max_size": 0,
        "is_leader": is_leader
    })
}

/// `sys.servers` rows placing every given role on the mock server.
fn local_rows(server: &MockServer, roles: &[(&str, Value)]) -> Vec<Value> {
    let addr = server.address();
    roles
        .iter()
        .map(|(role, leader)| server_row(&addr.ip().to_string(), addr.port(), role, leader.clone()))
        .collect()
}

async fn mount_servers(server: &MockServer, rows: Vec<Value>) {
    Mock::given(method("POST"))
        .and(path("/druid/v2/sql"))
        .and(body_string_contains("sys.servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(rows)))
        .mount(server)
        .await;
}

async fn standard_cluster(server: &MockServer) -> DruidClient {
    mount_servers(
        server,
        local_rows(
            server,
            &[
                ("router", Value::Null),
                ("coordinator", json!(true)),
                ("overlord", json!(true)),
                ("broker", Value::Null),
            ],
        ),
    )
    .await;
    DruidClient::new(test_config(server)).unwrap()
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_cluster_discovered_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/druid/v2/sql"))
        .and(body_string_contains("sys.servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            server_row("10.0.0.1", 8081, "coordinator", json!(true)),
            server_row("10.0.0.1", 8090, "overlord", json!(1)),
            server_row("10.0.0.2", 8082, "broker", Value::Null),
            server_row("10.0.0.3", 8083, "historical", Value::Null)
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = DruidClient::new(test_config(&server)).unwrap();

    let cluster = client.cluster().await.unwrap();
    assert_eq!(cluster.servers().len(), 4);
    assert_eq!(cluster.endpoints().count(), 4);
    assert_eq!(cluster.leader_for("overlord").unwrap().host(), "10.0.0.1");
    assert_eq!(cluster.endpoints_for("historical").len(), 1);

    let coordinator = client.coordinator().await.unwrap();
    assert_eq!(coordinator.base_url(), "http://10.0.0.1:8081");
    let broker = client.broker().await.unwrap();
    assert_eq!(broker.base_url(), "http://10.0.0.2:8082");
}

#[tokio::test]
async fn test_refresh_drops_departed_leader() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/druid/v2/sql"))
        .and(body_string_contains("sys.servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            server_row("10.0.0.1", 8081, "coordinator", json!(true))
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/druid/v2/sql"))
        .and(body_string_contains("sys.servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            server_row("10.0.0.1", 8081, "coordinator", json!(false)),
            server_row("10.0.0.9", 8081, "coordinator", json!(true))
        ])))
        .mount(&server)
        .await;

    let mut client = DruidClient::new(test_config(&server)).unwrap();
    assert_eq!(
        client.coordinator().await.unwrap().base_url(),
        "http://10.0.0.1:8081"
    );

    client.refresh_cluster().await.unwrap();
    assert_eq!(
        client.coordinator().await.unwrap().base_url(),
        "http://10.0.0.9:8081"
    );
}

#[tokio::test]
async fn test_failed_discovery_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/druid/v2/sql"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "not ready"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/druid/v2/sql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            server_row("10.0.0.1", 8081, "coordinator", json!(true))
        ])))
        .mount(&server)
        .await;

    let mut client = DruidClient::new(test_config(&server)).unwrap();
    let err = client.coordinator().await.unwrap_err();
    assert_eq!(err.status(), Some(500));

    assert!(client.coordinator().await.is_ok());
}

#[tokio::test]
async fn test_no_leader_is_unavailable() {
    let server = MockServer::start().await;
    mount_servers(&server, local_rows(&server, &[("coordinator", json!(false))])).await;

    let mut client = DruidClient::new(test_config(&server)).unwrap();
    let err = client.coordinator().await.unwrap_err();
    assert!(err.is_unavailable());
    assert!(err.to_string().contains("No lead coordinator"));
}

#[tokio::test]
async fn test_docker_mapper_translates_addresses() {
    let server = MockServer::start().await;
    let port = server.address().port();

    mount_servers(
        &server,
        vec![server_row("druid-coordinator", 8081, "coordinator", json!(true))],
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/druid/coordinator/v1/lookups/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["__default", "hot"])))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig::builder(server.uri())
        .service_mapper(DockerMapper::new("127.0.0.1", &[(port, 8081)]))
        .build()
        .unwrap();
    let mut client = DruidClient::new(config).unwrap();

    let coordinator = client.coordinator().await.unwrap();
    assert_eq!(coordinator.base_url(), format!("http://127.0.0.1:{port}"));
    assert_eq!(coordinator.lookup_tiers().await.unwrap(), vec!["__default", "hot"]);
}

// ============================================================================
// Coordinator
// ============================================================================

#[tokio::test]
async fn test_lookup() {
    let server = MockServer::start().await;
    let mut client = standard_cluster(&server).await;

    Mock::given(method("GET"))
        .and(path("/druid/coordinator/v1/lookups/config/__default/country"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": "v1",
            "lookupExtractorFactory": {"type": "map", "map": {"US": "United States"}}
        })))
        .mount(&server)
        .await;

    let coordinator = client.coordinator().await.unwrap();
    let lookup = coordinator.lookup("__default", "country", false).await.unwrap();
    assert_eq!(lookup["version"], "v1");
}

#[tokio::test]
async fn test_missing_lookup_names_tier_and_id() {
    let server = MockServer::start().await;
    let mut client = standard_cluster(&server).await;

    Mock::given(method("GET"))
        .and(path("/druid/coordinator/v1/lookups/config/__default/nope"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let coordinator = client.coordinator().await.unwrap();
    let err = coordinator.lookup("__default", "nope", true).await.unwrap_err();
    assert!(err.is_not_found());
    let message = err.to_string();
    assert!(message.contains("__default"));
    assert!(message.contains("nope"));
}

#[tokio::test]
async fn test_missing_tier() {
    let server = MockServer::start().await;
    let mut client = standard_cluster(&server).await;

    Mock::given(method("GET"))
        .and(path("/druid/coordinator/v1/lookups/config/cold"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let coordinator = client.coordinator().await.unwrap();
    let err = coordinator.lookups_for_tier("cold").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("cold"));
}

#[tokio::test]
async fn test_service_status_endpoints() {
    let server = MockServer::start().await;
    let mut client = standard_cluster(&server).await;

    Mock::given(method("GET"))
        .and(path("/status/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "0.23.0"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/druid/coordinator/v1/leader"))
        .respond_with(ResponseTemplate::new(200).set_body_string("http://10.0.0.1:8081"))
        .mount(&server)
        .await;

    let coordinator = client.coordinator().await.unwrap();
    assert!(coordinator.is_healthy().await);
    assert_eq!(coordinator.status().await.unwrap()["version"], "0.23.0");
    assert_eq!(coordinator.lead().await.unwrap(), "http://10.0.0.1:8081");
}

// ============================================================================
// Overlord, Broker, Router
// ============================================================================

#[tokio::test]
async fn test_overlord_tasks() {
    let server = MockServer::start().await;
    let mut client = standard_cluster(&server).await;

    Mock::given(method("GET"))
        .and(path("/druid/indexer/v1/tasks"))
        .and(query_param("state", "running"))
        .and(query_param("datasource", "wiki"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "index_wiki_1",
            "type": "index_parallel",
            "dataSource": "wiki",
            "createdTime": "2022-06-01T10:00:00.000Z",
            "statusCode": "RUNNING",
            "runnerStatusCode": "RUNNING",
            "duration": -1,
            "location": {"host": "10.0.0.4", "port": 8100, "tlsPort": -1}
        }])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/druid/indexer/v1/task/index_wiki_1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "task": "index_wiki_1",
            "status": {"id": "index_wiki_1", "statusCode": "SUCCESS", "duration": 5000}
        })))
        .mount(&server)
        .await;

    let overlord = client.overlord().await.unwrap();

    let filter = TaskFilter {
        state: Some("running".to_string()),
        datasource: Some("wiki".to_string()),
        ..TaskFilter::default()
    };
    let tasks = overlord.tasks(&filter).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].data_source.as_deref(), Some("wiki"));
    assert!(tasks[0].created_time.is_some());
    assert!(!tasks[0].is_terminal());

    let status = overlord.task_status("index_wiki_1").await.unwrap();
    assert!(status.is_terminal());
    assert_eq!(status.duration, Some(5000));
}

#[tokio::test]
async fn test_unknown_task() {
    let server = MockServer::start().await;
    let mut client = standard_cluster(&server).await;

    Mock::given(method("GET"))
        .and(path("/druid/indexer/v1/task/ghost/status"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let overlord = client.overlord().await.unwrap();
    let err = overlord.task_status("ghost").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("ghost"));
}

#[tokio::test]
async fn test_broker_readiness() {
    let server = MockServer::start().await;
    let mut client = standard_cluster(&server).await;

    Mock::given(method("GET"))
        .and(path("/druid/broker/v1/loadstatus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"inventoryInitialized": true})))
        .mount(&server)
        .await;

    let broker = client.broker().await.unwrap();
    assert!(broker.is_ready().await.unwrap());
}

#[tokio::test]
async fn test_router_brokers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/druid/router/v1/brokers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "druid/broker": ["10.0.0.2:8082"]
        })))
        .mount(&server)
        .await;

    let client = DruidClient::new(test_config(&server)).unwrap();
    let brokers = client.router().brokers().await.unwrap();
    assert_eq!(brokers["druid/broker"][0], "10.0.0.2:8082");
}

// ============================================================================
// Extensions
// ============================================================================

#[derive(Debug)]
struct PingClient {
    router: Arc<dyn Transport>,
}

impl PingClient {
    async fn ping(&self) -> Result<Value> {
        self.router.get("/ext/ping", &[]).await?.into_json()
    }
}

#[derive(Debug)]
struct PingExtension {
    created: Arc<AtomicUsize>,
}

impl ExtensionProvider for PingExtension {
    fn name(&self) -> &str {
        "ping"
    }

    fn summary(&self) -> &str {
        "Ping endpoint"
    }

    fn client_for(&self, client: &DruidClient) -> Result<Arc<dyn Any + Send + Sync>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(PingClient {
            router: client.router_transport(),
        }))
    }
}

#[tokio::test]
async fn test_extension_client() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ext/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pong": true})))
        .mount(&server)
        .await;

    let created = Arc::new(AtomicUsize::new(0));
    let registry = ExtensionRegistry::new().register(PingExtension {
        created: Arc::clone(&created),
    });
    let mut client = DruidClient::new(test_config(&server))
        .unwrap()
        .with_extensions(registry);

    assert_eq!(client.extension_names(), vec!["ping"]);

    let ping = client.extension::<PingClient>("ping").unwrap().unwrap();
    assert_eq!(ping.ping().await.unwrap()["pong"], true);

    let again = client.extension::<PingClient>("ping").unwrap().unwrap();
    assert!(Arc::ptr_eq(&ping, &again));
    assert_eq!(created.load(Ordering::SeqCst), 1);

    assert!(client.extension::<String>("ping").unwrap().is_none());
    assert!(client.extension::<PingClient>("missing").unwrap().is_none());
}

#[derive(Debug)]
struct CatalogExtension;

impl ExtensionProvider for CatalogExtension {
    fn name(&self) -> &str {
        "catalog"
    }

    fn summary(&self) -> &str {
        "Table catalog service"
    }

    fn roles(&self) -> Vec<String> {
        vec!["catalog".to_string()]
    }

    fn client_for(&self, client: &DruidClient) -> Result<Arc<dyn Any + Send + Sync>> {
        Ok(Arc::new(client.base_url().to_string()))
    }
}

#[tokio::test]
async fn test_extension_roles_are_known() {
    let server = MockServer::start().await;
    mount_servers(
        &server,
        vec![
            server_row("10.0.0.5", 8085, "catalog", Value::Null),
            server_row("10.0.0.6", 8083, "historical", Value::Null),
        ],
    )
    .await;

    let mut plain = DruidClient::new(test_config(&server)).unwrap();
    assert!(!plain.is_known_role("catalog"));
    assert!(plain.clients_for_role("catalog").await.unwrap_err().is_usage());

    let mut client = DruidClient::new(test_config(&server))
        .unwrap()
        .with_extensions(ExtensionRegistry::new().register(CatalogExtension));
    assert!(client.is_known_role("catalog"));

    let catalogs = client.clients_for_role("catalog").await.unwrap();
    assert_eq!(catalogs.len(), 1);
    assert_eq!(catalogs[0].base_url(), "http://10.0.0.5:8085");

    assert_eq!(client.clients_for_role("historical").await.unwrap().len(), 1);
    assert!(client.clients_for_role("talaria").await.unwrap().is_empty());
    assert!(client.clients_for_role("bogus").await.unwrap_err().is_usage());
}

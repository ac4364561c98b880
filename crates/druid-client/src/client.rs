//! The main Druid client.

use crate::async_query::AsyncQuery;
use crate::cluster::{Broker, Cluster, Coordinator, Overlord, Router, Service};
use crate::config::{ClientConfig, ClientConfigBuilder};
use crate::consts;
use crate::error::{ClientError, Result};
use crate::extensions::ExtensionRegistry;
use crate::plan::QueryPlan;
use crate::request::{AsyncEngine, QueryMode, SqlRequest};
use crate::result::SqlQueryResult;
use crate::transport::{HttpTransport, HttpTransportFactory, Transport, TransportFactory};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Client for a Druid cluster, bootstrapped from its Router.
///
/// SQL goes through the Router. Requests that need a specific service (the
/// lead Overlord for task queries, a worker for direct queries, the
/// Coordinator for lookups) discover the cluster on first use by querying
/// `sys.servers`; call [`refresh_cluster`](Self::refresh_cluster) when the
/// cluster changes.
///
/// Methods that consult the cluster take `&mut self`. Wrap the client in a
/// lock to share it between tasks.
#[derive(Debug)]
pub struct DruidClient {
    config: ClientConfig,
    router: Arc<dyn Transport>,
    factory: Arc<dyn TransportFactory>,
    cluster: Option<Cluster>,
    extensions: ExtensionRegistry,
    extension_clients: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl DruidClient {
    /// Create a new client builder with the given Router URL.
    pub fn builder(base_url: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(base_url)
    }

    /// Create a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let router: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);
        let factory = Arc::new(HttpTransportFactory::new(config.clone()));
        Ok(Self::with_transport(config, router, factory))
    }

    /// Create a client over caller-supplied transports.
    pub fn with_transport(
        config: ClientConfig,
        router: Arc<dyn Transport>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            config,
            router,
            factory,
            cluster: None,
            extensions: ExtensionRegistry::default(),
            extension_clients: HashMap::new(),
        }
    }

    /// Make the extensions in `registry` available through
    /// [`extension`](Self::extension).
    pub fn with_extensions(mut self, registry: ExtensionRegistry) -> Self {
        self.extensions = registry;
        self.extension_clients.clear();
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the Router URL.
    pub fn base_url(&self) -> &str {
        self.router.base_url()
    }

    /// Transport to the Router, for extensions that call their own APIs.
    pub fn router_transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.router)
    }

    /// Client for the Router's own endpoints.
    pub fn router(&self) -> Router {
        Router::new(self.router_transport())
    }

    // =========================================================================
    // SQL
    // =========================================================================

    /// Run a query synchronously.
    ///
    /// A response with an error status is not an `Err`: inspect
    /// [`SqlQueryResult::ok`] or let `rows()` report the failure. Only blank
    /// SQL and transport failures are errors here.
    pub async fn sql_query(&self, request: impl Into<SqlRequest>) -> Result<SqlQueryResult> {
        let request = request.into();
        request.validate()?;
        tracing::debug!(sql = %request.sql(), "Running SQL query");
        let response = self
            .router
            .post_json(consts::REQ_SQL, &request.to_payload(), request.http_headers())
            .await?;
        Ok(SqlQueryResult::new(request, response))
    }

    /// Run a query and return its rows, failing if Druid reported an error.
    pub async fn sql(&self, sql: &str) -> Result<Vec<Value>> {
        let result = self.sql_query(sql).await?;
        Ok(result.rows()?.to_vec())
    }

    /// Return the plan Druid would use for `sql`.
    pub async fn explain_sql(&self, sql: &str) -> Result<QueryPlan> {
        let rows = self.sql(&format!("EXPLAIN PLAN FOR {sql}")).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::InvalidResponse("EXPLAIN returned no rows".to_string()))?;
        QueryPlan::from_row(row)
    }

    // =========================================================================
    // Async SQL
    // =========================================================================

    /// Submit a query through the broker async API.
    ///
    /// Submission failures yield a failed handle rather than an error.
    pub async fn async_sql(&self, request: impl Into<SqlRequest>) -> Result<AsyncQuery> {
        AsyncQuery::submit_broker(self.router_transport(), request.into(), &self.config).await
    }

    /// Submit a multi-stage query as an indexer task, polled on the lead
    /// Overlord.
    pub async fn sql_task(&mut self, request: impl Into<SqlRequest>) -> Result<AsyncQuery> {
        let request = request.into();
        let request = if request.engine() == AsyncEngine::IndexerTask {
            request
        } else {
            request.with_async(QueryMode::Indexer)
        };
        request.validate()?;
        let overlord = self.overlord().await?;
        AsyncQuery::submit_task(
            self.router_transport(),
            Arc::clone(overlord.transport()),
            request,
            &self.config,
        )
        .await
    }

    /// Submit a multi-stage query to run directly on a worker.
    ///
    /// The cluster must have exactly one service with the configured worker
    /// role; results are not merged across workers.
    pub async fn worker_sql(&mut self, request: impl Into<SqlRequest>) -> Result<AsyncQuery> {
        let request = request.into();
        let request = if request.engine() == AsyncEngine::DirectWorker {
            request
        } else {
            request.with_async(QueryMode::Server)
        };
        request.validate()?;
        let worker = self.worker_transport().await?;
        AsyncQuery::submit_worker(self.router_transport(), worker, request, &self.config).await
    }

    /// Submit a query on the engine its request selects.
    pub async fn submit_async(&mut self, request: impl Into<SqlRequest>) -> Result<AsyncQuery> {
        let request = request.into();
        match request.engine() {
            AsyncEngine::Broker => self.async_sql(request).await,
            AsyncEngine::IndexerTask => self.sql_task(request).await,
            AsyncEngine::DirectWorker => self.worker_sql(request).await,
        }
    }

    async fn worker_transport(&mut self) -> Result<Arc<dyn Transport>> {
        let role = self.config.worker_role.clone();
        let cluster = self.cluster().await?;
        let candidates = cluster.endpoints_for(&role);
        let key = match candidates.as_slice() {
            [] => {
                return Err(ClientError::Unavailable(format!(
                    "No {role} servers available"
                )))
            }
            [only] => only.index_key().to_string(),
            _ => {
                return Err(ClientError::usage(format!(
                    "Client does not support multiple {role} servers ({} found)",
                    candidates.len()
                )))
            }
        };
        cluster.transport_for(&key)
    }

    // =========================================================================
    // Cluster
    // =========================================================================

    /// The cluster topology, discovered on first use.
    pub async fn cluster(&mut self) -> Result<&mut Cluster> {
        if self.cluster.is_none() {
            return self.refresh_cluster().await;
        }
        self.cluster
            .as_mut()
            .ok_or_else(|| ClientError::Config("cluster not initialized".to_string()))
    }

    /// Re-read the set of services from `sys.servers`.
    pub async fn refresh_cluster(&mut self) -> Result<&mut Cluster> {
        match self.cluster.as_mut() {
            Some(cluster) => cluster.refresh(self.router.as_ref()).await?,
            None => {
                let mut cluster = Cluster::new(
                    Arc::clone(&self.factory),
                    Arc::clone(&self.config.service_mapper),
                    self.config.prefer_tls,
                );
                cluster.refresh(self.router.as_ref()).await?;
                self.cluster = Some(cluster);
            }
        }
        self.cluster
            .as_mut()
            .ok_or_else(|| ClientError::Config("cluster not initialized".to_string()))
    }

    /// Client for the lead Coordinator.
    pub async fn coordinator(&mut self) -> Result<Coordinator> {
        self.cluster().await?.coordinator()
    }

    /// Client for the lead Overlord.
    pub async fn overlord(&mut self) -> Result<Overlord> {
        self.cluster().await?.overlord()
    }

    /// Client for a Broker.
    pub async fn broker(&mut self) -> Result<Broker> {
        self.cluster().await?.broker()
    }

    /// True for the built-in roles, the worker role and roles added by a
    /// registered extension.
    pub fn is_known_role(&self, role: &str) -> bool {
        consts::SERVICE_ROLES.contains(&role)
            || role == self.config.worker_role
            || self.extensions.roles().iter().any(|r| r == role)
    }

    /// Clients for every service offering `role`.
    ///
    /// Fails with a usage error for a role that neither Druid nor a
    /// registered extension defines.
    pub async fn clients_for_role(&mut self, role: &str) -> Result<Vec<Service>> {
        if !self.is_known_role(role) {
            return Err(ClientError::usage(format!("Unknown service role: {role}")));
        }
        self.cluster().await?.clients_for_role(role)
    }

    // =========================================================================
    // Extensions
    // =========================================================================

    /// Names of the registered extensions.
    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions.names()
    }

    /// The client of extension `name`, created on first call.
    ///
    /// Returns `Ok(None)` if no such extension is registered or its client
    /// is not a `T`.
    pub fn extension<T: Any + Send + Sync>(&mut self, name: &str) -> Result<Option<Arc<T>>> {
        let client = match self.extension_clients.get(name) {
            Some(client) => Arc::clone(client),
            None => {
                let Some(provider) = self.extensions.get(name).cloned() else {
                    return Ok(None);
                };
                let client = provider.client_for(self)?;
                tracing::debug!(extension = %name, "Created extension client");
                self.extension_clients
                    .insert(name.to_string(), Arc::clone(&client));
                client
            }
        };
        Ok(client.downcast::<T>().ok())
    }
}

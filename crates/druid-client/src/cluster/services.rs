//! Clients for individual Druid services.
//!
//! Each role client is a thin wrapper over the cached transport of one
//! endpoint. They are cheap to clone and hold no state of their own.

use crate::consts;
use crate::error::{ClientError, Result};
use crate::transport::{build_path, HttpResponse, Transport};
use crate::types::{TaskFilter, TaskStatus, TaskStatusResponse};
use serde_json::{json, Value};
use std::ops::Deref;
use std::sync::Arc;

const REQ_STATUS: &str = "/status";
const REQ_HEALTH: &str = "/status/health";
const REQ_PROPERTIES: &str = "/status/properties";
const REQ_IN_CLUSTER: &str = "/status/selfDiscovered/status";

const REQ_COORD_LEADER: &str = "/druid/coordinator/v1/leader";
const REQ_COORD_CLUSTER: &str = "/druid/coordinator/v1/cluster";
const REQ_LU_CONFIG: &str = "/druid/coordinator/v1/lookups/config";
const REQ_LU_TIER_CONFIG: &str = "/druid/coordinator/v1/lookups/config/{}";
const REQ_LU_LOOKUP_CONFIG: &str = "/druid/coordinator/v1/lookups/config/{}/{}";

const REQ_OL_LEADER: &str = "/druid/indexer/v1/leader";

const REQ_BROKERS: &str = "/druid/router/v1/brokers";
const REQ_ROUTER_CLUSTER: &str = "/druid/router/v1/cluster";

const REQ_BROKER_STATUS: &str = "/druid/broker/v1/loadstatus";

/// Endpoints every Druid service offers.
#[derive(Debug, Clone)]
pub struct Service {
    transport: Arc<dyn Transport>,
}

impl Service {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Base URL of the service.
    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.transport.get(path, query).await?.into_json()
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        Ok(self.transport.get(path, &[]).await?.check()?.body)
    }

    /// Version and module information (`GET /status`).
    pub async fn status(&self) -> Result<Value> {
        self.get_json(REQ_STATUS, &[]).await
    }

    /// True when the service answers its health check.
    pub async fn is_healthy(&self) -> bool {
        match self.get_json(REQ_HEALTH, &[]).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(e) => {
                tracing::debug!(url = %self.base_url(), error = %e, "Health check failed");
                false
            }
        }
    }

    /// Runtime properties of the service.
    pub async fn properties(&self) -> Result<Value> {
        self.get_json(REQ_PROPERTIES, &[]).await
    }

    /// True when the service has discovered itself as part of the cluster.
    pub async fn in_cluster(&self) -> bool {
        match self.get_json(REQ_IN_CLUSTER, &[]).await {
            Ok(value) => value
                .get("selfDiscovered")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

macro_rules! role_client {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            service: Service,
        }

        impl $name {
            pub fn new(transport: Arc<dyn Transport>) -> Self {
                Self {
                    service: Service::new(transport),
                }
            }
        }

        impl Deref for $name {
            type Target = Service;

            fn deref(&self) -> &Service {
                &self.service
            }
        }
    };
}

role_client!(
    /// Client for the lead Coordinator.
    Coordinator
);
role_client!(
    /// Client for the lead Overlord.
    Overlord
);
role_client!(
    /// Client for a Router.
    Router
);
role_client!(
    /// Client for a Broker.
    Broker
);

/// Map a 404 to `NotFound(what)`, other failures to query errors.
fn not_found_or(response: HttpResponse, what: impl FnOnce() -> String) -> Result<Value> {
    if response.status == 404 {
        return Err(ClientError::NotFound(what()));
    }
    response.into_json()
}

impl Coordinator {
    /// URL of the current lead Coordinator, as the cluster reports it.
    pub async fn lead(&self) -> Result<String> {
        self.get_text(REQ_COORD_LEADER).await
    }

    /// Tiers that have lookups configured.
    pub async fn lookup_tiers(&self) -> Result<Vec<String>> {
        let value = self.get_json(REQ_LU_CONFIG, &[]).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Names of the lookups defined in `tier`.
    ///
    /// Fails with [`ClientError::NotFound`] if the tier is undefined or
    /// lookups are not initialized.
    pub async fn lookups_for_tier(&self, tier: &str) -> Result<Vec<String>> {
        let path = build_path(REQ_LU_TIER_CONFIG, &[tier]);
        let response = self.transport().get(&path, &[]).await?;
        let value = not_found_or(response, || format!("tier = {tier}"))?;
        Ok(serde_json::from_value(value)?)
    }

    /// The lookup definition for `id` in `tier`.
    ///
    /// Fails with [`ClientError::NotFound`] naming both tier and id when
    /// either is undefined.
    pub async fn lookup(&self, tier: &str, id: &str, detailed: bool) -> Result<Value> {
        let path = build_path(REQ_LU_LOOKUP_CONFIG, &[tier, id]);
        let query = if detailed {
            vec![("detailed", String::new())]
        } else {
            Vec::new()
        };
        let response = self.transport().get(&path, &query).await?;
        not_found_or(response, || format!("tier = {tier}, lookup id = {id}"))
    }

    /// Services known to the Coordinator, grouped by node type.
    pub async fn cluster_nodes(&self) -> Result<Value> {
        self.get_json(REQ_COORD_CLUSTER, &[("full", String::new())])
            .await
    }
}

impl Overlord {
    /// URL of the current lead Overlord, as the cluster reports it.
    pub async fn lead(&self) -> Result<String> {
        self.get_text(REQ_OL_LEADER).await
    }

    /// Tasks matching `filter`.
    pub async fn tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskStatus>> {
        let value = self.get_json(consts::REQ_TASKS, &filter.to_query()).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// The task payload as submitted.
    pub async fn task(&self, task_id: &str) -> Result<Value> {
        let path = build_path(consts::REQ_TASK, &[task_id]);
        let response = self.transport().get(&path, &[]).await?;
        not_found_or(response, || format!("task id = {task_id}"))
    }

    /// Current status of a task.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let path = build_path(consts::REQ_TASK_STATUS, &[task_id]);
        let response = self.transport().get(&path, &[]).await?;
        let value = not_found_or(response, || format!("task id = {task_id}"))?;
        let response: TaskStatusResponse = serde_json::from_value(value)?;
        response
            .status
            .ok_or_else(|| ClientError::NotFound(format!("task id = {task_id}")))
    }

    /// Completion reports of a task. Only available once the task is done.
    pub async fn task_reports(&self, task_id: &str) -> Result<Value> {
        let path = build_path(consts::REQ_TASK_REPORTS, &[task_id]);
        let response = self.transport().get(&path, &[]).await?;
        not_found_or(response, || format!("task id = {task_id}"))
    }

    /// Ask the Overlord to stop a task.
    pub async fn shut_down_task(&self, task_id: &str) -> Result<Value> {
        let path = build_path(consts::REQ_TASK_SHUTDOWN, &[task_id]);
        self.transport()
            .post_json(&path, &json!({}), &[])
            .await?
            .into_json()
    }
}

impl Router {
    /// Brokers known to the Router, by service name.
    pub async fn brokers(&self) -> Result<Value> {
        self.get_json(REQ_BROKERS, &[]).await
    }

    /// Services known to the Router.
    pub async fn servers(&self) -> Result<Value> {
        self.get_json(REQ_ROUTER_CLUSTER, &[]).await
    }
}

impl Broker {
    /// True once the Broker knows about all segments in the cluster.
    pub async fn is_ready(&self) -> Result<bool> {
        let value = self.get_json(REQ_BROKER_STATUS, &[]).await?;
        Ok(value
            .get("inventoryInitialized")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}

//! Asynchronous query execution.
//!
//! Druid offers three ways to run a query in the background, each with its
//! own endpoints and payload shapes:
//!
//! - **Broker async**: `POST /druid/v2/sql/async`, polled by id on the Router.
//! - **Indexer task**: `POST /druid/v2/sql/task`, polled as a task on the
//!   lead Overlord; results come from the task reports.
//! - **Direct worker**: a synchronous SQL call that returns a task id, polled
//!   on the single worker that runs it.
//!
//! [`AsyncQuery`] hides those differences behind one state machine:
//! `Initialized -> Running -> Complete | Failed`.

use crate::codec::{self, ColumnSchema};
use crate::config::ClientConfig;
use crate::consts;
use crate::error::{ClientError, Result};
use crate::request::{AsyncEngine, SqlRequest};
use crate::transport::{build_path, HttpResponse, Transport};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Engine-independent state of an async query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncState {
    Initialized,
    Running,
    Complete,
    Failed,
}

impl AsyncState {
    /// True for `Complete` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, AsyncState::Complete | AsyncState::Failed)
    }

    fn from_broker(state: &str) -> Self {
        match state {
            "RUNNING" => AsyncState::Running,
            "COMPLETE" => AsyncState::Complete,
            "FAILED" => AsyncState::Failed,
            _ => AsyncState::Initialized,
        }
    }

    fn from_task(status_code: &str) -> Self {
        match status_code {
            "RUNNING" => AsyncState::Running,
            "SUCCESS" => AsyncState::Complete,
            "FAILED" => AsyncState::Failed,
            _ => AsyncState::Initialized,
        }
    }

    /// Workers only report `WAITING` and `RUNNING` while a query is live;
    /// any state other than `COMPLETED` after that is a failure.
    fn from_worker(state: &str) -> Self {
        match state {
            "WAITING" => AsyncState::Initialized,
            "RUNNING" => AsyncState::Running,
            "COMPLETED" => AsyncState::Complete,
            _ => AsyncState::Failed,
        }
    }
}

impl fmt::Display for AsyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AsyncState::Initialized => "INITIALIZED",
            AsyncState::Running => "RUNNING",
            AsyncState::Complete => "COMPLETE",
            AsyncState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Best-effort message from a failed status payload: `error.errorMessage`,
/// then `error.error`, then `error` itself.
fn extract_error(payload: &Value) -> String {
    let Some(error) = payload.get("error").filter(|e| !e.is_null()) else {
        return "Unknown error".to_string();
    };
    error
        .get("errorMessage")
        .and_then(Value::as_str)
        .or_else(|| error.get("error").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| codec::value_to_string(error))
}

fn require_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::InvalidResponse(format!("missing '{key}' in {payload}")))
}

/// Where, and how, an accepted query is polled.
#[derive(Debug)]
enum Poller {
    Broker {
        router: Arc<dyn Transport>,
        status_timeout: Duration,
    },
    IndexerTask {
        overlord: Arc<dyn Transport>,
    },
    DirectWorker {
        worker: Arc<dyn Transport>,
    },
}

/// Parsed status poll: raw engine state, mapped state, failure message.
struct PollOutcome {
    engine_state: String,
    state: AsyncState,
    error: Option<String>,
}

impl Poller {
    async fn status(&self, id: &str) -> Result<Value> {
        match self {
            Poller::Broker {
                router,
                status_timeout,
            } => {
                let path = build_path(consts::REQ_ASYNC_STATUS, &[id]);
                let timeout = status_timeout.as_millis().to_string();
                router.get(&path, &[("timeout", timeout)]).await?.into_json()
            }
            Poller::IndexerTask { overlord } => {
                let path = build_path(consts::REQ_TASK_STATUS, &[id]);
                overlord.get(&path, &[]).await?.into_json()
            }
            Poller::DirectWorker { worker } => {
                let path = build_path(consts::REQ_WORKER_STATUS, &[id]);
                worker.get(&path, &[]).await?.into_json()
            }
        }
    }

    fn parse_status(&self, payload: &Value) -> Result<PollOutcome> {
        match self {
            Poller::Broker { .. } => {
                let engine_state = require_str(payload, "state")?.to_string();
                let state = AsyncState::from_broker(&engine_state);
                let error = (state == AsyncState::Failed).then(|| extract_error(payload));
                Ok(PollOutcome {
                    engine_state,
                    state,
                    error,
                })
            }
            Poller::IndexerTask { .. } => {
                let status = payload.get("status").filter(|s| s.is_object());
                let engine_state = status
                    .and_then(|s| s.get("statusCode"))
                    .and_then(Value::as_str)
                    .unwrap_or("PENDING")
                    .to_string();
                let state = AsyncState::from_task(&engine_state);
                let error = (state == AsyncState::Failed).then(|| {
                    status
                        .and_then(|s| s.get("errorMsg"))
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error")
                        .to_string()
                });
                Ok(PollOutcome {
                    engine_state,
                    state,
                    error,
                })
            }
            Poller::DirectWorker { .. } => {
                let engine_state = require_str(payload, "state")?.to_string();
                let state = AsyncState::from_worker(&engine_state);
                let error = (state == AsyncState::Failed).then(|| match engine_state.as_str() {
                    "FAILED" | "CANCELLED" => extract_error(payload),
                    other => format!("Unexpected worker state: {other}"),
                });
                Ok(PollOutcome {
                    engine_state,
                    state,
                    error,
                })
            }
        }
    }

    async fn results(&self, id: &str) -> Result<ResultPayload> {
        match self {
            Poller::Broker { router, .. } => {
                let path = build_path(consts::REQ_ASYNC_RESULTS, &[id]);
                let payload = router.get(&path, &[]).await?.into_json()?;
                Ok(ResultPayload::BrokerAsync(payload))
            }
            Poller::IndexerTask { overlord } => {
                let path = build_path(consts::REQ_TASK_REPORTS, &[id]);
                let mut reports = overlord.get(&path, &[]).await?.into_json()?;
                let results = reports
                    .pointer_mut("/multiStageQuery/payload/results")
                    .map(Value::take)
                    .ok_or_else(|| {
                        ClientError::InvalidResponse(format!(
                            "task {id} reports carry no multiStageQuery results"
                        ))
                    })?;
                Ok(ResultPayload::IndexerTask(results))
            }
            Poller::DirectWorker { worker } => {
                let path = build_path(consts::REQ_WORKER_TASK, &[id]);
                let payload = worker.get(&path, &[]).await?.into_json()?;
                Ok(ResultPayload::DirectWorker(payload))
            }
        }
    }

    async fn details(&self, id: &str) -> Result<Value> {
        let (transport, template) = match self {
            Poller::Broker { router, .. } => (router, consts::REQ_ASYNC_DETAILS),
            Poller::IndexerTask { overlord } => (overlord, consts::REQ_TASK_REPORTS),
            Poller::DirectWorker { worker } => (worker, consts::REQ_WORKER_DETAILS),
        };
        transport
            .get(&build_path(template, &[id]), &[])
            .await?
            .into_json()
    }

    async fn cancel(&self, id: &str) -> Result<()> {
        let response = match self {
            Poller::Broker { router, .. } => {
                router
                    .delete(&build_path(consts::REQ_ASYNC_DETAILS, &[id]))
                    .await?
            }
            Poller::IndexerTask { overlord } => {
                overlord
                    .post_json(&build_path(consts::REQ_TASK_SHUTDOWN, &[id]), &json!({}), &[])
                    .await?
            }
            Poller::DirectWorker { worker } => {
                worker
                    .delete(&build_path(consts::REQ_WORKER_TASK, &[id]))
                    .await?
            }
        };
        // Broker async answers a successful DELETE with 202 or 204.
        if response.is_ok() || response.status == 204 {
            Ok(())
        } else {
            response.check().map(|_| ())
        }
    }
}

/// Result payload of a finished query, one variant per engine.
///
/// The engines describe columns in structurally different ways: header
/// rows inside the data (broker), a `signature` plus `sqlTypeNames` (task
/// reports), or one object per column (worker).
#[derive(Debug)]
enum ResultPayload {
    BrokerAsync(Value),
    IndexerTask(Value),
    DirectWorker(Value),
}

/// Header rows in multi-stage results fetched through the broker async API:
/// names, Druid types, SQL types.
const MULTI_STAGE_HEADER_ROWS: usize = 3;

impl ResultPayload {
    fn raw(&self) -> &Value {
        match self {
            ResultPayload::BrokerAsync(v)
            | ResultPayload::IndexerTask(v)
            | ResultPayload::DirectWorker(v) => v,
        }
    }

    fn schema(&self, request: &SqlRequest) -> Result<Vec<ColumnSchema>> {
        match self {
            ResultPayload::BrokerAsync(payload) if request.is_multi_stage() => {
                header_row_schema(payload)
            }
            ResultPayload::BrokerAsync(payload) => {
                codec::decode_schema(request.format(), request.header_options(), payload)
            }
            ResultPayload::IndexerTask(payload) => signature_schema(payload),
            ResultPayload::DirectWorker(payload) => column_object_schema(payload),
        }
    }

    fn rows(&self, request: &SqlRequest) -> Result<Vec<Value>> {
        match self {
            ResultPayload::BrokerAsync(payload) if request.is_multi_stage() => {
                let rows = array_at(payload, "results")?;
                Ok(rows
                    .get(MULTI_STAGE_HEADER_ROWS..)
                    .map(<[Value]>::to_vec)
                    .unwrap_or_default())
            }
            ResultPayload::BrokerAsync(payload) => {
                codec::decode_rows(request.format(), request.header_options(), payload)
            }
            ResultPayload::IndexerTask(payload) | ResultPayload::DirectWorker(payload) => {
                Ok(array_at(payload.get("results").unwrap_or(&Value::Null), "results")?.to_vec())
            }
        }
    }
}

fn array_at<'a>(value: &'a Value, what: &str) -> Result<&'a [Value]> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| ClientError::InvalidResponse(format!("expected {what} to be an array")))
}

fn string_at(row: Option<&Value>, col: usize) -> Option<String> {
    match row?.get(col)? {
        Value::Null => None,
        v => Some(codec::value_to_string(v)),
    }
}

fn header_row_schema(payload: &Value) -> Result<Vec<ColumnSchema>> {
    let rows = array_at(payload, "results")?;
    let names = rows
        .first()
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::InvalidResponse("results have no header row".to_string()))?;
    Ok(names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            ColumnSchema::new(
                codec::value_to_string(name),
                string_at(rows.get(2), i),
                string_at(rows.get(1), i),
            )
        })
        .collect())
}

fn signature_schema(payload: &Value) -> Result<Vec<ColumnSchema>> {
    let signature = array_at(payload.get("signature").unwrap_or(&Value::Null), "signature")?;
    let sql_types = payload.get("sqlTypeNames");
    signature
        .iter()
        .enumerate()
        .map(|(i, col)| {
            Ok(ColumnSchema::new(
                require_str(col, "name")?,
                string_at(sql_types, i),
                col.get("type").and_then(Value::as_str).map(str::to_string),
            ))
        })
        .collect()
}

fn column_object_schema(payload: &Value) -> Result<Vec<ColumnSchema>> {
    let columns = array_at(payload.get("schema").unwrap_or(&Value::Null), "schema")?;
    columns
        .iter()
        .map(|col| {
            let text = |key: &str| col.get(key).and_then(Value::as_str).map(str::to_string);
            Ok(ColumnSchema::new(
                require_str(col, "name")?,
                text("sqlType"),
                text("druidType"),
            ))
        })
        .collect()
}

const FAILED_HANDLE: &str = "Operation is invalid on a failed query";

/// Handle to a query running in the background.
///
/// Every method that talks to Druid takes `&mut self`: polling updates the
/// handle's state, and results are cached on the handle once fetched.
#[derive(Debug)]
pub struct AsyncQuery {
    request: SqlRequest,
    engine: AsyncEngine,
    /// `None` when submission failed
    poller: Option<Poller>,
    id: Option<String>,
    state: AsyncState,
    engine_state: String,
    error: Option<String>,
    status: Option<Value>,
    poll_interval: Duration,
    join_timeout: Option<Duration>,
    results: Option<ResultPayload>,
    details: Option<Value>,
    schema: Option<Vec<ColumnSchema>>,
    rows: Option<Vec<Value>>,
}

impl AsyncQuery {
    fn accepted(
        request: SqlRequest,
        engine: AsyncEngine,
        poller: Poller,
        id: String,
        engine_state: String,
        config: &ClientConfig,
    ) -> Self {
        let state = match engine {
            AsyncEngine::Broker => AsyncState::from_broker(&engine_state),
            AsyncEngine::IndexerTask => AsyncState::from_task(&engine_state),
            AsyncEngine::DirectWorker => AsyncState::from_worker(&engine_state),
        };
        let poll_interval = match engine {
            AsyncEngine::Broker | AsyncEngine::DirectWorker => config.async_poll_interval,
            AsyncEngine::IndexerTask => config.task_poll_interval,
        };
        tracing::info!(query_id = %id, engine = ?engine, state = %engine_state, "Async query submitted");
        let status = json!({"id": id, "state": engine_state});
        Self {
            request,
            engine,
            poller: Some(poller),
            id: Some(id),
            state,
            engine_state,
            error: None,
            status: Some(status),
            poll_interval,
            join_timeout: config.join_timeout,
            results: None,
            details: None,
            schema: None,
            rows: None,
        }
    }

    fn rejected(request: SqlRequest, engine: AsyncEngine, error: String, config: &ClientConfig) -> Self {
        tracing::warn!(engine = ?engine, error = %error, "Async query submission failed");
        Self {
            request,
            engine,
            poller: None,
            id: None,
            state: AsyncState::Failed,
            engine_state: AsyncState::Failed.to_string(),
            error: Some(error),
            status: None,
            poll_interval: config.async_poll_interval,
            join_timeout: config.join_timeout,
            results: None,
            details: None,
            schema: None,
            rows: None,
        }
    }

    /// Turn a submission outcome into a handle. Transport failures and
    /// non-2xx answers yield a failed handle rather than an error.
    fn submitted(
        request: SqlRequest,
        engine: AsyncEngine,
        outcome: Result<HttpResponse>,
        config: &ClientConfig,
        accept: impl FnOnce(SqlRequest, Value) -> Result<Self>,
    ) -> Result<Self> {
        match outcome {
            Ok(response) if response.is_ok() => {
                let payload = response.json()?;
                accept(request, payload)
            }
            Ok(response) => Ok(Self::rejected(request, engine, response.error_message(), config)),
            Err(e) => Ok(Self::rejected(request, engine, e.to_string(), config)),
        }
    }

    /// Submit through the broker async API.
    pub(crate) async fn submit_broker(
        router: Arc<dyn Transport>,
        request: SqlRequest,
        config: &ClientConfig,
    ) -> Result<Self> {
        request.validate()?;
        let outcome = router
            .post_json(consts::REQ_ASYNC_SQL, &request.to_payload(), request.http_headers())
            .await;
        let engine = AsyncEngine::Broker;
        Self::submitted(request, engine, outcome, config, |request, payload| {
            let id = require_str(&payload, "asyncResultId")?.to_string();
            let engine_state = require_str(&payload, "state")?.to_string();
            let poller = Poller::Broker {
                router,
                status_timeout: config.async_status_timeout,
            };
            Ok(Self::accepted(request, engine, poller, id, engine_state, config))
        })
    }

    /// Submit as an indexer task, polled on `overlord`.
    pub(crate) async fn submit_task(
        router: Arc<dyn Transport>,
        overlord: Arc<dyn Transport>,
        request: SqlRequest,
        config: &ClientConfig,
    ) -> Result<Self> {
        request.validate()?;
        let outcome = router
            .post_json(consts::REQ_SQL_TASK, &request.to_payload(), request.http_headers())
            .await;
        let engine = AsyncEngine::IndexerTask;
        Self::submitted(request, engine, outcome, config, |request, payload| {
            let id = require_str(&payload, "taskId")?.to_string();
            let engine_state = payload
                .get("state")
                .and_then(Value::as_str)
                .unwrap_or("PENDING")
                .to_string();
            let poller = Poller::IndexerTask { overlord };
            Ok(Self::accepted(request, engine, poller, id, engine_state, config))
        })
    }

    /// Submit for direct execution, polled on `worker`.
    pub(crate) async fn submit_worker(
        router: Arc<dyn Transport>,
        worker: Arc<dyn Transport>,
        request: SqlRequest,
        config: &ClientConfig,
    ) -> Result<Self> {
        request.validate()?;
        let outcome = router
            .post_json(consts::REQ_SQL, &request.to_payload(), request.http_headers())
            .await;
        let engine = AsyncEngine::DirectWorker;
        Self::submitted(request, engine, outcome, config, |request, payload| {
            let row = payload.get(0).ok_or_else(|| {
                ClientError::InvalidResponse(format!("expected a task row, got {payload}"))
            })?;
            let id = require_str(row, "TASK")?.to_string();
            let engine_state = require_str(row, "state")?.to_string();
            let poller = Poller::DirectWorker { worker };
            Ok(Self::accepted(request, engine, poller, id, engine_state, config))
        })
    }

    /// Query (or task) id. `None` only when submission failed.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn engine(&self) -> AsyncEngine {
        self.engine
    }

    pub fn request(&self) -> &SqlRequest {
        &self.request
    }

    /// State as of the last poll.
    pub fn state(&self) -> AsyncState {
        self.state
    }

    /// State as the engine spells it, e.g. `SUCCESS` or `COMPLETED`.
    pub fn engine_state(&self) -> &str {
        &self.engine_state
    }

    /// Failure message, once the query has failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Payload of the last status poll.
    pub fn status_payload(&self) -> Option<&Value> {
        self.status.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.state == AsyncState::Complete
    }

    /// Change the interval between polls in [`join`](Self::join).
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    fn check_valid(&self) -> Result<(&Poller, &str)> {
        match (&self.poller, self.id.as_deref()) {
            (Some(poller), Some(id)) => Ok((poller, id)),
            _ => Err(ClientError::usage(FAILED_HANDLE)),
        }
    }

    /// Poll Druid once and update the state.
    pub async fn status(&mut self) -> Result<&Value> {
        let (poller, id) = self.check_valid()?;
        let payload = poller.status(id).await?;
        let outcome = poller.parse_status(&payload)?;

        if outcome.state != self.state {
            tracing::info!(
                query_id = %id,
                from = %self.state,
                to = %outcome.state,
                "Async query state changed"
            );
        }
        if let Some(error) = &outcome.error {
            tracing::warn!(query_id = %id, error = %error, "Async query failed");
        }
        self.state = outcome.state;
        self.engine_state = outcome.engine_state;
        if outcome.error.is_some() {
            self.error = outcome.error;
        }
        Ok(self.status.insert(payload))
    }

    /// Poll until the query is done. Returns true if it succeeded.
    ///
    /// A handle whose submission failed returns false without polling.
    /// Polls are spaced by a fixed interval; if the client was configured
    /// with a join timeout, exceeding it yields [`ClientError::Timeout`].
    pub async fn join(&mut self) -> Result<bool> {
        if self.poller.is_none() {
            return Ok(false);
        }
        let start = Instant::now();
        if !self.is_done() {
            self.status().await?;
            while !self.is_done() {
                if let Some(limit) = self.join_timeout {
                    if start.elapsed() >= limit {
                        return Err(ClientError::Timeout {
                            id: self.id.clone().unwrap_or_default(),
                            state: self.engine_state.clone(),
                            elapsed: start.elapsed(),
                        });
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
                self.status().await?;
            }
        }
        Ok(self.succeeded())
    }

    /// Wait for the query to finish; fail if it did not succeed.
    pub async fn wait_done(&mut self) -> Result<()> {
        self.check_valid()?;
        if !self.join().await? {
            let message = self.error.as_deref().unwrap_or("Unknown error");
            return Err(ClientError::query(None, format!("Query failed: {message}")));
        }
        Ok(())
    }

    async fn fetch_results(&mut self) -> Result<&ResultPayload> {
        if self.results.is_none() {
            self.wait_done().await?;
            let (poller, id) = self.check_valid()?;
            let payload = poller.results(id).await?;
            self.results = Some(payload);
        }
        self.results
            .as_ref()
            .ok_or_else(|| ClientError::usage(FAILED_HANDLE))
    }

    /// Raw result payload. Waits for completion on first call.
    pub async fn results(&mut self) -> Result<&Value> {
        self.check_valid()?;
        Ok(self.fetch_results().await?.raw())
    }

    /// Engine-specific execution details. Waits for completion on first call.
    pub async fn details(&mut self) -> Result<&Value> {
        self.check_valid()?;
        if self.details.is_none() {
            self.wait_done().await?;
            let (poller, id) = self.check_valid()?;
            let details = poller.details(id).await?;
            self.details = Some(details);
        }
        self.details
            .as_ref()
            .ok_or_else(|| ClientError::usage(FAILED_HANDLE))
    }

    /// Column schema of the results. Waits for completion on first call.
    pub async fn schema(&mut self) -> Result<&[ColumnSchema]> {
        self.check_valid()?;
        if self.schema.is_none() {
            self.fetch_results().await?;
            let schema = match &self.results {
                Some(payload) => payload.schema(&self.request)?,
                None => Vec::new(),
            };
            self.schema = Some(schema);
        }
        Ok(self.schema.as_deref().unwrap_or_default())
    }

    /// Data rows, with any header rows removed. Waits for completion on
    /// first call.
    pub async fn rows(&mut self) -> Result<&[Value]> {
        self.check_valid()?;
        if self.rows.is_none() {
            self.fetch_results().await?;
            let rows = match &self.results {
                Some(payload) => payload.rows(&self.request)?,
                None => Vec::new(),
            };
            self.rows = Some(rows);
        }
        Ok(self.rows.as_deref().unwrap_or_default())
    }

    /// Wait for success, then return the rows.
    pub async fn wait(&mut self) -> Result<&[Value]> {
        self.wait_done().await?;
        self.rows().await
    }

    /// Ask Druid to stop the query. The state is updated by the next poll.
    pub async fn cancel(&mut self) -> Result<()> {
        let (poller, id) = self.check_valid()?;
        tracing::info!(query_id = %id, "Cancelling async query");
        poller.cancel(id).await
    }
}

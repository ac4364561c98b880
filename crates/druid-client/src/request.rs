//! SQL request builder.

use crate::codec::{HeaderOptions, ResultFormat};
use crate::consts;
use crate::error::{ClientError, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// A typed SQL query parameter (`?` placeholder value).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlParameter {
    /// SQL type name, e.g. `VARCHAR`
    #[serde(rename = "type")]
    pub sql_type: String,
    /// Parameter value
    pub value: Value,
}

impl SqlParameter {
    /// Create a parameter of an arbitrary SQL type.
    pub fn new(sql_type: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            sql_type: sql_type.into(),
            value: value.into(),
        }
    }

    pub fn varchar(value: impl Into<String>) -> Self {
        Self::new("VARCHAR", value.into())
    }

    pub fn bigint(value: i64) -> Self {
        Self::new("BIGINT", value)
    }

    pub fn double(value: f64) -> Self {
        Self::new("DOUBLE", value)
    }

    pub fn timestamp(value: impl Into<String>) -> Self {
        Self::new("TIMESTAMP", value.into())
    }
}

/// How an async request should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Broker-managed async query
    Broker,
    /// Multi-stage query run as an indexer task
    Indexer,
    /// Multi-stage query run directly on a worker server
    Server,
}

/// Engine that will run an async query, derived from the request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEngine {
    /// Broker async protocol (`/druid/v2/sql/async`)
    Broker,
    /// Task protocol (`/druid/v2/sql/task`, polled on the Overlord)
    IndexerTask,
    /// Direct worker protocol (polled on the worker itself)
    DirectWorker,
}

/// A SQL query waiting to be submitted.
///
/// Construction accepts any text, including blank; blank SQL is rejected
/// when the request is submitted.
///
/// ```
/// use druid_client::{ResultFormat, SqlParameter, SqlRequest};
/// use serde_json::json;
///
/// let request = SqlRequest::new("SELECT * FROM wikipedia WHERE channel = ?")
///     .with_format(ResultFormat::ArrayWithTrailer)
///     .with_headers(true, true)
///     .with_parameter(SqlParameter::varchar("#en"))
///     .with_context_value("sqlTimeZone", json!("Etc/UTC"));
///
/// let payload = request.to_payload();
/// assert_eq!(payload["resultFormat"], "arrayWithTrailer");
/// assert_eq!(payload["header"], true);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SqlRequest {
    sql: String,
    context: Map<String, Value>,
    parameters: Vec<SqlParameter>,
    result_format: Option<ResultFormat>,
    headers: HeaderOptions,
    http_headers: Vec<(String, String)>,
    async_mode: Option<QueryMode>,
}

impl SqlRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Default::default()
        }
    }

    /// Select the result encoding.
    pub fn with_format(mut self, format: ResultFormat) -> Self {
        self.result_format = Some(format);
        self
    }

    /// Ask for a column-name header row, optionally followed by SQL and
    /// Druid type rows.
    pub fn with_headers(mut self, sql_types: bool, druid_types: bool) -> Self {
        self.headers = HeaderOptions {
            headers: true,
            druid_types,
            sql_types,
        };
        self
    }

    /// Merge entries into the query context; new keys overwrite old ones.
    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context.extend(context);
        self
    }

    /// Set a single context entry.
    pub fn with_context_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Append a positional parameter.
    pub fn with_parameter(mut self, parameter: SqlParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Append several positional parameters.
    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = SqlParameter>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Add an HTTP header sent along with the request.
    pub fn with_http_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.push((name.into(), value.into()));
        self
    }

    /// Mark the request as async and pick the engine that runs it.
    ///
    /// The multi-stage modes also set the `talaria` context key, which is how
    /// Druid tells them apart.
    pub fn with_async(mut self, mode: QueryMode) -> Self {
        self.async_mode = Some(mode);
        match mode {
            QueryMode::Broker => {}
            QueryMode::Indexer => {
                self.context
                    .insert(consts::TALARIA_KEY.to_string(), Value::Bool(true));
            }
            QueryMode::Server => {
                self.context.insert(
                    consts::TALARIA_KEY.to_string(),
                    Value::String(consts::TALARIA_SERVER.to_string()),
                );
            }
        }
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn parameters(&self) -> &[SqlParameter] {
        &self.parameters
    }

    pub fn http_headers(&self) -> &[(String, String)] {
        &self.http_headers
    }

    pub fn header_options(&self) -> &HeaderOptions {
        &self.headers
    }

    pub fn async_mode(&self) -> Option<QueryMode> {
        self.async_mode
    }

    /// True when the context asks for the multi-stage engine.
    pub fn is_multi_stage(&self) -> bool {
        match self.context.get(consts::TALARIA_KEY) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "indexer" || s == consts::TALARIA_SERVER,
            _ => false,
        }
    }

    /// Engine that runs the request when submitted asynchronously: the one
    /// chosen by [`with_async`](Self::with_async), else the one implied by
    /// the context.
    pub fn engine(&self) -> AsyncEngine {
        match self.async_mode {
            Some(QueryMode::Broker) => return AsyncEngine::Broker,
            Some(QueryMode::Indexer) => return AsyncEngine::IndexerTask,
            Some(QueryMode::Server) => return AsyncEngine::DirectWorker,
            None => {}
        }
        match self.context.get(consts::TALARIA_KEY) {
            Some(Value::Bool(true)) => AsyncEngine::IndexerTask,
            Some(Value::String(s)) if s == "indexer" || s == consts::TALARIA_SERVER => {
                AsyncEngine::DirectWorker
            }
            _ => AsyncEngine::Broker,
        }
    }

    /// Effective result format. Multi-stage queries always produce arrays.
    pub fn format(&self) -> ResultFormat {
        if self.is_multi_stage() {
            return ResultFormat::Array;
        }
        self.result_format.unwrap_or_default()
    }

    /// Reject requests that cannot be submitted.
    pub fn validate(&self) -> Result<()> {
        if self.sql.trim().is_empty() {
            return Err(ClientError::usage("No query provided."));
        }
        Ok(())
    }

    /// Compose the JSON body sent to Druid, omitting unset fields.
    pub fn to_payload(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("query".to_string(), Value::String(self.sql.clone()));
        if !self.context.is_empty() {
            obj.insert("context".to_string(), Value::Object(self.context.clone()));
        }
        if !self.parameters.is_empty() {
            obj.insert(
                "parameters".to_string(),
                serde_json::to_value(&self.parameters).unwrap_or(Value::Null),
            );
        }
        if self.headers.headers {
            obj.insert("header".to_string(), Value::Bool(true));
        }
        if let Some(format) = self.result_format {
            obj.insert(
                "resultFormat".to_string(),
                Value::String(format.as_str().to_string()),
            );
        }
        if self.headers.sql_types {
            obj.insert("sqlTypesHeader".to_string(), Value::Bool(true));
        }
        if self.headers.druid_types {
            obj.insert("typesHeader".to_string(), Value::Bool(true));
        }
        Value::Object(obj)
    }
}

impl From<&str> for SqlRequest {
    fn from(sql: &str) -> Self {
        SqlRequest::new(sql)
    }
}

impl From<String> for SqlRequest {
    fn from(sql: String) -> Self {
        SqlRequest::new(sql)
    }
}

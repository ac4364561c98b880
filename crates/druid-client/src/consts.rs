//! Wire-level names shared across modules: REST paths, role names, context
//! keys and type names as Druid spells them.

// Protocols
pub const PLAIN_TEXT_PROTOCOL: &str = "http";
pub const TLS_PROTOCOL: &str = "https";

// Service (role) names as reported in sys.servers
pub const ROUTER: &str = "router";
pub const BROKER: &str = "broker";
pub const COORDINATOR: &str = "coordinator";
pub const OVERLORD: &str = "overlord";
pub const HISTORICAL: &str = "historical";
pub const INDEXER: &str = "indexer";
pub const MIDDLE_MANAGER: &str = "middle_manager";
pub const PEON: &str = "peon";

/// Roles every Druid distribution can report.
pub const SERVICE_ROLES: &[&str] = &[
    ROUTER,
    BROKER,
    COORDINATOR,
    OVERLORD,
    HISTORICAL,
    INDEXER,
    MIDDLE_MANAGER,
    PEON,
];

/// Default lookup tier name.
pub const DEFAULT_TIER: &str = "_default_tier";

/// Query used to discover the services of the cluster.
pub const SERVERS_QUERY: &str = "SELECT * FROM sys.servers";

// SQL endpoints (served by the Router and Brokers)
pub const REQ_SQL: &str = "/druid/v2/sql";
pub const REQ_ASYNC_SQL: &str = "/druid/v2/sql/async";
pub const REQ_ASYNC_DETAILS: &str = "/druid/v2/sql/async/{}";
pub const REQ_ASYNC_STATUS: &str = "/druid/v2/sql/async/{}/status";
pub const REQ_ASYNC_RESULTS: &str = "/druid/v2/sql/async/{}/results";
pub const REQ_SQL_TASK: &str = "/druid/v2/sql/task";

// Task endpoints (served by the Overlord)
pub const REQ_TASKS: &str = "/druid/indexer/v1/tasks";
pub const REQ_TASK: &str = "/druid/indexer/v1/task/{}";
pub const REQ_TASK_STATUS: &str = "/druid/indexer/v1/task/{}/status";
pub const REQ_TASK_REPORTS: &str = "/druid/indexer/v1/task/{}/reports";
pub const REQ_TASK_SHUTDOWN: &str = "/druid/indexer/v1/task/{}/shutdown";

// Direct worker endpoints
pub const REQ_WORKER_TASK: &str = "/talaria/v1/delegate/async/task/{}";
pub const REQ_WORKER_STATUS: &str = "/talaria/v1/delegate/async/task/{}/status";
pub const REQ_WORKER_DETAILS: &str = "/talaria/v1/delegate/async/task/{}/details";

/// Response header carrying the server-assigned SQL query id.
pub const SQL_QUERY_ID_HEADER: &str = "x-druid-sql-query-id";

/// Context key selecting the multi-stage engine.
pub const TALARIA_KEY: &str = "talaria";
/// Context value routing a query straight to a worker.
pub const TALARIA_SERVER: &str = "server";
/// Default capability role of direct workers.
pub const TALARIA_ROLE: &str = "talaria";

// Type names as known to Druid
pub const DRUID_STRING_TYPE: &str = "STRING";
pub const DRUID_LONG_TYPE: &str = "LONG";

// SQL type names as returned from INFORMATION_SCHEMA
pub const SQL_VARCHAR_TYPE: &str = "VARCHAR";
pub const SQL_BIGINT_TYPE: &str = "BIGINT";

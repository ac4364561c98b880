//! Response types for the Druid task API.
//!
//! These mirror the Overlord's JSON and are used for deserialization only;
//! every field Druid may omit is optional.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a task runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLocation {
    pub host: Option<String>,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub tls_port: i32,
}

/// Status of a single task, as reported by the Overlord.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Task id
    pub id: String,
    /// Task type, e.g. `query_controller`, `index_parallel`
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    /// Target datasource
    pub data_source: Option<String>,
    /// When the task was created
    pub created_time: Option<DateTime<Utc>>,
    /// `RUNNING`, `SUCCESS` or `FAILED`
    pub status_code: Option<String>,
    /// Runner-level state: `PENDING`, `WAITING`, `RUNNING`, `NONE`
    pub runner_status_code: Option<String>,
    /// Run time in milliseconds, -1 while running
    pub duration: Option<i64>,
    pub location: Option<TaskLocation>,
    /// Failure reason for failed tasks
    pub error_msg: Option<String>,
}

impl TaskStatus {
    /// True once the task has succeeded or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status_code.as_deref(), Some("SUCCESS") | Some("FAILED"))
    }
}

/// Envelope of `GET /druid/indexer/v1/task/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task id as requested
    pub task: String,
    /// Missing when the Overlord does not know the task
    pub status: Option<TaskStatus>,
}

/// Task filter for [`Overlord::tasks`](crate::cluster::Overlord::tasks).
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// `running`, `complete`, `waiting` or `pending`
    pub state: Option<String>,
    pub datasource: Option<String>,
    pub task_type: Option<String>,
    /// Cap on the number of completed tasks returned
    pub max: Option<u32>,
    /// ISO interval restricting task creation time
    pub created_time_interval: Option<String>,
}

impl TaskFilter {
    pub(crate) fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(state) = &self.state {
            params.push(("state", state.clone()));
        }
        if let Some(ds) = &self.datasource {
            params.push(("datasource", ds.clone()));
        }
        if let Some(t) = &self.task_type {
            params.push(("type", t.clone()));
        }
        if let Some(max) = self.max {
            params.push(("max", max.to_string()));
        }
        if let Some(interval) = &self.created_time_interval {
            params.push(("createdTimeInterval", interval.clone()));
        }
        params
    }
}

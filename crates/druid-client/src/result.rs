//! Results of synchronous SQL queries.

use crate::codec::{self, ColumnSchema, ResultFormat};
use crate::consts;
use crate::error::{ClientError, Result};
use crate::request::SqlRequest;
use crate::transport::HttpResponse;
use serde_json::Value;
use std::sync::OnceLock;

/// Compute a value once and hand out the cached copy afterwards. Failures
/// are not cached.
pub(crate) fn memoize<T>(cell: &OnceLock<T>, compute: impl FnOnce() -> Result<T>) -> Result<&T> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = compute()?;
    Ok(cell.get_or_init(|| value))
}

/// The response to a synchronous SQL query.
///
/// Rows, schema and the parsed payload are decoded on first access and
/// cached; later calls return the same values.
#[derive(Debug)]
pub struct SqlQueryResult {
    request: SqlRequest,
    response: HttpResponse,
    error: Option<String>,
    json: OnceLock<Value>,
    rows: OnceLock<Vec<Value>>,
    schema: OnceLock<Vec<ColumnSchema>>,
}

impl SqlQueryResult {
    /// Wrap a completed response to `request`.
    pub fn new(request: SqlRequest, response: HttpResponse) -> Self {
        let error = if response.is_ok() {
            None
        } else {
            Some(response.error_message())
        };
        Self {
            request,
            response,
            error,
            json: OnceLock::new(),
            rows: OnceLock::new(),
            schema: OnceLock::new(),
        }
    }

    /// True when Druid answered 200 or 202. Rows and schema are only
    /// available then.
    pub fn ok(&self) -> bool {
        self.response.is_ok()
    }

    /// HTTP status of the response.
    pub fn status(&self) -> u16 {
        self.response.status
    }

    /// Error reported by Druid, `None` when the query succeeded.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Server-assigned query id, from the `X-Druid-SQL-Query-Id` header.
    pub fn id(&self) -> Option<&str> {
        self.response.header(consts::SQL_QUERY_ID_HEADER)
    }

    /// The request this result answers.
    pub fn request(&self) -> &SqlRequest {
        &self.request
    }

    /// Result format the rows are encoded in.
    pub fn format(&self) -> ResultFormat {
        self.request.format()
    }

    /// Raw response.
    pub fn http_response(&self) -> &HttpResponse {
        &self.response
    }

    fn check_ok(&self) -> Result<()> {
        match &self.error {
            None => Ok(()),
            Some(message) => Err(ClientError::query(Some(self.response.status), message.clone())),
        }
    }

    /// The parsed response payload.
    pub fn json(&self) -> Result<&Value> {
        self.check_ok()?;
        memoize(&self.json, || self.response.json())
    }

    /// Data rows, with any header rows removed.
    ///
    /// Fails with the query's error when the query did not succeed.
    pub fn rows(&self) -> Result<&[Value]> {
        let json = self.json()?;
        memoize(&self.rows, || {
            codec::decode_rows(self.format(), self.request.header_options(), json)
        })
        .map(Vec::as_slice)
    }

    /// Column schema. Empty for array results requested without headers.
    pub fn schema(&self) -> Result<&[ColumnSchema]> {
        let json = self.json()?;
        memoize(&self.schema, || {
            codec::decode_schema(self.format(), self.request.header_options(), json)
        })
        .map(Vec::as_slice)
    }

    /// Object rows with all-null columns removed.
    ///
    /// Only meaningful for the object format: returns `None` otherwise.
    pub fn non_null(&self) -> Result<Option<Vec<Value>>> {
        if self.format() != ResultFormat::Object {
            return Ok(None);
        }
        Ok(Some(codec::filter_null_cols(self.rows()?)))
    }

    /// Rows as arrays of values, whatever the result format.
    pub fn as_array(&self) -> Result<Vec<Value>> {
        Ok(codec::rows_as_arrays(self.rows()?))
    }

    /// Query profile from the `arrayWithTrailer` trailer, if the server
    /// included one.
    pub fn profile(&self) -> Result<Option<&Value>> {
        if self.format() != ResultFormat::ArrayWithTrailer {
            return Ok(None);
        }
        Ok(self.json()?.get("context").and_then(|c| c.get("profile")))
    }
}

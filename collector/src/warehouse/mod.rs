//! # Warehouse access
//!
//! The collectors only see the [`Connector`] and [`Warehouse`] traits. The production implementation in
//! [`databricks`] speaks the Databricks SQL Statement Execution API; tests plug in scripted doubles.

pub mod databricks;

pub use databricks::DatabricksConnector;
use futures::future::BoxFuture;
use std::{
    sync::Arc,
    time::Duration,
};

/// Substrings of a rendered error that mean the queried table or view does not exist.
const TABLE_NOT_FOUND_SIGNATURES: [&str; 2] = ["table_or_view_not_found", "cannot be found"];

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("failed to connect to Databricks: {0}")]
    Connect(String),
    #[error("authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },
    #[error("request to Databricks failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("statement {state}: [{code}] {message}")]
    Statement { state: String, code: String, message: String },
    #[error("query did not finish within {0:?}")]
    Timeout(Duration),
    #[error("failed to decode result: {0}")]
    Decode(String),
    #[error("connection is closed")]
    Closed,
}

impl WarehouseError {
    /// Whether this is the "table or view not found" class of error.
    ///
    /// Matches on the rendered message, which is how the warehouse reports it across API versions.
    pub fn is_table_not_found(&self) -> bool {
        let message = self.to_string().to_lowercase();
        TABLE_NOT_FOUND_SIGNATURES.iter().any(|signature| message.contains(signature))
    }
}

/// A live session against a SQL warehouse.
pub trait Warehouse: Send + Sync {
    /// Cheap liveness check, bounded by `timeout`.
    fn ping(&self, timeout: Duration) -> BoxFuture<'_, Result<(), WarehouseError>>;

    fn query<'a>(&'a self, sql: &'a str, timeout: Duration) -> BoxFuture<'a, Result<ResultSet, WarehouseError>>;

    /// Releases the session. Further calls fail with [`WarehouseError::Closed`].
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Opens new [`Warehouse`] sessions.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn Warehouse>, WarehouseError>>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
}

/// One result row. Values arrive as text, `None` is SQL `NULL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<Option<String>>,
}

impl Row {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    /// Text value of column `index`; `None` for `NULL` or a missing column.
    pub fn text(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(Option::as_deref)
    }

    pub fn float(&self, index: usize) -> Result<Option<f64>, WarehouseError> {
        let Some(raw) = self.values.get(index) else {
            return Err(WarehouseError::Decode(format!(
                "row has {} columns, wanted column {index}",
                self.values.len()
            )));
        };
        raw.as_deref()
            .map(|value| {
                value
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| WarehouseError::Decode(format!("column {index}: {value:?} is not a number: {e}")))
            })
            .transpose()
    }
}

impl<S: Into<String>> FromIterator<Option<S>> for Row {
    fn from_iter<T: IntoIterator<Item = Option<S>>>(iter: T) -> Self {
        Self::new(iter.into_iter().map(|value| value.map(Into::into)).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn table_not_found_classification() {
        let not_found = WarehouseError::Statement {
            state: "FAILED".to_string(),
            code: "BAD_REQUEST".to_string(),
            message: "[TABLE_OR_VIEW_NOT_FOUND] The table or view `system`.`lakeflow`.`pipeline_update_timeline` \
                      cannot be found."
                .to_string(),
        };
        assert!(not_found.is_table_not_found());

        let legacy = WarehouseError::Decode("Table Cannot Be Found".to_string());
        assert!(legacy.is_table_not_found());

        assert!(!WarehouseError::Timeout(Duration::from_secs(5)).is_table_not_found());
        assert!(!WarehouseError::Connect("connection refused".to_string()).is_table_not_found());
    }

    #[test]
    fn row_values() {
        let row: Row = [Some("123"), None, Some("4.5"), Some("n/a")].into_iter().collect();
        assert_eq!(row.text(0), Some("123"));
        assert_eq!(row.text(1), None);
        assert_eq!(row.text(9), None);
        assert_eq!(row.float(0).unwrap(), Some(123.0));
        assert_eq!(row.float(1).unwrap(), None);
        assert_eq!(row.float(2).unwrap(), Some(4.5));
        assert!(matches!(row.float(3), Err(WarehouseError::Decode(_))));
        assert!(matches!(row.float(4), Err(WarehouseError::Decode(_))));
    }
}

//! # Databricks exporter collector
//!
//! Turns Databricks system tables into Prometheus metrics.
//!
//! ## Overview
//!
//! A scrape enters through [`Orchestrator::collect`]. It obtains a healthy session from the
//! [`ConnectionManager`], reports `databricks_up`, and runs the billing, jobs, pipelines and SQL warehouse
//! collectors concurrently under one shared deadline. Observations are written to a [`MetricSink`] and rendered
//! in the Prometheus text format by [`exposition::render_text`].
//!
//! ## Modules
//!
//! - **`warehouse`**: the SQL session abstraction and its Databricks Statement Execution API implementation
//! - **`connection`**: keeps one session alive and replaces it when its health probe fails
//! - **`availability`**: tracks whether an optional system table exists
//! - **`queries`**: SQL text for every query stage
//! - **`collectors`**: one collector per metric domain
//! - **`metrics`** and **`exposition`**: the metric catalogue and its text rendering

#[macro_use]
extern crate tracing;

pub mod availability;
pub mod collectors;
pub mod connection;
pub mod exposition;
pub mod metrics;
pub mod orchestrator;
pub mod queries;
pub mod warehouse;

#[cfg(test)]
mod testing;

pub use connection::ConnectionManager;
pub use metrics::{
    Metric,
    MetricSink,
    Observation,
    ScrapeBuffer,
};
pub use orchestrator::Orchestrator;
pub use warehouse::{
    Connector,
    DatabricksConnector,
    Warehouse,
    WarehouseError,
};

//! SQL text for every query stage, built over the Databricks system tables.
//!
//! The column order of each query is what the matching stage decoder in [`crate::collectors`] expects.

use std::time::Duration;

/// Existence check for the optional pipelines table.
pub const PIPELINE_TABLE_PROBE_QUERY: &str = "SELECT 1 FROM system.lakeflow.pipeline_update_timeline LIMIT 1";

/// Latest non-deleted name per job.
const LATEST_JOB_NAMES: &str = "
        SELECT workspace_id, job_id, name
        FROM system.lakeflow.jobs
        WHERE delete_time IS NULL
        QUALIFY ROW_NUMBER() OVER (PARTITION BY workspace_id, job_id ORDER BY change_time DESC) = 1";

/// Latest non-deleted name per pipeline.
const LATEST_PIPELINE_NAMES: &str = "
        SELECT workspace_id, pipeline_id, name
        FROM system.lakeflow.pipelines
        WHERE delete_time IS NULL
        QUALIFY ROW_NUMBER() OVER (PARTITION BY workspace_id, pipeline_id ORDER BY change_time DESC) = 1";

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;

/// Renders a lookback as a Databricks SQL interval literal body, e.g. `2 HOURS`.
///
/// Whole days win over whole hours, whole hours over minutes. Anything shorter than a minute, and the seconds
/// remainder of a minute-granular duration, are rounded down with a floor of one minute.
pub fn duration_to_sql_interval(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let (count, unit) = if seconds >= SECONDS_PER_DAY && seconds % SECONDS_PER_DAY == 0 {
        (seconds / SECONDS_PER_DAY, "DAY")
    } else if seconds >= SECONDS_PER_HOUR && seconds % SECONDS_PER_HOUR == 0 {
        (seconds / SECONDS_PER_HOUR, "HOUR")
    } else {
        ((seconds / SECONDS_PER_MINUTE).max(1), "MINUTE")
    };
    if count == 1 {
        format!("{count} {unit}")
    } else {
        format!("{count} {unit}S")
    }
}

// ===== Billing =====

pub fn build_billing_dbus_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            workspace_id,
            sku_name,
            SUM(usage_quantity) AS dbus_total
        FROM system.billing.usage
        WHERE usage_date >= current_date() - INTERVAL {interval}
            AND workspace_id IS NOT NULL
            AND sku_name IS NOT NULL
        GROUP BY workspace_id, sku_name
        ORDER BY workspace_id, sku_name"
    )
}

/// Usage joined with the list price that was effective on each usage date.
pub fn build_billing_cost_estimate_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            u.workspace_id,
            u.sku_name,
            SUM(u.usage_quantity * p.pricing.default) AS cost_estimate_usd
        FROM system.billing.usage u
        JOIN system.billing.list_prices p
            ON u.sku_name = p.sku_name
            AND u.cloud = p.cloud
            AND u.usage_date >= DATE(p.price_start_time)
            AND (p.price_end_time IS NULL OR u.usage_date < DATE(p.price_end_time))
        WHERE u.usage_date >= current_date() - INTERVAL {interval}
            AND u.workspace_id IS NOT NULL
            AND u.sku_name IS NOT NULL
        GROUP BY u.workspace_id, u.sku_name
        ORDER BY u.workspace_id, u.sku_name"
    )
}

pub fn build_price_change_events_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            sku_name,
            COUNT(*) AS price_change_count
        FROM system.billing.list_prices
        WHERE price_start_time >= current_timestamp() - INTERVAL {interval}
            AND sku_name IS NOT NULL
        GROUP BY sku_name
        HAVING COUNT(*) > 1
        ORDER BY price_change_count DESC"
    )
}

// ===== Jobs =====

pub fn build_job_runs_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            t.workspace_id,
            t.job_id,
            COALESCE(j.name, 'unknown') AS job_name,
            COUNT(*) AS run_count
        FROM system.lakeflow.job_run_timeline t
        LEFT JOIN ({LATEST_JOB_NAMES}
        ) j ON t.workspace_id = j.workspace_id AND t.job_id = j.job_id
        WHERE t.period_start_time >= current_timestamp() - INTERVAL {interval}
        GROUP BY t.workspace_id, t.job_id, j.name"
    )
}

pub fn build_job_run_status_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            t.workspace_id,
            t.job_id,
            COALESCE(j.name, 'unknown') AS job_name,
            t.result_state AS status,
            COUNT(*) AS run_count
        FROM system.lakeflow.job_run_timeline t
        LEFT JOIN ({LATEST_JOB_NAMES}
        ) j ON t.workspace_id = j.workspace_id AND t.job_id = j.job_id
        WHERE t.period_start_time >= current_timestamp() - INTERVAL {interval}
            AND t.result_state IS NOT NULL
        GROUP BY t.workspace_id, t.job_id, j.name, t.result_state"
    )
}

/// Finished runs of the lookback window with their duration in whole seconds.
fn job_run_durations(interval: &str) -> String {
    format!(
        "
            SELECT
                t.workspace_id,
                t.job_id,
                COALESCE(j.name, 'unknown') AS job_name,
                unix_timestamp(t.period_end_time) - unix_timestamp(t.period_start_time) AS duration_seconds
            FROM system.lakeflow.job_run_timeline t
            LEFT JOIN ({LATEST_JOB_NAMES}
            ) j ON t.workspace_id = j.workspace_id AND t.job_id = j.job_id
            WHERE t.period_start_time >= current_timestamp() - INTERVAL {interval}
                AND t.period_end_time IS NOT NULL
                AND t.period_end_time > t.period_start_time"
    )
}

/// Columns: workspace_id, job_id, job_name, p50, p95, p99.
pub fn build_job_run_duration_query(lookback: Duration) -> String {
    let runs = job_run_durations(&duration_to_sql_interval(lookback));
    format!(
        "
        SELECT
            workspace_id,
            job_id,
            job_name,
            percentile_approx(duration_seconds, 0.5) AS p50,
            percentile_approx(duration_seconds, 0.95) AS p95,
            percentile_approx(duration_seconds, 0.99) AS p99
        FROM ({runs}
        )
        GROUP BY workspace_id, job_id, job_name"
    )
}

/// A retry is a second run of the same task key within one job run.
pub fn build_task_retries_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            t.workspace_id,
            t.job_id,
            COALESCE(j.name, 'unknown') AS job_name,
            t.task_key,
            COUNT(*) - COUNT(DISTINCT CONCAT(t.job_run_id, '-', t.task_key)) AS retry_count
        FROM system.lakeflow.job_task_run_timeline t
        LEFT JOIN ({LATEST_JOB_NAMES}
        ) j ON t.workspace_id = j.workspace_id AND t.job_id = j.job_id
        WHERE t.period_start_time >= current_timestamp() - INTERVAL {interval}
            AND t.job_run_id IS NOT NULL
        GROUP BY t.workspace_id, t.job_id, j.name, t.task_key
        HAVING COUNT(*) > COUNT(DISTINCT CONCAT(t.job_run_id, '-', t.task_key))"
    )
}

/// Runs longer than `threshold_seconds`, counted per job. The threshold is applied server side.
pub fn build_job_sla_miss_query(lookback: Duration, threshold_seconds: u64) -> String {
    let runs = job_run_durations(&duration_to_sql_interval(lookback));
    format!(
        "
        SELECT
            workspace_id,
            job_id,
            job_name,
            COUNT(*) AS sla_miss_count
        FROM ({runs}
        )
        WHERE duration_seconds > {threshold_seconds}
        GROUP BY workspace_id, job_id, job_name"
    )
}

// ===== Pipelines =====

pub fn build_pipeline_runs_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            t.workspace_id,
            t.pipeline_id,
            COALESCE(p.name, 'unknown') AS pipeline_name,
            COUNT(*) AS run_count
        FROM system.lakeflow.pipeline_update_timeline t
        LEFT JOIN ({LATEST_PIPELINE_NAMES}
        ) p ON t.workspace_id = p.workspace_id AND t.pipeline_id = p.pipeline_id
        WHERE t.period_start_time >= current_timestamp() - INTERVAL {interval}
        GROUP BY t.workspace_id, t.pipeline_id, p.name"
    )
}

pub fn build_pipeline_run_status_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            t.workspace_id,
            t.pipeline_id,
            COALESCE(p.name, 'unknown') AS pipeline_name,
            t.result_state AS status,
            COUNT(*) AS run_count
        FROM system.lakeflow.pipeline_update_timeline t
        LEFT JOIN ({LATEST_PIPELINE_NAMES}
        ) p ON t.workspace_id = p.workspace_id AND t.pipeline_id = p.pipeline_id
        WHERE t.period_start_time >= current_timestamp() - INTERVAL {interval}
            AND t.result_state IS NOT NULL
        GROUP BY t.workspace_id, t.pipeline_id, p.name, t.result_state"
    )
}

/// Columns: workspace_id, pipeline_id, pipeline_name, p50, p95, p99.
pub fn build_pipeline_run_duration_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            workspace_id,
            pipeline_id,
            pipeline_name,
            percentile_approx(duration_seconds, 0.5) AS p50,
            percentile_approx(duration_seconds, 0.95) AS p95,
            percentile_approx(duration_seconds, 0.99) AS p99
        FROM (
            SELECT
                t.workspace_id,
                t.pipeline_id,
                COALESCE(p.name, 'unknown') AS pipeline_name,
                unix_timestamp(t.period_end_time) - unix_timestamp(t.period_start_time) AS duration_seconds
            FROM system.lakeflow.pipeline_update_timeline t
            LEFT JOIN ({LATEST_PIPELINE_NAMES}
            ) p ON t.workspace_id = p.workspace_id AND t.pipeline_id = p.pipeline_id
            WHERE t.period_start_time >= current_timestamp() - INTERVAL {interval}
                AND t.period_end_time IS NOT NULL
                AND t.period_end_time > t.period_start_time
        )
        GROUP BY workspace_id, pipeline_id, pipeline_name"
    )
}

/// More rows than distinct update ids for a pipeline means some updates were retried.
pub fn build_pipeline_retry_events_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            t.workspace_id,
            t.pipeline_id,
            COALESCE(p.name, 'unknown') AS pipeline_name,
            COUNT(*) - COUNT(DISTINCT t.update_id) AS retry_count
        FROM system.lakeflow.pipeline_update_timeline t
        LEFT JOIN ({LATEST_PIPELINE_NAMES}
        ) p ON t.workspace_id = p.workspace_id AND t.pipeline_id = p.pipeline_id
        WHERE t.period_start_time >= current_timestamp() - INTERVAL {interval}
        GROUP BY t.workspace_id, t.pipeline_id, p.name
        HAVING COUNT(*) > COUNT(DISTINCT t.update_id)"
    )
}

pub fn build_pipeline_freshness_lag_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            t.workspace_id,
            t.pipeline_id,
            COALESCE(p.name, 'unknown') AS pipeline_name,
            AVG(unix_timestamp(current_timestamp()) - unix_timestamp(t.period_end_time)) AS freshness_lag_seconds
        FROM system.lakeflow.pipeline_update_timeline t
        LEFT JOIN ({LATEST_PIPELINE_NAMES}
        ) p ON t.workspace_id = p.workspace_id AND t.pipeline_id = p.pipeline_id
        WHERE t.period_start_time >= current_timestamp() - INTERVAL {interval}
            AND t.period_end_time IS NOT NULL
            AND t.result_state = 'COMPLETED'
        GROUP BY t.workspace_id, t.pipeline_id, p.name"
    )
}

// ===== SQL warehouses =====

pub fn build_queries_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            workspace_id,
            COALESCE(compute.warehouse_id, 'unknown') AS warehouse_id,
            COUNT(*) AS query_count
        FROM system.query.history
        WHERE start_time >= current_timestamp() - INTERVAL {interval}
        GROUP BY workspace_id, compute.warehouse_id"
    )
}

pub fn build_query_errors_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            workspace_id,
            COALESCE(compute.warehouse_id, 'unknown') AS warehouse_id,
            COUNT(*) AS error_count
        FROM system.query.history
        WHERE start_time >= current_timestamp() - INTERVAL {interval}
            AND error_message IS NOT NULL
        GROUP BY workspace_id, compute.warehouse_id"
    )
}

/// Columns: workspace_id, warehouse_id, p50, p95, p99 (seconds).
pub fn build_query_duration_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            workspace_id,
            warehouse_id,
            percentile_approx(duration_seconds, 0.5) AS p50,
            percentile_approx(duration_seconds, 0.95) AS p95,
            percentile_approx(duration_seconds, 0.99) AS p99
        FROM (
            SELECT
                workspace_id,
                COALESCE(compute.warehouse_id, 'unknown') AS warehouse_id,
                total_duration_ms / 1000.0 AS duration_seconds
            FROM system.query.history
            WHERE start_time >= current_timestamp() - INTERVAL {interval}
                AND total_duration_ms IS NOT NULL
                AND total_duration_ms > 0
        )
        GROUP BY workspace_id, warehouse_id"
    )
}

/// Peak overlap of query intervals per warehouse, an estimate of concurrency.
pub fn build_queries_running_query(lookback: Duration) -> String {
    let interval = duration_to_sql_interval(lookback);
    format!(
        "
        SELECT
            workspace_id,
            warehouse_id,
            MAX(concurrent_count) AS max_concurrent
        FROM (
            SELECT
                q1.workspace_id,
                COALESCE(q1.compute.warehouse_id, 'unknown') AS warehouse_id,
                q1.start_time AS time_point,
                COUNT(*) AS concurrent_count
            FROM system.query.history q1
            JOIN system.query.history q2
                ON q1.workspace_id = q2.workspace_id
                AND COALESCE(q1.compute.warehouse_id, 'unknown') = COALESCE(q2.compute.warehouse_id, 'unknown')
                AND q2.start_time <= q1.start_time
                AND (q2.end_time >= q1.start_time OR q2.end_time IS NULL)
            WHERE q1.start_time >= current_timestamp() - INTERVAL {interval}
            GROUP BY q1.workspace_id, q1.compute.warehouse_id, q1.start_time
        )
        GROUP BY workspace_id, warehouse_id"
    )
}

//! Scripted stand-ins for the warehouse, shared by the unit tests of this crate.

use crate::{
    collectors::ScrapeContext,
    metrics::{
        Metric,
        MetricSink,
        Observation,
    },
    warehouse::{
        Connector,
        ResultSet,
        Row,
        Warehouse,
        WarehouseError,
    },
};
use databricks_exporter_config::Config;
use futures::{
    future::BoxFuture,
    FutureExt as _,
};
use std::{
    sync::{
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
        Arc,
        Mutex,
    },
    time::Duration,
};

enum Reply {
    Rows(Vec<Vec<Option<String>>>),
    Fail(String),
}

/// Script and counters shared by every session a [`FakeConnector`] hands out.
///
/// Replies are chosen by the first registered SQL substring that matches; unmatched queries return no rows.
#[derive(Default)]
pub struct FakeWarehouse {
    replies: Mutex<Vec<(String, Reply)>>,
    delays: Mutex<Vec<(String, Duration)>>,
    executed: Mutex<Vec<String>>,
    pings: AtomicUsize,
    closes: AtomicUsize,
    cancels: AtomicUsize,
    cancel_delay: Mutex<Duration>,
    fail_pings: AtomicBool,
    hang_pings: AtomicBool,
}

impl FakeWarehouse {
    pub fn respond(&self, pattern: &str, rows: Vec<Vec<Option<&str>>>) {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|value| value.map(str::to_string)).collect())
            .collect();
        self.replies.lock().unwrap().push((pattern.to_string(), Reply::Rows(rows)));
    }

    pub fn fail(&self, pattern: &str, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push((pattern.to_string(), Reply::Fail(message.to_string())));
    }

    /// Drops every scripted reply for `pattern`.
    pub fn clear(&self, pattern: &str) {
        self.replies.lock().unwrap().retain(|(p, _)| p != pattern);
    }

    pub fn slow(&self, pattern: &str, delay: Duration) {
        self.delays.lock().unwrap().push((pattern.to_string(), delay));
    }

    /// How long a timed out query spends cancelling its statement before it returns.
    pub fn cancel_takes(&self, delay: Duration) {
        *self.cancel_delay.lock().unwrap() = delay;
    }

    /// Queries that ran out of time and cancelled their statement.
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn fail_pings(&self, fail: bool) {
        self.fail_pings.store(fail, Ordering::SeqCst);
    }

    pub fn hang_pings(&self, hang: bool) {
        self.hang_pings.store(hang, Ordering::SeqCst);
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// How many executed statements contain `pattern`.
    pub fn executed_matching(&self, pattern: &str) -> usize {
        self.executed.lock().unwrap().iter().filter(|sql| sql.contains(pattern)).count()
    }

    fn delay_for(&self, sql: &str) -> Duration {
        self.delays
            .lock()
            .unwrap()
            .iter()
            .filter(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, delay)| *delay)
            .max()
            .unwrap_or_default()
    }

    fn reply_for(&self, sql: &str) -> Result<ResultSet, WarehouseError> {
        let replies = self.replies.lock().unwrap();
        match replies.iter().find(|(pattern, _)| sql.contains(pattern.as_str())) {
            Some((_, Reply::Rows(rows))) => Ok(ResultSet {
                rows: rows.iter().cloned().map(Row::new).collect(),
            }),
            Some((_, Reply::Fail(message))) => Err(statement_error(message)),
            None => Ok(ResultSet::default()),
        }
    }
}

pub fn statement_error(message: &str) -> WarehouseError {
    WarehouseError::Statement {
        state: "FAILED".to_string(),
        code: "BAD_REQUEST".to_string(),
        message: message.to_string(),
    }
}

struct FakeSession {
    script: Arc<FakeWarehouse>,
    closed: AtomicBool,
}

impl Warehouse for FakeSession {
    fn ping(&self, timeout: Duration) -> BoxFuture<'_, Result<(), WarehouseError>> {
        async move {
            self.script.pings.fetch_add(1, Ordering::SeqCst);
            if self.script.hang_pings.load(Ordering::SeqCst) {
                tokio::time::sleep(timeout * 10).await;
            }
            if self.script.fail_pings.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
                return Err(WarehouseError::Closed);
            }
            Ok(())
        }
        .boxed()
    }

    fn query<'a>(&'a self, sql: &'a str, timeout: Duration) -> BoxFuture<'a, Result<ResultSet, WarehouseError>> {
        async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(WarehouseError::Closed);
            }
            self.script.executed.lock().unwrap().push(sql.to_string());
            let delay = self.script.delay_for(sql);
            if tokio::time::timeout(timeout, tokio::time::sleep(delay)).await.is_err() {
                let cancel_delay = *self.script.cancel_delay.lock().unwrap();
                tokio::time::sleep(cancel_delay).await;
                self.script.cancels.fetch_add(1, Ordering::SeqCst);
                return Err(WarehouseError::Timeout(timeout));
            }
            self.script.reply_for(sql)
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.script.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
        .boxed()
    }
}

/// Hands out a fresh session per connect, all driven by the same [`FakeWarehouse`] script.
#[derive(Default)]
pub struct FakeConnector {
    script: Arc<FakeWarehouse>,
    connects: AtomicUsize,
    fail_connects: AtomicBool,
}

impl FakeConnector {
    pub fn warehouse(&self) -> &FakeWarehouse {
        &self.script
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Connection attempts, failed ones included.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }

    /// A session outside of any connection manager, for driving collectors directly.
    pub fn session(&self) -> Arc<dyn Warehouse> {
        Arc::new(FakeSession {
            script: Arc::clone(&self.script),
            closed: AtomicBool::new(false),
        })
    }
}

impl Connector for FakeConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn Warehouse>, WarehouseError>> {
        async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connects.load(Ordering::SeqCst) {
                return Err(WarehouseError::Connect("invalid client credentials".to_string()));
            }
            Ok(self.session())
        }
        .boxed()
    }
}

/// Observations of one metric, as `(labels, value)` pairs in emission order.
pub fn series(observations: &[Observation], metric: Metric) -> Vec<(Vec<String>, f64)> {
    observations
        .iter()
        .filter(|o| o.metric == metric)
        .map(|o| (o.labels.clone(), o.value))
        .collect()
}

pub fn labels(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// A scrape context over a fresh fake session with a generous deadline.
pub fn context(connector: &FakeConnector, config: Config, sink: Arc<dyn MetricSink>) -> ScrapeContext {
    ScrapeContext::new(
        connector.session(),
        Arc::new(config),
        sink,
        tokio::time::Instant::now() + Duration::from_secs(300),
    )
}

/// How the mock Statement Execution API answers a statement.
#[derive(Clone)]
pub enum MockStatement {
    /// Succeeds with the given result chunks, linked through `next_chunk_internal_link`.
    Chunks(Vec<Vec<Vec<Option<&'static str>>>>),
    Failed(&'static str),
    /// Never leaves `RUNNING` until cancelled.
    Running,
}

/// A local HTTP server speaking the parts of the Databricks OAuth and Statement Execution APIs the driver uses.
///
/// Statements are answered by the first registered SQL substring that matches, otherwise they keep running.
#[derive(Default)]
pub struct StatementApi {
    script: Mutex<Vec<(String, MockStatement)>>,
    statements: Mutex<Vec<(String, MockStatement)>>,
    cancelled: Mutex<Vec<String>>,
    tokens: AtomicUsize,
}

impl StatementApi {
    pub fn answer(&self, pattern: &str, statement: MockStatement) {
        self.script.lock().unwrap().push((pattern.to_string(), statement));
    }

    /// Submitted statements, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.statements.lock().unwrap().iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Ids of cancelled statements.
    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn tokens(&self) -> usize {
        self.tokens.load(Ordering::SeqCst)
    }

    /// Serves the API on an ephemeral local port and returns a config pointing at it.
    pub async fn serve(self: &Arc<Self>) -> Config {
        use axum::{
            routing::{
                get,
                post,
            },
            Router,
        };

        let router = Router::new()
            .route("/oidc/v1/token", post(mock_api::token))
            .route("/api/2.0/sql/statements/", post(mock_api::submit))
            .route("/api/2.0/sql/statements/{id}", get(mock_api::status))
            .route("/api/2.0/sql/statements/{id}/cancel", post(mock_api::cancel))
            .route("/api/2.0/sql/statements/{id}/result/chunks/{index}", get(mock_api::chunk))
            .with_state(Arc::clone(self));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        Config {
            server_hostname: format!("http://{address}"),
            warehouse_http_path: "/sql/1.0/warehouses/wh-1".to_string(),
            client_id: "exporter".to_string(),
            client_secret: "secret".to_string(),
            ..Config::default()
        }
    }

    fn statement(&self, id: &str) -> Option<MockStatement> {
        let index: usize = id.strip_prefix("stmt-")?.parse().ok()?;
        let statements = self.statements.lock().unwrap();
        statements.get(index).map(|(_, statement)| statement.clone())
    }
}

mod mock_api {
    use super::*;
    use axum::{
        extract::{
            Path,
            State,
        },
        http::StatusCode,
        Json,
    };
    use serde_json::{
        json,
        Value,
    };

    pub async fn token(State(api): State<Arc<StatementApi>>) -> Json<Value> {
        api.tokens.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "access_token": "token", "expires_in": 3600 }))
    }

    pub async fn submit(State(api): State<Arc<StatementApi>>, Json(body): Json<Value>) -> Json<Value> {
        let sql = body["statement"].as_str().unwrap_or_default().to_string();
        let statement = api
            .script
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, statement)| statement.clone())
            .unwrap_or(MockStatement::Running);
        let id = {
            let mut statements = api.statements.lock().unwrap();
            statements.push((sql, statement.clone()));
            format!("stmt-{}", statements.len() - 1)
        };
        Json(response(&api, &id, &statement))
    }

    pub async fn status(State(api): State<Arc<StatementApi>>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
        let statement = api.statement(&id).ok_or(StatusCode::NOT_FOUND)?;
        Ok(Json(response(&api, &id, &statement)))
    }

    pub async fn cancel(State(api): State<Arc<StatementApi>>, Path(id): Path<String>) -> Json<Value> {
        api.cancelled.lock().unwrap().push(id);
        Json(json!({}))
    }

    pub async fn chunk(
        State(api): State<Arc<StatementApi>>,
        Path((id, index)): Path<(String, usize)>,
    ) -> Result<Json<Value>, StatusCode> {
        match api.statement(&id) {
            Some(MockStatement::Chunks(chunks)) if index < chunks.len() => Ok(Json(chunk_json(&id, &chunks, index))),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    fn chunk_json(id: &str, chunks: &[Vec<Vec<Option<&str>>>], index: usize) -> Value {
        let next = (index + 1 < chunks.len()).then(|| format!("/api/2.0/sql/statements/{id}/result/chunks/{}", index + 1));
        json!({ "data_array": chunks[index], "next_chunk_internal_link": next })
    }

    fn response(api: &StatementApi, id: &str, statement: &MockStatement) -> Value {
        match statement {
            MockStatement::Chunks(chunks) => json!({
                "statement_id": id,
                "status": { "state": "SUCCEEDED" },
                "result": chunk_json(id, chunks, 0),
            }),
            MockStatement::Failed(message) => json!({
                "statement_id": id,
                "status": { "state": "FAILED", "error": { "error_code": "BAD_REQUEST", "message": message } },
            }),
            MockStatement::Running => {
                let state = if api.cancelled.lock().unwrap().iter().any(|c| c == id) { "CANCELED" } else { "RUNNING" };
                json!({ "statement_id": id, "status": { "state": state } })
            }
        }
    }
}

use super::{
    Connector,
    ResultSet,
    Row,
    Warehouse,
    WarehouseError,
};
use chrono::{
    DateTime,
    TimeDelta,
    Utc,
};
use databricks_exporter_config::Config;
use futures::{
    future::BoxFuture,
    FutureExt as _,
};
use reqwest::{
    Client,
    Response,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::Mutex,
    time::Instant,
};
use url::Url;

const TOKEN_PATH: &str = "oidc/v1/token";
const STATEMENTS_PATH: &str = "api/2.0/sql/statements/";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Tokens are refreshed this many seconds before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Cancellation runs after the caller's deadline, so it gets its own bound.
pub const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens sessions against the SQL warehouse named in the config, authenticating as a service principal.
#[derive(Debug, Clone)]
pub struct DatabricksConnector {
    config: Arc<Config>,
    http: Client,
}

impl DatabricksConnector {
    pub fn new(config: Arc<Config>) -> Result<Self, WarehouseError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("databricks-exporter/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, http })
    }

    fn base_url(&self) -> Result<Url, WarehouseError> {
        let host = self.config.server_hostname.trim().trim_end_matches('/');
        let raw = if host.starts_with("https://") || host.starts_with("http://") {
            format!("{host}/")
        } else {
            format!("https://{host}/")
        };
        Url::parse(&raw).map_err(|e| WarehouseError::Connect(format!("invalid server hostname {host:?}: {e}")))
    }
}

impl Connector for DatabricksConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn Warehouse>, WarehouseError>> {
        async move {
            let base_url = self.base_url()?;
            let warehouse_id = self.config.warehouse_id().to_string();
            if warehouse_id.is_empty() {
                return Err(WarehouseError::Connect(format!(
                    "no warehouse id in http path {:?}",
                    self.config.warehouse_http_path
                )));
            }

            let warehouse = DatabricksWarehouse {
                http: self.http.clone(),
                base_url,
                warehouse_id,
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                token: Mutex::new(None),
                closed: AtomicBool::new(false),
            };
            // Fail fast on bad credentials instead of on the first query.
            warehouse.access_token().await?;
            info!(warehouse_id = %warehouse.warehouse_id, host = %warehouse.base_url, "Connected to Databricks");

            Ok(Arc::new(warehouse) as Arc<dyn Warehouse>)
        }
        .boxed()
    }
}

struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct DatabricksWarehouse {
    http: Client,
    base_url: Url,
    warehouse_id: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AccessToken>>,
    closed: AtomicBool,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Serialize)]
struct StatementRequest<'a> {
    warehouse_id: &'a str,
    statement: &'a str,
    wait_timeout: String,
    on_wait_timeout: &'static str,
    format: &'static str,
    disposition: &'static str,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: String,
    status: StatementStatus,
    #[serde(default)]
    result: Option<ResultData>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultData {
    #[serde(default)]
    data_array: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    next_chunk_internal_link: Option<String>,
}

impl DatabricksWarehouse {
    async fn access_token(&self) -> Result<String, WarehouseError> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if Utc::now() + TimeDelta::seconds(TOKEN_REFRESH_MARGIN_SECS) < current.expires_at {
                return Ok(current.value.clone());
            }
        }

        debug!("Requesting OAuth access token");
        let url = self.url(TOKEN_PATH)?;
        let response = self
            .http
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", "all-apis")])
            .send()
            .await
            .map_err(|e| WarehouseError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Auth {
                status: status.as_u16(),
                message,
            });
        }

        let body: TokenResponse = response.json().await?;
        let value = body.access_token;
        *token = Some(AccessToken {
            value: value.clone(),
            expires_at: Utc::now() + TimeDelta::seconds(body.expires_in),
        });
        Ok(value)
    }

    fn url(&self, path: &str) -> Result<Url, WarehouseError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| WarehouseError::Decode(format!("invalid API path {path:?}: {e}")))
    }

    async fn checked<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, WarehouseError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(WarehouseError::Auth {
                status: status.as_u16(),
                message: body,
            });
        }
        let error: ApiError = serde_json::from_str(&body).unwrap_or_default();
        Err(WarehouseError::Statement {
            state: format!("HTTP {}", status.as_u16()),
            code: error.error_code.unwrap_or_else(|| "UNKNOWN".to_string()),
            message: error.message.unwrap_or(body),
        })
    }

    async fn submit(&self, sql: &str, remaining: Duration) -> Result<StatementResponse, WarehouseError> {
        let token = self.access_token().await?;
        let request = StatementRequest {
            warehouse_id: &self.warehouse_id,
            statement: sql,
            wait_timeout: wait_timeout(remaining),
            on_wait_timeout: "CONTINUE",
            format: "JSON_ARRAY",
            disposition: "INLINE",
        };
        let response = self
            .http
            .post(self.url(STATEMENTS_PATH)?)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;
        Self::checked(response).await
    }

    async fn poll(&self, statement_id: &str) -> Result<StatementResponse, WarehouseError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.url(&format!("{STATEMENTS_PATH}{statement_id}"))?)
            .bearer_auth(token)
            .send()
            .await?;
        Self::checked(response).await
    }

    async fn fetch_chunk(&self, link: &str) -> Result<ResultData, WarehouseError> {
        let token = self.access_token().await?;
        let response = self.http.get(self.url(link)?).bearer_auth(token).send().await?;
        Self::checked(response).await
    }

    async fn cancel(&self, statement_id: &str) {
        let request = async {
            let token = self.access_token().await?;
            self.http
                .post(self.url(&format!("{STATEMENTS_PATH}{statement_id}/cancel"))?)
                .bearer_auth(token)
                .send()
                .await?
                .error_for_status()?;
            Ok::<_, WarehouseError>(())
        };
        match tokio::time::timeout(CANCEL_TIMEOUT, request).await {
            Ok(Ok(())) => debug!(statement_id, "Cancelled statement"),
            Ok(Err(e)) => debug!(statement_id, error = %e, "Failed to cancel statement"),
            Err(_) => debug!(statement_id, "Timed out cancelling statement"),
        }
    }

    /// Runs `sql` to completion, cancelling it server side if `timeout` runs out first.
    #[instrument(level = "debug", skip(self, sql), fields(warehouse_id = %self.warehouse_id))]
    async fn execute(&self, sql: &str, timeout: Duration) -> Result<ResultSet, WarehouseError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WarehouseError::Closed);
        }
        let deadline = Instant::now() + timeout;

        let mut statement = tokio::time::timeout_at(deadline, self.submit(sql, timeout))
            .await
            .map_err(|_| WarehouseError::Timeout(timeout))??;

        while matches!(statement.status.state.as_str(), "PENDING" | "RUNNING") {
            let statement_id = statement.statement_id.clone();
            let polled = tokio::time::timeout_at(deadline, async {
                tokio::time::sleep(POLL_INTERVAL).await;
                self.poll(&statement_id).await
            })
            .await;
            statement = match polled {
                Ok(result) => result?,
                Err(_) => {
                    self.cancel(&statement_id).await;
                    return Err(WarehouseError::Timeout(timeout));
                }
            };
        }

        if statement.status.state != "SUCCEEDED" {
            let error = statement.status.error.unwrap_or_default();
            return Err(WarehouseError::Statement {
                state: statement.status.state,
                code: error.error_code.unwrap_or_else(|| "UNKNOWN".to_string()),
                message: error.message.unwrap_or_default(),
            });
        }

        let mut rows = Vec::new();
        let mut chunk = statement.result.unwrap_or_default();
        loop {
            rows.extend(chunk.data_array.take().unwrap_or_default().into_iter().map(Row::new));
            let Some(link) = chunk.next_chunk_internal_link.take() else {
                break;
            };
            chunk = match tokio::time::timeout_at(deadline, self.fetch_chunk(&link)).await {
                Ok(result) => result?,
                Err(_) => return Err(WarehouseError::Timeout(timeout)),
            };
        }

        debug!(rows = rows.len(), "Statement succeeded");
        Ok(ResultSet { rows })
    }
}

/// The API accepts `0s` (return immediately) or 5 to 50 seconds of synchronous wait.
fn wait_timeout(remaining: Duration) -> String {
    match remaining.as_secs() {
        0..=4 => "0s".to_string(),
        secs => format!("{}s", secs.min(50)),
    }
}

impl Warehouse for DatabricksWarehouse {
    fn ping(&self, timeout: Duration) -> BoxFuture<'_, Result<(), WarehouseError>> {
        async move { self.execute("SELECT 1", timeout).await.map(|_| ()) }.boxed()
    }

    fn query<'a>(&'a self, sql: &'a str, timeout: Duration) -> BoxFuture<'a, Result<ResultSet, WarehouseError>> {
        self.execute(sql, timeout).boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            if !self.closed.swap(true, Ordering::AcqRel) {
                self.token.lock().await.take();
                debug!(warehouse_id = %self.warehouse_id, "Closed Databricks session");
            }
        }
        .boxed()
    }
}

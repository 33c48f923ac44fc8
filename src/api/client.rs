use super::types::{Envelope, extract_token};
use super::{
    DAILY_PATH, LOGIN_PATH, REALTIME_PATH, SETTINGS_READ_PATH, SETTINGS_UPDATE_PATH,
    STATISTICS_PATH, VendorApi,
};
use crate::config::AccountConfig;
use crate::error::{BridgeError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{Value, json};

/// First day the statistics endpoint is asked about
const STATISTICS_BEGIN_DATE: &str = "2020-01-01";

/// reqwest-backed client for the Byte-Watt cloud
pub struct ByteWattClient {
    http: reqwest::Client,
    base_url: String,
    station_id: String,
    logger: StructuredLogger,
}

impl ByteWattClient {
    pub fn new(account: &AccountConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(account.request_timeout())
            .user_agent(concat!("bytewatt-bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let logger = get_logger_with_context(
            LogContext::new("api").with_account(&account.username),
        );
        Ok(Self {
            http,
            base_url: account.base_url.trim_end_matches('/').to_string(),
            station_id: account.station_id.clone(),
            logger,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn vendor_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            HeaderName::from_static("language"),
            HeaderValue::from_static("en-US"),
        );
        headers.insert(
            HeaderName::from_static("platform"),
            HeaderValue::from_static("AK9D8H"),
        );
        headers.insert(
            HeaderName::from_static("system"),
            HeaderValue::from_static("alphacloud"),
        );
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        if let Ok(v) = HeaderValue::from_str(&now) {
            headers.insert(HeaderName::from_static("operationdate"), v);
        }
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", token)) {
            headers.insert(AUTHORIZATION, v);
        }
        headers
    }

    fn today() -> String {
        chrono::Local::now().format("%Y-%m-%d").to_string()
    }

    /// Send a request and unwrap the vendor envelope
    async fn execute(&self, what: &str, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        self.logger
            .debug(&format!("{} response status: {}", what, status));

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(BridgeError::auth(format!(
                    "{} rejected with HTTP {}",
                    what, status
                )));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(BridgeError::network(format!(
                    "{} rate limited (HTTP 429)",
                    what
                )));
            }
            s if s.is_server_error() => {
                return Err(BridgeError::network(format!(
                    "{} failed with HTTP {}",
                    what, s
                )));
            }
            s if !s.is_success() => {
                return Err(BridgeError::api(format!(
                    "{} failed with HTTP {}",
                    what, s
                )));
            }
            _ => {}
        }

        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| BridgeError::data(format!("{} returned invalid JSON: {}", what, e)))?;
        Envelope::from_value(body).into_data()
    }

    async fn get_data(
        &self,
        what: &str,
        token: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Value> {
        let request = self
            .http
            .get(self.url(path))
            .headers(Self::vendor_headers(token))
            .query(query);
        self.execute(what, request).await
    }

    async fn login_attempt(&self, request: RequestBuilder) -> Result<String> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BridgeError::network(format!(
                "Login failed with HTTP {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(BridgeError::auth(format!(
                "Login failed with HTTP {}",
                status
            )));
        }

        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| BridgeError::auth(format!("Login returned invalid JSON: {}", e)))?;

        let token = extract_token(&body);
        let envelope = Envelope::from_value(body);
        if !envelope.is_success() {
            // Credentials problems come back as vendor codes; only 9007 is worth retrying
            return match envelope.into_data() {
                Err(e) if e.is_transient() => Err(e),
                Err(e) => Err(BridgeError::auth(format!("Login rejected: {}", e))),
                Ok(_) => Err(BridgeError::auth("Login rejected")),
            };
        }
        token.ok_or_else(|| BridgeError::auth("No token found in login response"))
    }
}

#[async_trait::async_trait]
impl VendorApi for ByteWattClient {
    async fn login(&self, username: &str, password: &str) -> Result<String> {
        self.logger.debug("Logging in with JSON credentials");
        let json_request = self
            .http
            .post(self.url(LOGIN_PATH))
            .json(&json!({"username": username, "password": password}));

        match self.login_attempt(json_request).await {
            Ok(token) => Ok(token),
            Err(first) => {
                self.logger.debug(&format!(
                    "JSON login failed ({}), retrying with form body",
                    first
                ));
                let form_request = self
                    .http
                    .post(self.url(LOGIN_PATH))
                    .form(&[("username", username), ("password", password)]);
                self.login_attempt(form_request).await
            }
        }
    }

    async fn fetch_realtime(&self, token: &str) -> Result<Value> {
        self.get_data(
            "Realtime power data",
            token,
            REALTIME_PATH,
            &[("sysSn", "All"), ("stationId", self.station_id.as_str())],
        )
        .await
    }

    async fn fetch_statistics(&self, token: &str) -> Result<Value> {
        let today = Self::today();
        self.get_data(
            "Energy statistics",
            token,
            STATISTICS_PATH,
            &[
                ("sysSn", "All"),
                ("stationId", self.station_id.as_str()),
                ("beginDate", STATISTICS_BEGIN_DATE),
                ("endDate", today.as_str()),
            ],
        )
        .await
    }

    async fn fetch_daily(&self, token: &str) -> Result<Value> {
        let today = Self::today();
        self.get_data(
            "Daily summary",
            token,
            DAILY_PATH,
            &[
                ("sn", "All"),
                ("stationId", self.station_id.as_str()),
                ("tday", today.as_str()),
            ],
        )
        .await
    }

    async fn fetch_settings(&self, token: &str) -> Result<Value> {
        self.get_data("Charge settings", token, SETTINGS_READ_PATH, &[("id", "")])
            .await
    }

    async fn update_settings(&self, token: &str, payload: &Value) -> Result<()> {
        let request = self
            .http
            .put(self.url(SETTINGS_UPDATE_PATH))
            .headers(Self::vendor_headers(token))
            .json(payload);
        self.execute("Charge settings update", request).await?;
        Ok(())
    }
}

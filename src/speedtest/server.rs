use crate::error::{Result, SpeedTestError};
use crate::speedtest::ping::PingWindow;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration a server publishes from `/test/service-data`.
///
/// Kept as the raw JSON object; the accessors read the keys known servers
/// publish and return `None` when a key is absent or not a non-negative
/// integer.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceData(Value);

impl ServiceData {
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// How long the client keeps draining a download.
    pub fn time_limit(&self) -> Option<Duration> {
        self.0.get("time_limit")?.as_u64().map(Duration::from_millis)
    }

    pub fn max_bytes(&self) -> Option<u64> {
        self.0.get("max")?.as_u64()
    }

    pub fn recommended_download(&self) -> Option<u64> {
        self.0.get("recommendedDownload")?.as_u64()
    }

    pub fn recommended_upload(&self) -> Option<u64> {
        self.0.get("recommendedUpload")?.as_u64()
    }
}

/// HTTP client with the connect timeout every server uses. No overall
/// request timeout: transfers are bounded by the measurement itself.
pub fn http_client() -> Result<Client> {
    Ok(Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?)
}

#[derive(Debug, Deserialize)]
struct ServiceDataResponse {
    #[serde(default)]
    data: Value,
}

// Matches how the servers' web clients treat `data`: null, false, 0 and ""
// mean "not alive"; any object or array counts.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// One remote speed-test server and everything measured against it.
///
/// Measurements take `&mut self`, so calls against a single server are
/// serialized by the borrow checker.
#[derive(Debug)]
pub struct SpeedTestServer {
    address: String,
    name: String,
    alive: bool,
    ping: PingWindow,
    service_data: Option<ServiceData>,
    client: Client,
}

impl SpeedTestServer {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        Self::with_client(http_client()?, address, name)
    }

    /// Builds a server that shares an existing HTTP client (and its
    /// connection pool) with other servers.
    pub fn with_client(
        client: Client,
        address: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let address = address.into().trim_end_matches('/').to_string();
        let url = Url::parse(&address).map_err(|e| SpeedTestError::InvalidAddress(format!("{address}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SpeedTestError::InvalidAddress(format!(
                "{address}: unsupported scheme {}",
                url.scheme()
            )));
        }

        Ok(Self {
            address,
            name: name.into(),
            alive: false,
            ping: PingWindow::new(),
            service_data: None,
            client,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn service_data(&self) -> Option<&ServiceData> {
        self.service_data.as_ref()
    }

    pub fn ping(&self) -> &PingWindow {
        &self.ping
    }

    pub(crate) fn ping_mut(&mut self) -> &mut PingWindow {
        &mut self.ping
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/test/{}", self.address, path)
    }

    /// Confirms the server is up and fetches its service data.
    ///
    /// Once alive, further calls return immediately without touching the
    /// network. Failures are logged and leave the server untouched, so the
    /// caller can simply probe again. Returns whether the server is alive.
    pub async fn probe(&mut self) -> bool {
        if self.alive {
            return true;
        }

        info!(server = %self.name, op = "probe", "Probing...");
        match self.fetch_service_data().await {
            Ok(data) => {
                info!(server = %self.name, op = "probe", "Server is alive");
                debug!(server = %self.name, service_data = %data.raw(), "Received service data");
                self.service_data = Some(data);
                self.alive = true;
            }
            Err(e) => {
                info!(server = %self.name, op = "probe", error = %e, "Error whilst probing server");
            }
        }
        self.alive
    }

    async fn fetch_service_data(&self) -> Result<ServiceData> {
        let response = self.client.get(self.endpoint("service-data")).send().await?;
        let body: ServiceDataResponse = response.json().await?;

        if is_truthy(&body.data) {
            Ok(ServiceData::new(body.data))
        } else {
            Err(SpeedTestError::Probe(format!("response carried no data: {}", body.data)))
        }
    }

    /// Caps a transfer size at the server's published `max`, which servers
    /// enforce by rejecting larger requests outright.
    pub(crate) fn clamp_to_max(&self, op: &str, requested: u64) -> u64 {
        match self.service_data().and_then(ServiceData::max_bytes) {
            Some(max) if requested > max => {
                warn!(server = %self.name, op, requested, max, "Requested size exceeds the server maximum, clamping");
                max
            }
            _ => requested,
        }
    }

    pub(crate) fn require_service_data(&self) -> Result<&ServiceData> {
        self.service_data.as_ref().ok_or_else(|| SpeedTestError::NotProbed {
            server: self.name.clone(),
        })
    }
}

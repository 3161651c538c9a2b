//! HTTP client for the upstream inventory service (`spec.md` §6),
//! grounded on `netbox/netbox.go`'s `Client`/`IsAvailable`.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::GatekeeperError;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);
const REQUIRED_NETBOX_VERSION: &str = "4.3.2";

/// Versions pinned for each app the Core depends on being installed in
/// the upstream instance; mismatches refuse operation (`spec.md` §6).
fn required_apps() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("django_filters", "25.1"),
        ("django_prometheus", "2.3.1"),
        ("django_rq", "3.0.1"),
        ("django_tables2", "2.7.5"),
        ("drf_spectacular", "0.28.0"),
        ("mptt", "0.17.0"),
        ("rest_framework", "3.16.0"),
        ("social_django", "5.4.3"),
        ("taggit", "6.1.0"),
        ("timezone_field", "7.1"),
    ])
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(rename = "netbox-version")]
    netbox_version: String,
    #[serde(rename = "installed-apps")]
    installed_apps: HashMap<String, String>,
}

pub struct NetboxClient {
    host: String,
    token: String,
    http: reqwest::Client,
}

impl NetboxClient {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http: reqwest::Client::builder()
                .timeout(UPSTREAM_TIMEOUT)
                .build()
                .expect("building the upstream HTTP client with a fixed timeout cannot fail"),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.host, endpoint.trim_start_matches('/'))
    }

    pub async fn execute(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Vec<u8>, GatekeeperError> {
        let mut req = self
            .http
            .request(method, self.url(endpoint))
            .header("Authorization", format!("Token {}", self.token));

        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if !status.is_success() {
            return Err(GatekeeperError::Upstream {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(bytes.to_vec())
    }

    /// One-shot startup check: the upstream must report the pinned
    /// NetBox version and every pinned app version, or the Core refuses
    /// to start up its egress path (`spec.md` §6).
    pub async fn verify_upstream(&self) -> Result<(), GatekeeperError> {
        let bytes = self.execute(reqwest::Method::GET, "status/", None).await?;
        let status: StatusResponse =
            serde_json::from_slice(&bytes).map_err(|e| GatekeeperError::Serialize(e.to_string()))?;

        if status.netbox_version != REQUIRED_NETBOX_VERSION {
            return Err(GatekeeperError::VersionMismatch);
        }

        for (app, required_version) in required_apps() {
            match status.installed_apps.get(app) {
                Some(installed) if installed == required_version => {}
                _ => return Err(GatekeeperError::VersionMismatch),
            }
        }

        Ok(())
    }
}

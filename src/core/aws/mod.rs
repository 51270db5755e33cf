//! Minimal signed client for the AWS JSON 1.1 protocol (Athena, Glue) and for plain
//! signed JSON POSTs (Bedrock runtime).

pub mod credentials;
pub mod sigv4;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

pub use credentials::{Credentials, CredentialsProvider};
use sigv4::SigningRequest;

const JSON_11: &str = "application/x-amz-json-1.1";

#[derive(Debug, Error)]
pub enum AwsError {
    /// Connect failures, per-request timeouts, 5xx responses.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("throttled: {0}")]
    Throttled(String),
    /// The service understood the request and refused it.
    #[error("{code}: {message}")]
    Service { code: String, message: String },
    #[error("credentials unavailable: {0}")]
    Credentials(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl AwsError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AwsError::Transport(_) | AwsError::Throttled(_))
    }
}

/// One service endpoint (`athena`, `glue`, `bedrock`) in one region.
#[derive(Clone)]
pub struct AwsClient {
    service: &'static str,
    region: String,
    endpoint: Url,
    credentials: Arc<CredentialsProvider>,
    client: Client,
}

impl AwsClient {
    pub fn new(
        service: &'static str,
        host_prefix: &str,
        region: &str,
        endpoint_override: Option<&str>,
        credentials: Arc<CredentialsProvider>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let endpoint = match endpoint_override {
            Some(custom) => Url::parse(custom)?,
            None => Url::parse(&format!("https://{}.{}.amazonaws.com/", host_prefix, region))?,
        };
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            service,
            region: region.to_string(),
            endpoint,
            credentials,
            client,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// `X-Amz-Target` style call against the endpoint root.
    pub async fn call_json<Req, Res>(&self, target: &str, body: &Req) -> Result<Res, AwsError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let payload =
            serde_json::to_vec(body).map_err(|e| AwsError::Decode(e.to_string()))?;
        let headers = [("content-type", JSON_11), ("x-amz-target", target)];
        let url = self.endpoint.clone();
        let bytes = self.send_signed(url, &headers, payload).await?;
        serde_json::from_slice(&bytes).map_err(|e| AwsError::Decode(e.to_string()))
    }

    /// Signed JSON POST to `path` (segments must already be URI-encoded).
    pub async fn post_json<Req, Res>(&self, path: &str, body: &Req) -> Result<Res, AwsError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let payload =
            serde_json::to_vec(body).map_err(|e| AwsError::Decode(e.to_string()))?;
        let url = self
            .endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|e| AwsError::Decode(e.to_string()))?;
        let headers = [
            ("content-type", "application/json"),
            ("accept", "application/json"),
        ];
        let bytes = self.send_signed(url, &headers, payload).await?;
        serde_json::from_slice(&bytes).map_err(|e| AwsError::Decode(e.to_string()))
    }

    async fn send_signed(
        &self,
        url: Url,
        headers: &[(&str, &str)],
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, AwsError> {
        let creds = self
            .credentials
            .credentials()
            .await
            .map_err(|e| AwsError::Credentials(e.to_string()))?;

        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => return Err(AwsError::Decode(format!("endpoint {} has no host", url))),
        };
        let signed = sigv4::sign(
            &SigningRequest {
                method: "POST",
                host: &host,
                path: url.path(),
                headers,
                payload: &payload,
            },
            &creds,
            &self.region,
            self.service,
            Utc::now(),
        );

        let mut request = self.client.post(url.clone());
        for (k, v) in headers.iter() {
            request = request.header(*k, *v);
        }
        for (k, v) in &signed {
            request = request.header(k.as_str(), v.as_str());
        }

        let res = request
            .body(payload)
            .send()
            .await
            .map_err(|e| AwsError::Transport(e.to_string()))?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| AwsError::Transport(e.to_string()))?;
        if status.is_success() {
            return Ok(bytes.to_vec());
        }
        Err(classify_failure(status.as_u16(), &bytes))
    }
}

/// Maps an error response body (`{"__type": "...#Code", "message": "..."}`) to an [`AwsError`].
pub fn classify_failure(status: u16, body: &[u8]) -> AwsError {
    let parsed: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();
    let code = parsed
        .get("__type")
        .and_then(|v| v.as_str())
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| format!("HTTP{}", status));
    let message = ["message", "Message"]
        .iter()
        .find_map(|k| parsed.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());

    if status == 429 || code == "ThrottlingException" || code == "TooManyRequestsException" {
        AwsError::Throttled(message)
    } else if status >= 500 {
        AwsError::Transport(format!("{} ({}): {}", code, status, message))
    } else {
        AwsError::Service { code, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_keep_code_and_message() {
        let body = br#"{"__type":"com.amazonaws.athena#InvalidRequestException","message":"line 1:8: Column 'foo' cannot be resolved"}"#;
        match classify_failure(400, body) {
            AwsError::Service { code, message } => {
                assert_eq!(code, "InvalidRequestException");
                assert!(message.contains("cannot be resolved"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn throttling_and_server_errors_are_transient() {
        let throttled = classify_failure(400, br#"{"__type":"ThrottlingException","Message":"slow down"}"#);
        assert!(throttled.is_transient());
        assert!(classify_failure(503, b"unavailable").is_transient());
        assert!(!classify_failure(403, br#"{"__type":"AccessDeniedException"}"#).is_transient());
    }

    #[test]
    fn default_endpoint_is_regional() {
        let provider = Arc::new(CredentialsProvider::from_static(Credentials::new("a", "b")));
        let client = AwsClient::new(
            "athena",
            "athena",
            "eu-central-1",
            None,
            provider,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "https://athena.eu-central-1.amazonaws.com/"
        );
    }
}

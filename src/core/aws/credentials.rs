use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

const CONTAINER_CREDENTIALS_HOST: &str = "http://169.254.170.2";
const REFRESH_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expires_at: None,
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(exp) => exp - ChronoDuration::minutes(REFRESH_MARGIN_MINUTES) > now,
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
enum CredentialSource {
    Static(Credentials),
    Environment,
    /// ECS/Fargate task role endpoint.
    Container {
        url: String,
        auth_token: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerCredentialsResponse {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    expiration: Option<DateTime<Utc>>,
}

/// Resolves credentials and caches expiring ones until shortly before they lapse.
pub struct CredentialsProvider {
    source: CredentialSource,
    cached: RwLock<Option<Credentials>>,
    client: Client,
}

impl CredentialsProvider {
    pub fn from_static(creds: Credentials) -> Self {
        Self::with_source(CredentialSource::Static(creds))
    }

    /// Container endpoint when the task environment advertises one, plain
    /// `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY` otherwise.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let auth_token = lookup("AWS_CONTAINER_AUTHORIZATION_TOKEN");
        if let Some(relative) = lookup("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI") {
            info!("Using container credentials endpoint");
            return Self::with_source(CredentialSource::Container {
                url: format!("{}{}", CONTAINER_CREDENTIALS_HOST, relative),
                auth_token,
            });
        }
        if let Some(full) = lookup("AWS_CONTAINER_CREDENTIALS_FULL_URI") {
            info!("Using container credentials endpoint");
            return Self::with_source(CredentialSource::Container {
                url: full,
                auth_token,
            });
        }
        Self::with_source(CredentialSource::Environment)
    }

    fn with_source(source: CredentialSource) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn credentials(&self) -> Result<Credentials> {
        match &self.source {
            CredentialSource::Static(creds) => Ok(creds.clone()),
            CredentialSource::Environment => read_env_credentials(|k| std::env::var(k).ok()),
            CredentialSource::Container { url, auth_token } => {
                let now = Utc::now();
                if let Some(creds) = self.cached.read().await.as_ref()
                    && creds.is_fresh(now)
                {
                    return Ok(creds.clone());
                }
                let mut guard = self.cached.write().await;
                if let Some(creds) = guard.as_ref()
                    && creds.is_fresh(now)
                {
                    return Ok(creds.clone());
                }
                let fresh = self.fetch_container(url, auth_token.as_deref()).await?;
                *guard = Some(fresh.clone());
                Ok(fresh)
            }
        }
    }

    async fn fetch_container(&self, url: &str, auth_token: Option<&str>) -> Result<Credentials> {
        debug!("Refreshing container credentials");
        let mut request = self.client.get(url);
        if let Some(token) = auth_token {
            request = request.header("Authorization", token);
        }
        let res = request.send().await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "container credentials endpoint returned {}",
                res.status()
            ));
        }
        let parsed: ContainerCredentialsResponse = res.json().await?;
        Ok(Credentials {
            access_key_id: parsed.access_key_id,
            secret_access_key: parsed.secret_access_key,
            session_token: parsed.token,
            expires_at: parsed.expiration,
        })
    }
}

fn read_env_credentials<F>(lookup: F) -> Result<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    let access_key_id = lookup("AWS_ACCESS_KEY_ID")
        .ok_or_else(|| anyhow!("AWS_ACCESS_KEY_ID is not set and no container credentials are available"))?;
    let secret_access_key = lookup("AWS_SECRET_ACCESS_KEY")
        .ok_or_else(|| anyhow!("AWS_SECRET_ACCESS_KEY is not set"))?;
    Ok(Credentials {
        access_key_id,
        secret_access_key,
        session_token: lookup("AWS_SESSION_TOKEN").filter(|t| !t.is_empty()),
        expires_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_credentials_require_both_keys() {
        let env: HashMap<&str, &str> = [("AWS_ACCESS_KEY_ID", "AKID")].into_iter().collect();
        let err = read_env_credentials(|k| env.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains("AWS_SECRET_ACCESS_KEY"));
    }

    #[test]
    fn env_credentials_pick_up_session_token() {
        let env: HashMap<&str, &str> = [
            ("AWS_ACCESS_KEY_ID", "AKID"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("AWS_SESSION_TOKEN", "session"),
        ]
        .into_iter()
        .collect();
        let creds = read_env_credentials(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(creds.session_token.as_deref(), Some("session"));
    }

    #[test]
    fn relative_uri_selects_container_source() {
        let provider = CredentialsProvider::from_lookup(|k| {
            (k == "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI").then(|| "/v2/credentials/abc".to_string())
        });
        match provider.source {
            CredentialSource::Container { url, .. } => {
                assert_eq!(url, "http://169.254.170.2/v2/credentials/abc")
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn credentials_near_expiry_are_stale() {
        let now = Utc::now();
        let mut creds = Credentials::new("a", "b");
        assert!(creds.is_fresh(now));
        creds.expires_at = Some(now + ChronoDuration::minutes(2));
        assert!(!creds.is_fresh(now));
        creds.expires_at = Some(now + ChronoDuration::hours(1));
        assert!(creds.is_fresh(now));
    }

    #[tokio::test]
    async fn static_source_returns_given_credentials() {
        let provider = CredentialsProvider::from_static(Credentials::new("AKID", "secret"));
        let creds = provider.credentials().await.unwrap();
        assert_eq!(creds.access_key_id, "AKID");
    }
}

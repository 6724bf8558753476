//! HTTP client for the platform API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::PlatformConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::UserToken;

use super::{PlatformApi, ProjectRegistration};

/// HTTP client for interacting with the platform API.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    client: Client,
    base_url: String,
    vault_user: Option<String>,
    vault_password: Option<String>,
}

impl PlatformClient {
    /// Create a new platform client from configuration.
    pub fn new(config: &PlatformConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
            vault_user: config.vault_user.clone(),
            vault_password: config.vault_password.clone(),
        })
    }

    /// Create a new platform client with a custom base URL and no vault
    /// credentials.
    pub fn with_url(url: impl Into<String>) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_owned(),
            vault_user: None,
            vault_password: None,
        })
    }
}

/// Environment lookup response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvironmentResponse {
    environment_variables: Vec<EnvironmentVariable>,
}

/// One name/value pair from an environment lookup.
#[derive(Debug, Deserialize)]
struct EnvironmentVariable {
    name: String,
    value: String,
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn register_project(
        &self,
        token: &UserToken,
        registration: &ProjectRegistration,
    ) -> ControlResult<()> {
        let url = format!("{}/core/deployment", self.base_url);
        let response = self
            .client
            .put(&url)
            .bearer_auth(token.as_str())
            .json(registration)
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::platform(format!(
                "project registration rejected: {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn resolve_environment(&self, stage: &str) -> ControlResult<HashMap<String, String>> {
        let url = format!(
            "{}/projects/{}/environment-variables/build-machine",
            self.base_url, stage
        );
        let mut request = self.client.get(&url);
        if let Some(user) = &self.vault_user {
            request = request.basic_auth(user, self.vault_password.as_deref());
        }

        let response = request.send().await.map_err(ControlError::Http)?;
        if !response.status().is_success() {
            return Err(ControlError::platform(format!(
                "environment lookup failed: {}",
                response.status()
            )));
        }

        let body: EnvironmentResponse = response.json().await.map_err(ControlError::Http)?;

        // Later duplicates win, matching the order the platform returns.
        let mut vars = HashMap::new();
        for entry in body.environment_variables {
            vars.insert(entry.name, entry.value);
        }
        Ok(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registration() -> ProjectRegistration {
        ProjectRegistration {
            project_name: "my-app".to_owned(),
            region: "us-east-1".to_owned(),
            cloud_provider: "aws".to_owned(),
            stage: "prod".to_owned(),
            stack: vec!["node".to_owned(), "vite".to_owned()],
        }
    }

    #[test]
    fn client_creation() {
        let config = PlatformConfig::default();
        let client = PlatformClient::new(&config);
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn register_puts_record_with_bearer_token() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/core/deployment"))
            .and(header("authorization", "Bearer caller-token"))
            .and(body_json(&registration()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = PlatformClient::with_url(server.uri()).expect("client failed");
        client
            .register_project(&UserToken::new("caller-token"), &registration())
            .await
            .expect("register failed");
    }

    #[tokio::test]
    async fn rejected_registration_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/core/deployment"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = PlatformClient::with_url(server.uri()).expect("client failed");
        let result = client
            .register_project(&UserToken::new("caller-token"), &registration())
            .await;
        assert!(matches!(result, Err(ControlError::Platform(_))));
    }

    #[tokio::test]
    async fn environment_lookup_sends_vault_credentials() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/projects/prod/environment-variables/build-machine"))
            .and(header(
                "authorization",
                "Basic dmF1bHQtdXNlcjp2YXVsdC1wYXNz",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "environmentVariables": [
                    { "name": "DATABASE_URL", "value": "postgres://db" },
                    { "name": "API_KEY", "value": "first" },
                    { "name": "API_KEY", "value": "second" },
                ],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = PlatformConfig {
            url: server.uri(),
            vault_user: Some("vault-user".to_owned()),
            vault_password: Some("vault-pass".to_owned()),
            ..PlatformConfig::default()
        };
        let client = PlatformClient::new(&config).expect("client failed");
        let vars = client
            .resolve_environment("prod")
            .await
            .expect("resolve failed");

        assert_eq!(vars.len(), 2);
        assert_eq!(
            vars.get("DATABASE_URL").map(String::as_str),
            Some("postgres://db")
        );
        // The later duplicate wins.
        assert_eq!(vars.get("API_KEY").map(String::as_str), Some("second"));
    }

    #[tokio::test]
    async fn failed_environment_lookup_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/projects/prod/environment-variables/build-machine"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = PlatformClient::with_url(server.uri()).expect("client failed");
        let result = client.resolve_environment("prod").await;
        assert!(matches!(result, Err(ControlError::Platform(_))));
    }
}

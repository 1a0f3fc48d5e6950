//! `HttpCredentialVault`: a `CredentialVault` backed by an external secrets
//! service reachable over HTTP, mirroring [`crate::openai_compat`]'s
//! routing/error-mapping shape rather than decrypting anything locally — the
//! vault itself always stays external; this crate only speaks its wire
//! protocol.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use flow_core::contracts::{CredentialVault, VaultError};
use flow_domain::{CredentialId, ResolvedCredential, TenantId};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves `(tenant_id, credential_id)` bindings against
/// `GET {base_url}/tenants/{tenant_id}/credentials/{credential_id}`,
/// authenticated with a service-level bearer token (distinct from any
/// per-tenant credential it returns).
pub struct HttpCredentialVault {
    client: Client,
    base_url: String,
    service_token: String,
}

impl HttpCredentialVault {
    pub fn new(base_url: impl Into<String>, service_token: impl Into<String>) -> Self {
        Self {
            client: Client::builder().timeout(DEFAULT_TIMEOUT).build().expect("build http client"),
            base_url: base_url.into(),
            service_token: service_token.into(),
        }
    }

    /// Builds a vault client from `VAULT_BASE_URL` and `VAULT_SERVICE_TOKEN`.
    pub fn from_env() -> Result<Self, flow_core::errors::CoreEngineError> {
        let base_url = std::env::var("VAULT_BASE_URL")
            .map_err(|_| flow_core::errors::CoreEngineError::ConfigMissing("VAULT_BASE_URL".into()))?;
        let service_token = std::env::var("VAULT_SERVICE_TOKEN")
            .map_err(|_| flow_core::errors::CoreEngineError::ConfigMissing("VAULT_SERVICE_TOKEN".into()))?;
        Ok(Self::new(base_url, service_token))
    }
}

#[derive(Deserialize)]
struct WireCredential {
    #[serde(default)]
    auth_header: Option<String>,
    #[serde(default)]
    secret_map: std::collections::HashMap<String, String>,
}

impl From<WireCredential> for ResolvedCredential {
    fn from(w: WireCredential) -> Self {
        ResolvedCredential { auth_header: w.auth_header, secret_map: w.secret_map }
    }
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait]
impl CredentialVault for HttpCredentialVault {
    async fn resolve(&self, tenant_id: TenantId, credential_id: CredentialId) -> Result<ResolvedCredential, VaultError> {
        let url = format!("{}/tenants/{}/credentials/{}", self.base_url, tenant_id, credential_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.service_token)
            .send()
            .await
            .map_err(|_| VaultError::NotFound)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(VaultError::NotFound);
        }
        if status == StatusCode::GONE {
            return Err(VaultError::Revoked);
        }

        let body: Value = response.json().await.map_err(|_| VaultError::NotFound)?;
        if !status.is_success() {
            let reason = serde_json::from_value::<WireError>(body).ok().and_then(|e| e.reason);
            return Err(match reason.as_deref() {
                Some("expired") => VaultError::Expired,
                Some("revoked") => VaultError::Revoked,
                Some("invalid_scope") => VaultError::InvalidScope,
                _ => VaultError::NotFound,
            });
        }

        let wire: WireCredential = serde_json::from_value(body).map_err(|_| VaultError::NotFound)?;
        Ok(wire.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_env_when_both_vars_set() {
        std::env::set_var("VAULT_BASE_URL", "https://vault.internal");
        std::env::set_var("VAULT_SERVICE_TOKEN", "svc-token");
        let vault = HttpCredentialVault::from_env().expect("vault from env");
        assert_eq!(vault.base_url, "https://vault.internal");
        std::env::remove_var("VAULT_BASE_URL");
        std::env::remove_var("VAULT_SERVICE_TOKEN");
    }

    #[test]
    fn missing_env_is_config_missing() {
        std::env::remove_var("VAULT_BASE_URL");
        std::env::remove_var("VAULT_SERVICE_TOKEN");
        let err = HttpCredentialVault::from_env().unwrap_err();
        assert!(matches!(err, flow_core::errors::CoreEngineError::ConfigMissing(_)));
    }
}

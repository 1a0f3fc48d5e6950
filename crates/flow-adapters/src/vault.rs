//! `StaticCredentialVault`: a `CredentialVault` that resolves bindings from
//! an in-memory map, for tests and the CLI demo. A production vault would
//! decrypt from a secrets backend instead of holding plaintext.

use async_trait::async_trait;
use dashmap::DashMap;

use flow_core::contracts::{CredentialVault, VaultError};
use flow_domain::{CredentialId, ResolvedCredential, TenantId};

#[derive(Default)]
pub struct StaticCredentialVault {
    entries: DashMap<(TenantId, CredentialId), ResolvedCredential>,
}

impl StaticCredentialVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, tenant_id: TenantId, credential_id: CredentialId, resolved: ResolvedCredential) {
        self.entries.insert((tenant_id, credential_id), resolved);
    }
}

#[async_trait]
impl CredentialVault for StaticCredentialVault {
    async fn resolve(&self, tenant_id: TenantId, credential_id: CredentialId) -> Result<ResolvedCredential, VaultError> {
        self.entries.get(&(tenant_id, credential_id)).map(|e| e.clone()).ok_or(VaultError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_a_registered_binding() {
        let vault = StaticCredentialVault::new();
        let tenant_id = TenantId::new();
        let credential_id = CredentialId::new();
        vault.put(
            tenant_id,
            credential_id,
            ResolvedCredential { auth_header: Some("Bearer x".into()), secret_map: Default::default() },
        );
        let resolved = vault.resolve(tenant_id, credential_id).await.unwrap();
        assert_eq!(resolved.auth_header.as_deref(), Some("Bearer x"));
    }

    #[tokio::test]
    async fn missing_binding_is_not_found() {
        let vault = StaticCredentialVault::new();
        let err = vault.resolve(TenantId::new(), CredentialId::new()).await.unwrap_err();
        assert_eq!(err, VaultError::NotFound);
    }
}

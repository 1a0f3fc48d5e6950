use serde::{Deserialize, Serialize};

/// Material a Credential Vault resolves a binding to. The vault owns
/// decryption; the core only ever sees the resolved form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedCredential {
    pub auth_header: Option<String>,
    pub secret_map: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialVaultErrorKind {
    NotFound,
    Expired,
    Revoked,
    InvalidScope,
}

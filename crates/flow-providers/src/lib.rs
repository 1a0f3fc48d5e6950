//! flow-providers: HTTP-backed collaborator implementations — an
//! `LlmProvider` for `llm`/`router`/`agent` steps and groups, and a
//! `CredentialVault` client against an external secrets service.

pub mod http_vault;
pub mod openai_compat;

pub use http_vault::HttpCredentialVault;
pub use openai_compat::HttpLlmProvider;

//! Authentication: agent API keys and operator bearer tokens

pub mod api_keys;
pub mod azure_jwt;

pub use api_keys::{generate_api_key, hash_api_key, GeneratedKey};
pub use azure_jwt::AzureAdValidator;

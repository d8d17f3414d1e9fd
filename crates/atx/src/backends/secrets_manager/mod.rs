//! 🔒 Secrets Manager Backend: where the OAuth crown jewels sleep.
//!
//! 🧠 Knowledge graph:
//! - Trait impl: `impl SecretStore for SecretsManagerStore`
//! - Enum variant: `SecretBackend::SecretsManager(SecretsManagerStore)`
//! - The region comes out of the ARN itself, so one store can read secrets from anywhere
//!
//! 🦆 The duck knows the password. The duck will never tell.

mod secrets_manager_store;

pub use secrets_manager_store::{SecretsManagerStore, region_from_arn};

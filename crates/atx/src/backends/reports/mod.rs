//! 📡 Reports Backend: the admin activity API, one page at a time.
//!
//! 🧠 Knowledge graph:
//! - Same pattern as `s3/` and `secrets_manager/`: config + client co-located in one file
//! - Trait impl: `impl ActivityApi for ReportsApi`
//! - Enum variant: `ActivityBackend::Reports(ReportsApi)`
//! - Transport: `reqwest` GET with a bearer token minted by `credentials`
//!
//! 🦆 The duck is not authorized to view audit logs. It has asked. Repeatedly.

mod reports_api;

pub use reports_api::{DEFAULT_API_BASE_URL, ReportsApi, ReportsApiConfig};

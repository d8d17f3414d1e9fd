//! 🪣 S3 Backend: the landing zone.
//!
//! 🧠 Knowledge graph:
//! - Same pattern as `reports/` and `secrets_manager/`
//! - Trait impl: `impl ObjectStore for S3Store`
//! - Enum variant: `StorageBackend::S3(S3Store)`
//! - Transport: AWS SDK `HeadObject` for the probe, `PutObject` for the write
//!
//! 🦆 The duck watches from the edge of the VPC.

mod s3_store;

pub use s3_store::S3Store;

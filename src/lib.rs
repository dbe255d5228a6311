//! Cloud Archiver Library
//!
//! Resumable transfer of archived recordings to and from B2 object storage.
//!
//! # Features
//!
//! - **Direct uploads**: files below the part size go up in one request
//! - **Parallel multipart**: larger files are split into parts and uploaded
//!   on a bounded worker pool
//! - **Resumable**: an interrupted upload of unchanged content continues
//!   from the parts already stored
//! - **Self-cleaning**: abandoned unfinished uploads are cancelled
//! - **Verified downloads**: ranged, sequential, SHA-1 checked
//!
//! # Example
//!
//! ```no_run
//! use cloud_archiver::cloud::{upload_pending, Backend, StoredObject};
//! use cloud_archiver::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let backend = Backend::from_config(&config).await?;
//!
//!     if let Some(cloud) = backend.cloud() {
//!         let mut objects = vec![StoredObject::new(1, "events/1/opening.mp3", "/srv/audio/1.mp3")];
//!         let summary = upload_pending(cloud, &mut objects).await;
//!         println!("uploaded {}", summary.uploaded);
//!     }
//!     Ok(())
//! }
//! ```

pub mod b2;
pub mod cloud;
pub mod config;
pub mod metrics;
pub mod transfer;

// Re-export commonly used types
pub use cloud::{Backend, CloudBackend, StoredObject};
pub use config::Config;
pub use transfer::TransferError;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

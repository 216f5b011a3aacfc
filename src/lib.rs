//! # mini-scada: PLC Tag Polling and Sample Storage
//!
//! A supervisory data-acquisition core that periodically reads configured
//! tags from a programmable logic controller, decodes the raw bytes into
//! typed values and stores timestamped samples for later querying.
//!
//! ## Architecture
//!
//! - **Backend**: Owns the controller [`Driver`](backend::Driver) in a worker
//!   thread and runs the poll cycle ([`PollingService`])
//! - **Decoder**: Pure functions from raw bytes to [`Value`]s
//! - **Store**: Append-only JSON Lines sample log with an in-memory index
//! - **Status**: Shared [`StatusSnapshot`] readable from any thread
//! - **Communication**: Crossbeam channels between handle and worker
//!
//! ## Workspace
//!
//! Samples and the tag registry live in a workspace directory, by default
//! under the platform data directory:
//!
//! - **Linux**: `~/.local/share/mini-scada/`
//! - **macOS**: `~/Library/Application Support/mini-scada/`
//! - **Windows**: `%APPDATA%\mini-scada\`
//!
//! ## Example
//!
//! ```ignore
//! use mini_scada::{backend::S7Driver, config::ProjectFile, PollingService, SampleStore};
//!
//! let project = ProjectFile::load("plant.toml")?;
//! let _guard = mini_scada::logging::init(&project.logging);
//!
//! let store = SampleStore::open(project.store.workspace_dir()?)?;
//! let service = PollingService::builder(S7Driver::new(project.connection.timeout()))
//!     .store(store)
//!     .tags(project.tags.clone())
//!     .config(project.polling_config())
//!     .spawn()?;
//!
//! service.connect_target(project.connection.target())?;
//! service.start_polling()?;
//!
//! for (tag, sample) in service.store().get_latest_values() {
//!     println!("{tag} = {}", sample.value);
//! }
//! ```

pub mod backend;
pub mod config;
pub mod decoder;
pub mod discovery;
pub mod error;
pub mod events;
pub mod logging;
pub mod status;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use backend::{ConnectTarget, Driver, PollingConfig, PollingService};
pub use config::ProjectFile;
pub use error::{Result, ScadaError, ServiceError};
pub use events::{ChannelSink, EventLog, EventSink, ScadaEvent};
pub use status::{AppStatus, StatusSnapshot};
pub use store::SampleStore;
pub use types::{Area, DataType, Sample, SampleErrorKind, ServiceState, TagSpec, Value};

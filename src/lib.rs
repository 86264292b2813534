pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod sync;
pub mod transport;

pub use config::SyncConfig;
pub use error::SyncError;
pub use model::StatusSnapshot;
pub use sync::{LiveState, LiveSync};

//! Local-first clinic data engine. Records live in an embedded SQLite file,
//! writes to synced tables are queued while offline, and a privacy controller
//! decides when identifying patient names may be displayed.

pub mod attachments;
pub mod commands;
pub mod connectivity;
pub mod db;
pub mod device;
pub mod error;
pub mod id;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod privacy;
pub mod remote;
pub mod repo;
pub mod settings;
pub mod state;
pub mod sync;
pub mod time;

pub use error::{AppError, AppResult};
pub use logging::init_logging;
pub use state::AppState;

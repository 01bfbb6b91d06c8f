//! vismod host side
//!
//! Owns the sandbox session, turns typed commands into correlated RPC calls
//! and answers the sandbox's asset requests from a confined directory.

pub mod assets;
pub mod config;
pub mod error;
pub mod session;
pub mod sources;

pub use assets::{serve_asset_request, AssetService, FsAssetService};
pub use config::HostConfig;
pub use error::HostError;
pub use session::{SessionManager, SessionStatus};
pub use sources::{DirectorySourceProvider, MemorySourceProvider, ModuleSourceProvider};

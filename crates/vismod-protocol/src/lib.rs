//! vismod wire protocol
//!
//! Types shared by the host and the sandbox: RPC envelopes, the track data
//! model, the closed error taxonomy, request correlation and the in-memory
//! transport. Neither side touches the other's memory; everything that
//! crosses the boundary is defined here.

pub mod envelope;
pub mod error;
pub mod isolation;
pub mod link;
pub mod paths;
pub mod pending;
pub mod token;
pub mod track;

pub use envelope::{
    decode_result, encode_result, message_type, BootSignal, Frame, IntrospectReply,
    ListAssetsReply, ReadAssetTextReply, RequestEnvelope, ResponseEnvelope,
};
pub use error::{ErrorKind, ProtocolError, RpcError};
pub use isolation::{ContextGuard, IsolatedContext, IsolationProvider};
pub use link::{link_pair, Link, RpcClient};
pub use paths::{normalize_asset_dir, normalize_asset_path};
pub use pending::PendingRequests;
pub use token::SessionToken;
pub use track::{
    is_valid_module_type, normalize_options, MethodCall, MethodOption, MethodSpec, ModuleData,
    ModuleSource, OptionSpec, Track, TrackModuleRef,
};

/// Default deadline for every RPC call, in milliseconds.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 3000;

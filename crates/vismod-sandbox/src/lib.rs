//! vismod sandbox runtime
//!
//! Runs inside the isolated context: dispatches host requests, loads
//! untrusted modules behind an import allow-list, owns every constructed
//! instance and drives the shared frame scheduler. The bundled engine runs
//! WebAssembly-text modules with Extism (wasmtime).

pub mod assets;
pub mod bindings;
pub mod config;
pub mod docblock;
pub mod error;
pub mod loader;
pub mod local;
pub mod matrix;
pub mod module;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod sdk;
pub mod wasm;

#[cfg(test)]
mod testing;

pub use assets::AssetProxy;
pub use bindings::{Bindings, SdkHelper};
pub use config::RuntimeConfig;
pub use error::SandboxError;
pub use loader::{CompilationUnit, LoadedClass, ModuleLoader};
pub use local::InProcessIsolation;
pub use matrix::{CellPlacement, MatrixLayout};
pub use module::{ClassMeta, FrameTick, InstanceContext, ModuleClass, ModuleEngine, ModuleInstance};
pub use runtime::SandboxRuntime;
pub use sdk::Sdk;
pub use wasm::{SandboxConfig, WasmEngine};

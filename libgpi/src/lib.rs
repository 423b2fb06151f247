//! # libgpi - Generic Procedural Interface
//!
//! A simulator-neutral layer between HDL simulators and a Lua testbench.
//! Vendor adapters (VPI, VHPI, FLI, ...) register themselves once; the user
//! runtime then sees a single design hierarchy, a single set of signal
//! accessors and a single callback mechanism, whatever adapter actually owns
//! each object.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              GPI Architecture                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐     ┌──────────────┐     ┌─────────────────────────┐   │
//! │  │  Lua Script │────>│   libgpi     │────>│  Adapters (GpiImpl)     │   │
//! │  │ (Testbench) │<────│ (Rust/FFI)   │<────│  VPI / VHPI / FLI / sim │   │
//! │  └─────────────┘     └──────────────┘     └─────────────────────────┘   │
//! │                              │                                          │
//! │                              ▼                                          │
//! │                    ┌──────────────────┐                                 │
//! │                    │   GpiContext     │                                 │
//! │                    │ (process state)  │                                 │
//! │                    └──────────────────┘                                 │
//! │                              │                                          │
//! │         ┌────────────────────┼────────────────────┐                     │
//! │         ▼                    ▼                    ▼                     │
//! │  ┌─────────────┐    ┌───────────────┐    ┌─────────────────┐            │
//! │  │  Registry   │    │ CallbackTable │    │ EmbeddedRuntime │            │
//! │  │ (+ handles) │    │ (one-shot/re) │    │   (mlua, Lua)   │            │
//! │  └─────────────┘    └───────────────┘    └─────────────────┘            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - `context`: process context, execution lock, lifecycle and callback dispatch
//! - `registry` / `handle_store`: adapter list, cross-adapter lookup, handle identity
//! - `adapter` / `object`: the contracts a vendor backend implements
//! - `callback`: callback identities, states and reactions
//! - `embed` / `lua_bindings`: the embedded Lua runtime and its `gpi` table
//! - `ffi`: the C surface
//! - `config` / `loader` / `logging`: environment, extra libraries, log bridge
//! - `testing`: an in-memory adapter
//!

pub mod adapter;
pub mod callback;
pub mod config;
pub mod context;
pub mod embed;
pub mod error;
pub mod ffi;
pub mod handle_store;
pub mod loader;
pub mod logging;
pub mod lua_bindings;
pub mod object;
pub mod registry;
pub mod testing;
pub mod types;
mod utils;

pub use adapter::{GpiImpl, ImplId};
pub use callback::{CallbackState, CallbackTrigger, CbId, FireOutcome, Reaction, ReactionOutcome, reaction_fn};
pub use context::{GpiContext, get_gpi_context};
pub use error::{GpiError, GpiResult};
pub use handle_store::HandleId;
pub use registry::IterId;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// Install the logger at static construction time
#[static_init::constructor(0)]
extern "C" fn init_gpi_logger() {
    let _ = logging::init();
}

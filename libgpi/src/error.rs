//! Error type of the GPI layer.
//!
//! Lookup misses are not errors: they are reported as `None`. `GpiError`
//! covers contract violations and boundary failures, and is converted to a
//! sentinel at the C boundary and to a Lua error at the scripting boundary.

use thiserror::Error;

use crate::types::CallbackKind;

pub type GpiResult<T> = Result<T, GpiError>;

#[derive(Debug, Clone, Error)]
pub enum GpiError {
    #[error("no implementation registered")]
    NoImplementation,

    #[error("implementation `{0}` is already registered, check GPI_EXTRA")]
    DuplicateImplementation(String),

    #[error("invalid handle token {0}")]
    InvalidHandle(i64),

    #[error("invalid iterator token {0}")]
    InvalidIterator(i64),

    #[error("`{0}` is not a signal")]
    NotASignal(String),

    #[error("invalid value `{value}` for {what}")]
    InvalidValue { what: &'static str, value: String },

    #[error("{kind} callback registration rejected by `{adapter}`")]
    RegistrationFailed { kind: CallbackKind, adapter: String },

    /// A callback fired or was removed while its identity says it must not be.
    #[error("callback {token:#x} corrupted: {reason}")]
    CallbackCorrupted { token: u64, reason: String },

    #[error("reaction failed: {0}")]
    Reaction(String),

    #[error("handle store used after teardown")]
    StoreCleared,

    #[error("simulator operation failed: {0}")]
    Simulator(String),

    #[error("embedded runtime: {0}")]
    Runtime(String),

    #[error("embedded runtime is not initialized")]
    RuntimeNotInitialized,

    #[error("configuration: {0}")]
    Config(String),

    #[error("failed to load `{library}`: {reason}")]
    Load { library: String, reason: String },
}

impl From<mlua::Error> for GpiError {
    fn from(e: mlua::Error) -> Self {
        GpiError::Runtime(e.to_string())
    }
}

impl From<GpiError> for mlua::Error {
    fn from(e: GpiError) -> Self {
        mlua::Error::external(e)
    }
}

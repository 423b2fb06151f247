//! # Object / Callback Model
//!
//! Capability contracts every adapter implements, independent of the vendor
//! ABI behind it.
//!
//! ```text
//!  ┌──────────────────┐   as_signal()   ┌──────────────────────┐
//!  │    GpiObjHdl     │ ──────────────> │   GpiSignalObjHdl    │
//!  │ kind, names,     │                 │ 4 getters, 4 setters │
//!  │ range, flags     │                 │ value-change cb      │
//!  └──────────────────┘                 └──────────────────────┘
//!           ▲ produced by                          │ returns
//!  ┌──────────────────┐                 ┌──────────────────────┐
//!  │   GpiIterator    │                 │      GpiCbHdl        │
//!  │ next_handle()    │                 │ remove() / cleanup() │
//!  └──────────────────┘                 └──────────────────────┘
//! ```
//!
//! Objects carry no link to their parent or children. The hierarchy is a
//! query relation answered by the owning adapter, and every resolved object
//! ends up owned by the [`HandleStore`](crate::handle_store::HandleStore).

use std::any::Any;

use crate::callback::CallbackTrigger;
use crate::error::GpiResult;
use crate::types::{GpiEdge, GpiObjType, GpiRangeDir, GpiSetAction};

/// Opaque native handle found by an iterator but not resolvable by its adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawHandle(pub usize);

impl RawHandle {
    #[inline(always)]
    pub fn from_ptr(ptr: *mut libc::c_void) -> Self {
        RawHandle(ptr as usize)
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut libc::c_void {
        self.0 as *mut libc::c_void
    }
}

/// One entity of the simulator's design hierarchy.
pub trait GpiObjHdl: Any {
    fn kind(&self) -> GpiObjType;

    fn type_str(&self) -> &str {
        self.kind().as_str()
    }

    fn num_elems(&self) -> i32;
    fn range_left(&self) -> i32;
    fn range_right(&self) -> i32;
    fn range_dir(&self) -> GpiRangeDir;
    fn is_const(&self) -> bool;
    fn is_indexable(&self) -> bool;

    fn definition_name(&self) -> Option<&str> {
        None
    }

    fn definition_file(&self) -> Option<&str> {
        None
    }

    /// Canonical hierarchical path, the identity key of the object.
    fn full_name(&self) -> &str;
    fn name(&self) -> &str;

    fn as_signal(&self) -> Option<&dyn GpiSignalObjHdl> {
        None
    }

    /// Lets an adapter recover its own concrete type from a parent handle.
    fn as_any(&self) -> &dyn Any;

    fn repr(&self) -> String {
        format!("{}({})", self.kind(), self.full_name())
    }
}

/// An object that carries a value.
pub trait GpiSignalObjHdl: GpiObjHdl {
    /// Arbitrary-precision bit vector, one character per bit.
    fn value_binstr(&self) -> GpiResult<String>;
    /// Opaque byte string.
    fn value_str(&self) -> GpiResult<Vec<u8>>;
    fn value_real(&self) -> GpiResult<f64>;
    fn value_long(&self) -> GpiResult<i64>;

    fn set_value_int(&self, value: i32, action: GpiSetAction) -> GpiResult<()>;
    fn set_value_real(&self, value: f64, action: GpiSetAction) -> GpiResult<()>;
    fn set_value_str(&self, value: &[u8], action: GpiSetAction) -> GpiResult<()>;
    fn set_value_binstr(&self, value: &str, action: GpiSetAction) -> GpiResult<()>;

    /// Arms a native value-change trigger; `trigger.fire()` must be called
    /// only for changes accepted by `edge`.
    fn register_value_change_callback(
        &self,
        edge: GpiEdge,
        trigger: CallbackTrigger,
    ) -> GpiResult<Box<dyn GpiCbHdl>>;
}

/// Native side of an armed callback, owned by the callback table.
pub trait GpiCbHdl {
    fn repr(&self) -> String;

    /// Deregisters the native trigger before it fired.
    fn remove(self: Box<Self>) -> GpiResult<()>;

    /// Releases the native trigger after its last firing.
    fn cleanup(self: Box<Self>) {}
}

/// Result of one iterator step.
pub enum IterStep {
    /// Fully resolved by the iterating adapter
    Native(Box<dyn GpiObjHdl>),
    /// Native object found but it could not be set up, skip it
    NativeNoName,
    /// Foreign object known only by name
    NotNative(String),
    /// Foreign object known only by its raw handle
    NotNativeNoName(RawHandle),
    End,
}

pub trait GpiIterator {
    fn repr(&self) -> String;
    fn next_handle(&mut self) -> IterStep;
}

//! The contract a vendor backend fulfils to be registered with the GPI.
//!
//! An adapter translates one simulator procedural interface (VPI, VHPI, FLI,
//! or an in-memory model, see [`crate::testing`]) into the object model of
//! [`crate::object`]. Adapters are registered once and live for the whole
//! run; the registry keeps them in registration order.

use std::fmt;

use crate::callback::CallbackTrigger;
use crate::error::GpiResult;
use crate::object::{GpiCbHdl, GpiIterator, GpiObjHdl, RawHandle};
use crate::types::GpiIteratorSel;

/// Position of an adapter in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImplId(pub usize);

impl fmt::Display for ImplId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "impl#{}", self.0)
    }
}

pub trait GpiImpl {
    /// Display name, also the duplicate-registration key.
    fn name(&self) -> &str;

    // ── simulator ───────────────────────────────────────────────────────
    fn end_sim(&self);
    fn sim_time(&self) -> u64;
    /// Time precision as a power of ten in seconds.
    fn sim_precision(&self) -> i32;
    fn simulator_product(&self) -> &str;
    fn simulator_version(&self) -> &str;

    // ── hierarchy ───────────────────────────────────────────────────────
    /// `name` is relative to `parent`, which may belong to another adapter.
    fn native_check_create_by_name(
        &self,
        name: &str,
        parent: &dyn GpiObjHdl,
    ) -> Option<Box<dyn GpiObjHdl>>;

    fn native_check_create_by_index(
        &self,
        index: i32,
        parent: &dyn GpiObjHdl,
    ) -> Option<Box<dyn GpiObjHdl>>;

    fn native_check_create_by_raw(
        &self,
        raw: RawHandle,
        parent: &dyn GpiObjHdl,
    ) -> Option<Box<dyn GpiObjHdl>>;

    /// `None` asks for the first top-level scope.
    fn get_root_handle(&self, name: Option<&str>) -> Option<Box<dyn GpiObjHdl>>;

    /// `parent` is `None` only for [`GpiIteratorSel::PackageScopes`].
    fn iterate_handle(
        &self,
        parent: Option<&dyn GpiObjHdl>,
        sel: GpiIteratorSel,
    ) -> Option<Box<dyn GpiIterator>>;

    // ── callbacks ───────────────────────────────────────────────────────
    fn register_timed_callback(
        &self,
        time: u64,
        trigger: CallbackTrigger,
    ) -> GpiResult<Box<dyn GpiCbHdl>>;

    fn register_readonly_callback(&self, trigger: CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>>;

    fn register_nexttime_callback(&self, trigger: CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>>;

    fn register_readwrite_callback(&self, trigger: CallbackTrigger)
    -> GpiResult<Box<dyn GpiCbHdl>>;
}

/// Lets a caller keep its own reference to a registered adapter.
impl<T: GpiImpl + ?Sized> GpiImpl for std::rc::Rc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn end_sim(&self) {
        (**self).end_sim()
    }

    fn sim_time(&self) -> u64 {
        (**self).sim_time()
    }

    fn sim_precision(&self) -> i32 {
        (**self).sim_precision()
    }

    fn simulator_product(&self) -> &str {
        (**self).simulator_product()
    }

    fn simulator_version(&self) -> &str {
        (**self).simulator_version()
    }

    fn native_check_create_by_name(&self, name: &str, parent: &dyn GpiObjHdl) -> Option<Box<dyn GpiObjHdl>> {
        (**self).native_check_create_by_name(name, parent)
    }

    fn native_check_create_by_index(&self, index: i32, parent: &dyn GpiObjHdl) -> Option<Box<dyn GpiObjHdl>> {
        (**self).native_check_create_by_index(index, parent)
    }

    fn native_check_create_by_raw(&self, raw: RawHandle, parent: &dyn GpiObjHdl) -> Option<Box<dyn GpiObjHdl>> {
        (**self).native_check_create_by_raw(raw, parent)
    }

    fn get_root_handle(&self, name: Option<&str>) -> Option<Box<dyn GpiObjHdl>> {
        (**self).get_root_handle(name)
    }

    fn iterate_handle(&self, parent: Option<&dyn GpiObjHdl>, sel: GpiIteratorSel) -> Option<Box<dyn GpiIterator>> {
        (**self).iterate_handle(parent, sel)
    }

    fn register_timed_callback(&self, time: u64, trigger: CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>> {
        (**self).register_timed_callback(time, trigger)
    }

    fn register_readonly_callback(&self, trigger: CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>> {
        (**self).register_readonly_callback(trigger)
    }

    fn register_nexttime_callback(&self, trigger: CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>> {
        (**self).register_nexttime_callback(trigger)
    }

    fn register_readwrite_callback(&self, trigger: CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>> {
        (**self).register_readwrite_callback(trigger)
    }
}

//! # Implementation Registry
//!
//! Ordered set of registered adapters plus the lookup dispatcher that turns a
//! generic request into a stored handle.
//!
//! ```text
//!   get_handle_by_name(parent, "x")
//!          │
//!          ▼
//!   ┌──────────────────┐  hit   ┌──────────────────┐
//!   │ parent's adapter │ ─────> │                  │
//!   └──────────────────┘        │                  │
//!          │ miss               │  HandleStore::   │
//!          ▼                    │  check_and_store │ ──> HandleId
//!   ┌──────────────────┐  hit   │                  │
//!   │ other adapters,  │ ─────> │                  │
//!   │ in order         │        └──────────────────┘
//!   └──────────────────┘
//!          │ miss
//!          ▼
//!        None
//! ```
//!
//! No `RefCell` borrow is held across a call into an adapter.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::adapter::{GpiImpl, ImplId};
use crate::error::{GpiError, GpiResult};
use crate::handle_store::{HandleId, HandleStore};
use crate::object::{GpiIterator, GpiObjHdl, IterStep, RawHandle};
use crate::types::GpiIteratorSel;
use crate::utils::idpool::{IdPool, SlotId};

/// Finest precision accepted from an adapter (1 fs).
pub const MIN_PRECISION: i32 = -15;
/// Coarsest precision accepted from an adapter (1 ks).
pub const MAX_PRECISION: i32 = 2;

type ImplSnapshot = SmallVec<[(ImplId, Rc<dyn GpiImpl>); 4]>;

/// Token of an in-progress iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IterId(SlotId);

impl IterId {
    #[inline(always)]
    pub fn token(&self) -> u64 {
        self.0.to_token()
    }

    #[inline(always)]
    pub fn from_token(token: u64) -> Option<Self> {
        SlotId::from_token(token).map(IterId)
    }
}

struct IterEntry {
    iter: Box<dyn GpiIterator>,
    origin: ImplId,
    parent: Option<HandleId>,
}

#[derive(Default)]
struct IteratorTable {
    pool: IdPool,
    entries: HashMap<IterId, IterEntry>,
}

#[derive(Default)]
pub struct Registry {
    impls: RefCell<Vec<Rc<dyn GpiImpl>>>,
    store: RefCell<HandleStore>,
    iterators: RefCell<IteratorTable>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── adapters ────────────────────────────────────────────────────────

    pub fn register_impl(&self, imp: Rc<dyn GpiImpl>) -> GpiResult<ImplId> {
        let mut impls = self.impls.borrow_mut();
        if impls.iter().any(|i| i.name() == imp.name()) {
            log::warn!(
                "{} already registered, check GPI_EXTRA",
                imp.name()
            );
            return Err(GpiError::DuplicateImplementation(imp.name().to_string()));
        }

        let id = ImplId(impls.len());
        log::debug!("[registry] registered {} as {id}", imp.name());
        impls.push(imp);
        Ok(id)
    }

    #[inline(always)]
    pub fn impl_count(&self) -> usize {
        self.impls.borrow().len()
    }

    pub fn get_impl(&self, id: ImplId) -> Option<Rc<dyn GpiImpl>> {
        self.impls.borrow().get(id.0).cloned()
    }

    /// The adapter that serves simulator-wide requests.
    pub fn first_impl(&self) -> GpiResult<Rc<dyn GpiImpl>> {
        self.get_impl(ImplId(0)).ok_or(GpiError::NoImplementation)
    }

    pub fn impl_names(&self) -> Vec<String> {
        self.impls
            .borrow()
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    fn snapshot(&self) -> ImplSnapshot {
        self.impls
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, imp)| (ImplId(i), imp.clone()))
            .collect()
    }

    // ── simulator metadata ──────────────────────────────────────────────

    pub fn sim_time(&self) -> GpiResult<u64> {
        Ok(self.first_impl()?.sim_time())
    }

    pub fn sim_precision(&self) -> GpiResult<i32> {
        let reported = self.first_impl()?.sim_precision();
        let clamped = reported.clamp(MIN_PRECISION, MAX_PRECISION);
        if clamped != reported {
            log::debug!("[registry] precision {reported} clamped to {clamped}");
        }
        Ok(clamped)
    }

    pub fn simulator_product(&self) -> GpiResult<String> {
        Ok(self.first_impl()?.simulator_product().to_string())
    }

    pub fn simulator_version(&self) -> GpiResult<String> {
        Ok(self.first_impl()?.simulator_version().to_string())
    }

    // ── handles ─────────────────────────────────────────────────────────

    pub fn object(&self, id: HandleId) -> GpiResult<Rc<dyn GpiObjHdl>> {
        let store = self.store.borrow();
        if store.is_cleared() {
            return Err(GpiError::StoreCleared);
        }
        store
            .get(id)
            .ok_or(GpiError::InvalidHandle(id.token() as i64))
    }

    /// Adapter that produced `id`.
    pub fn origin(&self, id: HandleId) -> Option<ImplId> {
        self.store.borrow().origin(id)
    }

    pub fn handle_count(&self) -> usize {
        self.store.borrow().len()
    }

    fn store_handle(&self, obj: Box<dyn GpiObjHdl>, origin: ImplId) -> Option<HandleId> {
        match self.store.borrow_mut().check_and_store(obj, origin) {
            Ok(id) => Some(id),
            Err(e) => {
                log::error!("[registry] {e}");
                None
            }
        }
    }

    /// Drops every stored handle and iterator. Called once at teardown.
    pub fn clear_store(&self) {
        let iterators = std::mem::take(&mut *self.iterators.borrow_mut());
        drop(iterators);
        self.store.borrow_mut().clear();
    }

    pub fn get_root_handle(&self, name: Option<&str>) -> Option<HandleId> {
        let impls = self.snapshot();
        log::debug!(
            "[registry] looking for root handle {:?} over {} implementations",
            name,
            impls.len()
        );

        for (id, imp) in impls {
            if let Some(obj) = imp.get_root_handle(name) {
                log::debug!("[registry] got root handle {} from {}", obj.name(), imp.name());
                return self.store_handle(obj, id);
            }
        }

        log::warn!("[registry] no root handle found");
        None
    }

    pub fn get_handle_by_name(&self, parent: HandleId, name: &str) -> Option<HandleId> {
        let found = self.get_handle_by_name_skip(parent, name, None);
        if found.is_none() {
            log::debug!(
                "[registry] failed to find a handle named {name} via any registered implementation"
            );
        }
        found
    }

    /// Name lookup trying the parent's own adapter first, then every other
    /// adapter in registration order. `skip` is never consulted.
    pub fn get_handle_by_name_skip(
        &self,
        parent: HandleId,
        name: &str,
        skip: Option<ImplId>,
    ) -> Option<HandleId> {
        let parent_obj = self.object(parent).ok()?;
        let parent_impl = self.origin(parent)?;
        let impls = self.snapshot();

        if skip != Some(parent_impl) {
            if let Some((_, imp)) = impls.iter().find(|(id, _)| *id == parent_impl) {
                if let Some(obj) = imp.native_check_create_by_name(name, &*parent_obj) {
                    return self.store_handle(obj, parent_impl);
                }
            }
        }

        for (id, imp) in impls.iter() {
            if Some(*id) == skip {
                log::trace!("[registry] skipping {}", imp.name());
                continue;
            }
            if *id == parent_impl {
                continue;
            }

            log::trace!("[registry] checking if {name} is native through {}", imp.name());
            if let Some(obj) = imp.native_check_create_by_name(name, &*parent_obj) {
                log::debug!("[registry] found {name} via {}", imp.name());
                return self.store_handle(obj, *id);
            }
        }

        None
    }

    pub fn get_handle_by_raw(
        &self,
        parent: HandleId,
        raw: RawHandle,
        skip: Option<ImplId>,
    ) -> Option<HandleId> {
        let parent_obj = self.object(parent).ok()?;

        for (id, imp) in self.snapshot() {
            if Some(id) == skip {
                log::trace!("[registry] skipping {}", imp.name());
                continue;
            }
            if let Some(obj) = imp.native_check_create_by_raw(raw, &*parent_obj) {
                log::debug!("[registry] found {} via {}", obj.name(), imp.name());
                return self.store_handle(obj, id);
            }
        }

        log::warn!(
            "[registry] failed to convert raw handle {:#x} to a valid object via any registered implementation",
            raw.0
        );
        None
    }

    /// Index lookups stay within the parent's own adapter.
    pub fn get_handle_by_index(&self, parent: HandleId, index: i32) -> Option<HandleId> {
        let parent_obj = self.object(parent).ok()?;
        let parent_impl = self.origin(parent)?;
        let imp = self.get_impl(parent_impl)?;

        match imp.native_check_create_by_index(index, &*parent_obj) {
            Some(obj) => self.store_handle(obj, parent_impl),
            None => {
                log::warn!(
                    "[registry] failed to find a handle at index {index} via any registered implementation"
                );
                None
            }
        }
    }

    // ── iteration ───────────────────────────────────────────────────────

    pub fn iterate(&self, parent: Option<HandleId>, sel: GpiIteratorSel) -> Option<IterId> {
        if sel == GpiIteratorSel::PackageScopes {
            if parent.is_some() {
                log::error!("[registry] cannot iterate over packages from a non-null handle");
                return None;
            }

            for (id, imp) in self.snapshot() {
                if let Some(iter) = imp.iterate_handle(None, sel) {
                    return Some(self.insert_iterator(iter, id, None));
                }
            }
            return None;
        }

        let Some(parent) = parent else {
            log::error!("[registry] {sel:?} iteration needs a parent handle");
            return None;
        };
        let parent_obj = self.object(parent).ok()?;
        let origin = self.origin(parent)?;
        let iter = self.get_impl(origin)?.iterate_handle(Some(&*parent_obj), sel)?;
        Some(self.insert_iterator(iter, origin, Some(parent)))
    }

    fn insert_iterator(
        &self,
        iter: Box<dyn GpiIterator>,
        origin: ImplId,
        parent: Option<HandleId>,
    ) -> IterId {
        let mut table = self.iterators.borrow_mut();
        let id = IterId(table.pool.alloc());
        log::trace!("[registry] new iterator {}", iter.repr());
        table.entries.insert(id, IterEntry { iter, origin, parent });
        id
    }

    pub fn live_iterators(&self) -> usize {
        self.iterators.borrow().entries.len()
    }

    /// Next handle of the iteration. `Ok(None)` ends it and destroys `id`.
    pub fn next(&self, id: IterId) -> GpiResult<Option<HandleId>> {
        let mut entry = self
            .iterators
            .borrow_mut()
            .entries
            .remove(&id)
            .ok_or(GpiError::InvalidIterator(id.token() as i64))?;

        let found = loop {
            match entry.iter.next_handle() {
                IterStep::Native(obj) => {
                    log::trace!("[registry] create a native handle");
                    match self.store_handle(obj, entry.origin) {
                        Some(hdl) => break Some(hdl),
                        None => continue,
                    }
                }
                IterStep::NativeNoName => {
                    log::debug!("[registry] unable to fully setup handle, skipping");
                    continue;
                }
                IterStep::NotNative(name) => {
                    log::debug!(
                        "[registry] found {name} but unable to create it natively, trying others"
                    );
                    let hdl = entry
                        .parent
                        .and_then(|p| self.get_handle_by_name_skip(p, &name, Some(entry.origin)));
                    if hdl.is_some() {
                        break hdl;
                    }
                    log::warn!("[registry] unable to create {name} via any registered implementation");
                }
                IterStep::NotNativeNoName(raw) => {
                    log::debug!("[registry] found an object not accessible natively, trying others");
                    let hdl = entry
                        .parent
                        .and_then(|p| self.get_handle_by_raw(p, raw, Some(entry.origin)));
                    if hdl.is_some() {
                        break hdl;
                    }
                }
                IterStep::End => {
                    log::trace!("[registry] reached end of iterator");
                    break None;
                }
            }
        };

        let mut table = self.iterators.borrow_mut();
        match found {
            Some(_) => {
                table.entries.insert(id, entry);
            }
            None => {
                table.pool.release(id.0);
            }
        }
        Ok(found)
    }
}

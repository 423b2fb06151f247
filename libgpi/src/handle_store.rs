//! Handle identity store.
//!
//! The store is the only owner of resolved objects. Each object lives in an
//! arena slot for the rest of the run and is keyed by its full path, so two
//! lookups that land on the same path always hand out the same [`HandleId`]
//! and the same `Rc`. Everything outside the store refers to objects by
//! token.

use std::fmt;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::adapter::ImplId;
use crate::error::{GpiError, GpiResult};
use crate::object::GpiObjHdl;

/// Token of a stored object. Never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    #[inline(always)]
    pub fn token(&self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub fn from_token(token: u64) -> Option<Self> {
        (token != 0).then_some(HandleId(token))
    }

    #[inline(always)]
    fn index(&self) -> usize {
        (self.0 - 1) as usize
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hdl#{}", self.0)
    }
}

struct StoredHandle {
    obj: Rc<dyn GpiObjHdl>,
    origin: ImplId,
}

#[derive(Default)]
pub struct HandleStore {
    by_path: HashMap<String, HandleId>,
    arena: Vec<StoredHandle>,
    cleared: bool,
}

impl HandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `obj` unless its full path is already known, in which case
    /// `obj` is dropped and the existing id returned.
    pub fn check_and_store(
        &mut self,
        obj: Box<dyn GpiObjHdl>,
        origin: ImplId,
    ) -> GpiResult<HandleId> {
        if self.cleared {
            return Err(GpiError::StoreCleared);
        }

        if let Some(id) = self.by_path.get(obj.full_name()) {
            log::trace!("[handle_store] {} already stored as {id}", obj.full_name());
            return Ok(*id);
        }

        let id = HandleId(self.arena.len() as u64 + 1);
        self.by_path.insert(obj.full_name().to_string(), id);
        self.arena.push(StoredHandle {
            obj: Rc::from(obj),
            origin,
        });
        Ok(id)
    }

    pub fn get(&self, id: HandleId) -> Option<Rc<dyn GpiObjHdl>> {
        self.arena.get(id.index()).map(|h| h.obj.clone())
    }

    pub fn origin(&self, id: HandleId) -> Option<ImplId> {
        self.arena.get(id.index()).map(|h| h.origin)
    }

    pub fn find(&self, full_name: &str) -> Option<HandleId> {
        self.by_path.get(full_name).copied()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    #[inline(always)]
    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Drops every stored object. Later stores are refused.
    pub fn clear(&mut self) {
        log::debug!("[handle_store] clearing {} handles", self.arena.len());
        self.by_path.clear();
        self.arena.clear();
        self.cleared = true;
    }
}

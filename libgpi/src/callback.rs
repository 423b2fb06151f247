//! # Callback Table
//!
//! Owns every registered reaction and tracks the lifecycle of each callback.
//!
//! ```text
//!              register
//!                 │
//!                 ▼
//!            ┌─────────┐   remove()    ┌───────────┐
//!            │  Armed  │ ────────────> │ Cancelled │
//!            └─────────┘               └───────────┘
//!              │     ▲                       ▲
//!       fire() │     │ Rearm                 │ remove() while firing
//!              ▼     │                       │
//!            ┌─────────┐ ────────────────────┘
//!            │ Firing  │
//!            └─────────┘
//!                 │ Done / error
//!                 ▼
//!            ┌─────────┐
//!            │  Fired  │
//!            └─────────┘
//! ```
//!
//! Callbacks are addressed by generation-tagged [`CbId`]s. Adapters never see
//! the reaction: they hold a [`CallbackTrigger`] and call [`CallbackTrigger::fire`]
//! when the native event occurs. Any fire whose id is not `Armed` is an
//! identity mismatch and is fatal for the run.

use std::fmt;
use std::rc::Weak;

use crate::context::GpiContext;
use crate::error::{GpiError, GpiResult};
use crate::object::GpiCbHdl;
use crate::types::CallbackKind;
use crate::utils::idpool::{IdPool, SlotId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackState {
    Armed,
    Firing,
    Fired,
    Cancelled,
}

/// What a reaction asks for once it returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionOutcome {
    /// Retire the callback
    Done,
    /// Keep the callback armed for the next native event
    Rearm,
}

/// What the adapter must do with its native registration after a fire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FireOutcome {
    Finished,
    Rearmed,
}

/// User code run when a callback fires.
pub trait Reaction {
    fn react(&mut self, ctx: &GpiContext) -> GpiResult<ReactionOutcome>;

    fn describe(&self) -> String {
        "<native reaction>".to_string()
    }
}

impl<F> Reaction for F
where
    F: FnMut(&GpiContext) -> GpiResult<ReactionOutcome>,
{
    fn react(&mut self, ctx: &GpiContext) -> GpiResult<ReactionOutcome> {
        self(ctx)
    }
}

/// Boxes a closure as a [`Reaction`].
pub fn reaction_fn<F>(f: F) -> Box<dyn Reaction>
where
    F: FnMut(&GpiContext) -> GpiResult<ReactionOutcome> + 'static,
{
    Box::new(f)
}

/// Identity of one registered callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CbId(pub(crate) SlotId);

impl CbId {
    #[inline(always)]
    pub fn token(&self) -> u64 {
        self.0.to_token()
    }

    #[inline(always)]
    pub fn from_token(token: u64) -> Option<Self> {
        SlotId::from_token(token).map(CbId)
    }
}

impl fmt::Display for CbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb#{:#x}", self.token())
    }
}

/// Handed to an adapter at registration; firing it runs the reaction.
#[derive(Clone)]
pub struct CallbackTrigger {
    id: CbId,
    ctx: Weak<GpiContext>,
}

impl CallbackTrigger {
    pub(crate) fn new(id: CbId, ctx: Weak<GpiContext>) -> Self {
        Self { id, ctx }
    }

    #[inline(always)]
    pub fn id(&self) -> CbId {
        self.id
    }

    /// Runs the reaction. An `Err` means the run is being torn down and the
    /// adapter should drop its native registration.
    pub fn fire(&self) -> GpiResult<FireOutcome> {
        match self.ctx.upgrade() {
            Some(ctx) => ctx.fire_callback(self.id),
            None => Err(GpiError::CallbackCorrupted {
                token: self.id.token(),
                reason: "context is gone".to_string(),
            }),
        }
    }
}

impl fmt::Debug for CallbackTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackTrigger({})", self.id)
    }
}

struct CallbackEntry {
    id: CbId,
    kind: CallbackKind,
    state: CallbackState,
    reaction: Option<Box<dyn Reaction>>,
    native: Option<Box<dyn GpiCbHdl>>,
    fire_count: u64,
}

/// Callback slots indexed by [`SlotId::index`].
///
/// Retired entries stay in their slot with a terminal state until the slot
/// is reused, so a late fire can be diagnosed precisely.
#[derive(Default)]
pub struct CallbackTable {
    pool: IdPool,
    entries: Vec<Option<CallbackEntry>>,
    total_fired: u64,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: CallbackKind, reaction: Box<dyn Reaction>) -> CbId {
        let id = CbId(self.pool.alloc());
        let index = id.0.index as usize;
        if self.entries.len() <= index {
            self.entries.resize_with(index + 1, || None);
        }
        self.entries[index] = Some(CallbackEntry {
            id,
            kind,
            state: CallbackState::Armed,
            reaction: Some(reaction),
            native: None,
            fire_count: 0,
        });
        id
    }

    fn entry(&self, id: CbId) -> Option<&CallbackEntry> {
        self.entries
            .get(id.0.index as usize)
            .and_then(|e| e.as_ref())
            .filter(|e| e.id == id)
    }

    fn entry_mut(&mut self, id: CbId) -> Option<&mut CallbackEntry> {
        self.entries
            .get_mut(id.0.index as usize)
            .and_then(|e| e.as_mut())
            .filter(|e| e.id == id)
    }

    pub fn state(&self, id: CbId) -> Option<CallbackState> {
        self.entry(id).map(|e| e.state)
    }

    pub fn kind(&self, id: CbId) -> Option<CallbackKind> {
        self.entry(id).map(|e| e.kind)
    }

    pub fn fire_count(&self, id: CbId) -> u64 {
        self.entry(id).map_or(0, |e| e.fire_count)
    }

    /// Attaches the adapter's native resource to a freshly armed callback.
    ///
    /// A callback the adapter already fired to completion during its own
    /// registration gets nothing attached: the handle is handed back for the
    /// caller to clean up.
    pub fn attach_native(&mut self, id: CbId, native: Box<dyn GpiCbHdl>) -> Option<Box<dyn GpiCbHdl>> {
        match self.entry_mut(id) {
            Some(entry) if entry.state == CallbackState::Armed && entry.native.is_none() => {
                entry.native = Some(native);
                None
            }
            Some(entry) if entry.state == CallbackState::Fired => {
                log::debug!("[callback] {id} fired during registration, releasing its native handle");
                Some(native)
            }
            _ => {
                log::warn!("[callback] {id} is not armed, releasing its native handle");
                Some(native)
            }
        }
    }

    /// Drops a callback whose native registration was rejected.
    pub fn discard(&mut self, id: CbId) {
        if let Some(slot) = self.entries.get_mut(id.0.index as usize) {
            if slot.as_ref().is_some_and(|e| e.id == id) {
                *slot = None;
                self.pool.release(id.0);
            }
        }
    }

    /// `Armed -> Firing`, handing the reaction out for the duration of the fire.
    pub fn begin_fire(&mut self, id: CbId) -> GpiResult<Box<dyn Reaction>> {
        let corrupted = |reason: &str| GpiError::CallbackCorrupted {
            token: id.token(),
            reason: reason.to_string(),
        };

        let entry = self
            .entry_mut(id)
            .ok_or_else(|| corrupted("unknown or reused callback id"))?;

        match entry.state {
            CallbackState::Armed => {}
            CallbackState::Firing => return Err(corrupted("fired while already firing")),
            CallbackState::Fired => return Err(corrupted("fired after it already fired")),
            CallbackState::Cancelled => return Err(corrupted("fired after it was removed")),
        }

        let reaction = entry
            .reaction
            .take()
            .ok_or_else(|| corrupted("armed without a reaction"))?;
        entry.state = CallbackState::Firing;
        entry.fire_count += 1;
        self.total_fired += 1;
        Ok(reaction)
    }

    /// `Firing -> Armed | Fired`, or retires a callback removed mid-fire.
    ///
    /// Returns the native handle to clean up, if the callback retired.
    pub fn finish_fire(
        &mut self,
        id: CbId,
        reaction: Box<dyn Reaction>,
        outcome: ReactionOutcome,
    ) -> (FireOutcome, Option<Box<dyn GpiCbHdl>>) {
        let Some(entry) = self.entry_mut(id) else {
            return (FireOutcome::Finished, None);
        };

        match (entry.state, outcome) {
            (CallbackState::Firing, ReactionOutcome::Rearm) => {
                entry.state = CallbackState::Armed;
                entry.reaction = Some(reaction);
                (FireOutcome::Rearmed, None)
            }
            (CallbackState::Firing, ReactionOutcome::Done) => {
                entry.state = CallbackState::Fired;
                let native = entry.native.take();
                self.pool.release(id.0);
                (FireOutcome::Finished, native)
            }
            // removed by its own reaction
            _ => {
                let native = entry.native.take();
                self.pool.release(id.0);
                (FireOutcome::Finished, native)
            }
        }
    }

    /// Cancels an armed callback.
    ///
    /// Returns the native handle to deregister, `Ok(None)` when the removal
    /// is deferred to the end of the running fire, and `Err` if the id is
    /// not pending.
    pub fn cancel(&mut self, id: CbId) -> GpiResult<Option<Box<dyn GpiCbHdl>>> {
        let entry = self.entry_mut(id).ok_or(GpiError::CallbackCorrupted {
            token: id.token(),
            reason: "removed with an unknown or reused callback id".to_string(),
        })?;

        match entry.state {
            CallbackState::Armed => {
                entry.state = CallbackState::Cancelled;
                entry.reaction = None;
                let native = entry.native.take();
                self.pool.release(id.0);
                Ok(native)
            }
            CallbackState::Firing => {
                entry.state = CallbackState::Cancelled;
                Ok(None)
            }
            state => Err(GpiError::CallbackCorrupted {
                token: id.token(),
                reason: format!("removed while {state:?}"),
            }),
        }
    }

    /// Drains every pending callback at teardown.
    pub fn drain(&mut self) -> Vec<(CbId, Box<dyn GpiCbHdl>)> {
        let mut natives = Vec::new();
        for entry in self.entries.iter_mut().flatten() {
            if matches!(entry.state, CallbackState::Armed | CallbackState::Firing) {
                entry.state = CallbackState::Cancelled;
                entry.reaction = None;
                if let Some(native) = entry.native.take() {
                    natives.push((entry.id, native));
                }
                self.pool.release(entry.id.0);
            }
        }
        natives
    }

    #[inline(always)]
    pub fn pending(&self) -> usize {
        self.pool.live_count()
    }

    #[inline(always)]
    pub fn total_fired(&self) -> u64 {
        self.total_fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Box<dyn Reaction> {
        reaction_fn(|_| Ok(ReactionOutcome::Done))
    }

    #[test]
    fn test_one_shot_lifecycle() {
        let mut table = CallbackTable::new();
        let id = table.insert(CallbackKind::Timed, noop());
        assert_eq!(table.state(id), Some(CallbackState::Armed));

        let reaction = table.begin_fire(id).unwrap();
        assert_eq!(table.state(id), Some(CallbackState::Firing));

        let (outcome, _) = table.finish_fire(id, reaction, ReactionOutcome::Done);
        assert_eq!(outcome, FireOutcome::Finished);
        assert_eq!(table.state(id), Some(CallbackState::Fired));
        assert_eq!(table.pending(), 0);

        let err = table.begin_fire(id).err().unwrap();
        assert!(matches!(err, GpiError::CallbackCorrupted { .. }));
        assert!(err.to_string().contains("already fired"));
    }

    #[test]
    fn test_rearm_keeps_callback_armed() {
        let mut table = CallbackTable::new();
        let id = table.insert(CallbackKind::ReadWrite, noop());

        for _ in 0..3 {
            let reaction = table.begin_fire(id).unwrap();
            let (outcome, _) = table.finish_fire(id, reaction, ReactionOutcome::Rearm);
            assert_eq!(outcome, FireOutcome::Rearmed);
        }
        assert_eq!(table.fire_count(id), 3);
        assert_eq!(table.state(id), Some(CallbackState::Armed));
        assert_eq!(table.total_fired(), 3);
    }

    #[test]
    fn test_cancel_then_fire_is_mismatch() {
        let mut table = CallbackTable::new();
        let id = table.insert(CallbackKind::ReadOnly, noop());
        assert!(table.cancel(id).unwrap().is_none());
        assert_eq!(table.state(id), Some(CallbackState::Cancelled));

        let err = table.begin_fire(id).err().unwrap();
        assert!(err.to_string().contains("removed"));
        assert!(table.cancel(id).is_err());
    }

    #[test]
    fn test_cancel_during_fire_is_deferred() {
        let mut table = CallbackTable::new();
        let id = table.insert(CallbackKind::NextTime, noop());
        let reaction = table.begin_fire(id).unwrap();

        assert!(table.cancel(id).unwrap().is_none());
        let (outcome, _) = table.finish_fire(id, reaction, ReactionOutcome::Rearm);
        assert_eq!(outcome, FireOutcome::Finished);
        assert_eq!(table.pending(), 0);
    }

    struct CountingHdl(std::rc::Rc<std::cell::Cell<u32>>);

    impl GpiCbHdl for CountingHdl {
        fn repr(&self) -> String {
            "counting".to_string()
        }

        fn remove(self: Box<Self>) -> GpiResult<()> {
            Ok(())
        }

        fn cleanup(self: Box<Self>) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_attach_after_fire_hands_native_back() {
        let released = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut table = CallbackTable::new();

        let fired = table.insert(CallbackKind::ReadWrite, noop());
        let reaction = table.begin_fire(fired).unwrap();
        table.finish_fire(fired, reaction, ReactionOutcome::Done);
        let back = table.attach_native(fired, Box::new(CountingHdl(released.clone())));
        back.unwrap().cleanup();
        assert_eq!(released.get(), 1);
        assert_eq!(table.state(fired), Some(CallbackState::Fired));

        let rearmed = table.insert(CallbackKind::ReadWrite, noop());
        let reaction = table.begin_fire(rearmed).unwrap();
        table.finish_fire(rearmed, reaction, ReactionOutcome::Rearm);
        assert!(table.attach_native(rearmed, Box::new(CountingHdl(released.clone()))).is_none());

        let drained = table.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, rearmed);
    }

    #[test]
    fn test_reused_slot_rejects_stale_id() {
        let mut table = CallbackTable::new();
        let old = table.insert(CallbackKind::Timed, noop());
        table.cancel(old).unwrap();

        let new = table.insert(CallbackKind::Timed, noop());
        assert_ne!(old, new);
        assert_eq!(table.state(old), None);
        assert!(table.begin_fire(old).is_err());
        assert!(table.begin_fire(new).is_ok());
    }
}

//! # GPI Context
//!
//! The process-context object. It owns the adapter registry (and through it
//! the handle store), the callback table, the embedded runtime and the
//! execution lock, and is passed explicitly to every component that needs
//! them. The C surface reaches the per-thread instance through
//! [`get_gpi_context`]; tests build as many private instances as they like.
//!
//! ## Lifecycle
//!
//! ```text
//!  GpiContext::new ──> embed_init(argv) ──> sim_start() ──> ... run ...
//!                                                             │
//!        ┌──────────────── request_sim_end() / stop_sim() <───┘
//!        ▼
//!  control returns to the simulator ──> finalize()
//!        (clear store, drain callbacks, tear down runtime, statistics)
//! ```
//!
//! `finalize` runs at most once; every later call is a no-op.
//!
//! ## Re-entrancy
//!
//! User reactions call back into the context (lookups, value writes, new
//! registrations). The context therefore never keeps a `RefCell` borrow
//! alive across a call into an adapter or into user code.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use once_cell::unsync::OnceCell;

use crate::adapter::{GpiImpl, ImplId};
use crate::callback::{
    CallbackState, CallbackTable, CallbackTrigger, CbId, FireOutcome, Reaction, ReactionOutcome,
};
use crate::config::GpiConfig;
use crate::embed::EmbeddedRuntime;
use crate::error::{GpiError, GpiResult};
use crate::handle_store::HandleId;
use crate::logging::LuaLogSink;
use crate::object::{GpiCbHdl, GpiObjHdl, GpiSignalObjHdl};
use crate::registry::{IterId, Registry};
use crate::types::{CallbackKind, GpiEdge, GpiEvent, GpiIteratorSel, GpiSetAction};

// ────────────────────────────────────────────────────────────────────────────────
// Execution lock
// ────────────────────────────────────────────────────────────────────────────────

/// Which side currently runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlState {
    Simulator,
    User,
}

/// Exclusive execution lock of the embedded runtime.
///
/// Only one side runs at a time, so the lock is a re-entrant depth counter
/// plus the control marker. Takes and releases are counted so unbalanced
/// bracketing shows up in the statistics.
#[derive(Debug)]
pub struct ExecutionLock {
    depth: Cell<u32>,
    control: Cell<ControlState>,
    takes: Cell<u64>,
    releases: Cell<u64>,
    #[cfg(feature = "acc_time")]
    entered_at: Cell<Option<Instant>>,
    #[cfg(feature = "acc_time")]
    user_time: Cell<Duration>,
}

impl Default for ExecutionLock {
    fn default() -> Self {
        Self {
            depth: Cell::new(0),
            control: Cell::new(ControlState::Simulator),
            takes: Cell::new(0),
            releases: Cell::new(0),
            #[cfg(feature = "acc_time")]
            entered_at: Cell::new(None),
            #[cfg(feature = "acc_time")]
            user_time: Cell::new(Duration::ZERO),
        }
    }
}

impl ExecutionLock {
    fn acquire(&self) {
        let depth = self.depth.get();
        self.depth.set(depth + 1);
        self.takes.set(self.takes.get() + 1);
        if depth == 0 {
            log::trace!("Passing control to GPI user");
            self.control.set(ControlState::User);
            #[cfg(feature = "acc_time")]
            self.entered_at.set(Some(Instant::now()));
        }
    }

    /// Returns `true` when control went back to the simulator.
    fn release(&self) -> bool {
        let depth = self.depth.get();
        if depth == 0 {
            log::warn!("execution lock released while not held");
            return false;
        }
        self.depth.set(depth - 1);
        self.releases.set(self.releases.get() + 1);
        if depth == 1 {
            log::trace!("Returning control to simulator");
            self.control.set(ControlState::Simulator);
            #[cfg(feature = "acc_time")]
            if let Some(s) = self.entered_at.take() {
                self.user_time.set(self.user_time.get() + s.elapsed());
            }
            return true;
        }
        false
    }

    #[inline(always)]
    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    #[inline(always)]
    pub fn control(&self) -> ControlState {
        self.control.get()
    }

    pub fn takes(&self) -> u64 {
        self.takes.get()
    }

    pub fn releases(&self) -> u64 {
        self.releases.get()
    }

    /// Time spent on the user side, when measured.
    pub fn user_time(&self) -> Option<Duration> {
        #[cfg(feature = "acc_time")]
        {
            Some(self.user_time.get())
        }
        #[cfg(not(feature = "acc_time"))]
        {
            None
        }
    }
}

/// Holds the execution lock; dropping it hands control back.
pub struct UserGuard<'a> {
    ctx: &'a GpiContext,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        self.ctx.to_simulator();
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Context
// ────────────────────────────────────────────────────────────────────────────────

pub struct GpiContext {
    this: Weak<GpiContext>,
    config: GpiConfig,
    config_error: Option<GpiError>,
    registry: Registry,
    callbacks: RefCell<CallbackTable>,
    lock: ExecutionLock,
    runtime: RefCell<Option<Rc<EmbeddedRuntime>>>,
    embed_init_called: Cell<bool>,
    sim_ending: Cell<bool>,
    finalized: Cell<bool>,
    start_time: Instant,
}

thread_local! {
    static GPI_CONTEXT: OnceCell<Rc<GpiContext>> = const { OnceCell::new() };
}

/// The context of the calling thread, created from the environment on first use.
pub fn get_gpi_context() -> Rc<GpiContext> {
    GPI_CONTEXT.with(|cell| cell.get_or_init(GpiContext::from_env).clone())
}

/// The context of the calling thread, if one was created.
pub fn current_gpi_context() -> Option<Rc<GpiContext>> {
    GPI_CONTEXT
        .try_with(|cell| cell.get().cloned())
        .ok()
        .flatten()
}

impl GpiContext {
    pub fn new(config: GpiConfig) -> Rc<Self> {
        Self::build(config, None)
    }

    /// Builds the context from the process environment.
    ///
    /// An invalid environment still yields a context, with the default
    /// configuration, but [`GpiContext::embed_init`] refuses to start.
    pub fn from_env() -> Rc<Self> {
        match GpiConfig::from_env() {
            Ok(config) => Self::build(config, None),
            Err(e) => {
                log::error!("{e}");
                Self::build(GpiConfig::default(), Some(e))
            }
        }
    }

    fn build(config: GpiConfig, config_error: Option<GpiError>) -> Rc<Self> {
        if let Some(level) = config.log_level {
            crate::logging::set_level(level);
        }

        Rc::new_cyclic(|this| GpiContext {
            this: this.clone(),
            config,
            config_error,
            registry: Registry::new(),
            callbacks: RefCell::new(CallbackTable::new()),
            lock: ExecutionLock::default(),
            runtime: RefCell::new(None),
            embed_init_called: Cell::new(false),
            sim_ending: Cell::new(false),
            finalized: Cell::new(false),
            start_time: Instant::now(),
        })
    }

    #[inline(always)]
    pub fn config(&self) -> &GpiConfig {
        &self.config
    }

    #[inline(always)]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline(always)]
    pub fn lock(&self) -> &ExecutionLock {
        &self.lock
    }

    pub fn weak(&self) -> Weak<GpiContext> {
        self.this.clone()
    }

    #[inline(always)]
    pub fn is_sim_ending(&self) -> bool {
        self.sim_ending.get()
    }

    #[inline(always)]
    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    pub fn has_runtime(&self) -> bool {
        self.runtime.borrow().is_some()
    }

    pub fn runtime(&self) -> Option<Rc<EmbeddedRuntime>> {
        self.runtime.borrow().clone()
    }

    /// Log hooks of this context's runtime, if any.
    pub fn log_sink(&self) -> Option<LuaLogSink> {
        let runtime = self.runtime.try_borrow().ok()?.clone()?;
        runtime.log_sink()
    }

    // ── control handoff ─────────────────────────────────────────────────

    pub fn to_user(&self) {
        self.lock.acquire();
        crate::logging::enter_context(self.weak());
    }

    /// Hands control back; finalizes if a sim end was requested meanwhile.
    pub fn to_simulator(&self) {
        crate::logging::leave_context(&self.this);
        if self.lock.release() && self.sim_ending.get() {
            self.finalize();
        }
    }

    pub fn enter_user(&self) -> UserGuard<'_> {
        self.to_user();
        UserGuard { ctx: self }
    }

    // ── adapters ────────────────────────────────────────────────────────

    pub fn register_impl(&self, imp: Rc<dyn GpiImpl>) -> GpiResult<ImplId> {
        self.registry.register_impl(imp)
    }

    pub fn has_registered_impl(&self) -> bool {
        self.registry.impl_count() > 0
    }

    pub fn load_extra_libs(&self) {
        crate::loader::load_extra_libs(&self.config.extra_libs);
    }

    // ── simulator lifecycle ─────────────────────────────────────────────

    /// Starts the embedded runtime with the host's argv.
    pub fn embed_init(&self, argv: Vec<Vec<u8>>) -> GpiResult<()> {
        if let Some(e) = &self.config_error {
            return Err(e.clone());
        }
        if self.has_runtime() {
            log::error!("embedded runtime initialized again, ignoring");
            return Ok(());
        }
        let runtime = EmbeddedRuntime::new(&self.config, argv, self.weak())?;
        *self.runtime.borrow_mut() = Some(Rc::new(runtime));
        Ok(())
    }

    /// Loads the entry module and runs the user entry function.
    ///
    /// Failures are fatal to initialization: a diagnostic is printed and the
    /// simulator is told to end.
    pub fn sim_start(&self) {
        if self.embed_init_called.replace(true) {
            log::error!("GPI library initialized again, ignoring");
            return;
        }

        let runtime = self.runtime.borrow().clone();
        let Some(runtime) = runtime else {
            log::error!("{}", GpiError::RuntimeNotInitialized);
            eprintln!("gpi: {}", GpiError::RuntimeNotInitialized);
            self.request_sim_end();
            return;
        };

        let _user = self.enter_user();
        if let Err(e) = runtime.sim_init() {
            log::error!("failed to start the user entry: {e}");
            eprintln!("gpi: failed to start the user entry: {e}");
            self.request_sim_end();
        }
    }

    /// The simulator announced it is shutting down.
    pub fn stop_sim(&self) {
        let premature = !self.sim_ending.replace(true);
        if premature {
            self.sim_event(GpiEvent::SimFail, Some("Simulator shut down prematurely"));
        }
    }

    /// Asks the simulator to end, at most once and never after it stopped itself.
    pub fn request_sim_end(&self) {
        if self.sim_ending.replace(true) {
            return;
        }
        match self.registry.first_impl() {
            Ok(imp) => {
                log::debug!("requesting simulation end from {}", imp.name());
                imp.end_sim();
            }
            Err(e) => log::warn!("cannot end simulation: {e}"),
        }
    }

    /// Surfaces a simulator event to the user's event sink.
    pub fn sim_event(&self, level: GpiEvent, msg: Option<&str>) {
        let runtime = self.runtime.borrow().clone();
        let Some(runtime) = runtime else {
            return;
        };
        let msg = msg.unwrap_or("No message provided");

        let _user = self.enter_user();
        if let Err(e) = runtime.sim_event(level, msg) {
            log::error!("passing event to upper layer failed: {e}");
        }
    }

    /// Tears down the embedded runtime. Safe to call any number of times.
    pub fn cleanup_runtime(&self) {
        let runtime = self.runtime.borrow_mut().take();
        if let Some(runtime) = runtime {
            let _user = self.enter_user();
            runtime.cleanup();
        }
    }

    /// End-of-run teardown. Later calls are no-ops.
    pub fn finalize(&self) {
        if self.finalized.replace(true) {
            log::debug!("GpiContext::finalize() called twice");
            return;
        }
        self.sim_ending.set(true);

        let pending = self.callbacks.borrow_mut().drain();
        for (id, native) in pending {
            log::trace!("retiring pending callback {id}: {}", native.repr());
            native.cleanup();
        }

        let handles = self.registry.handle_count();
        self.registry.clear_store();
        self.cleanup_runtime();
        self.print_statistics(handles);
    }

    /// Unrecoverable failure: report, end the simulation, tear down.
    pub fn fatal(&self, err: &GpiError) {
        log::error!("fatal: {err}");
        if self.finalized.get() {
            return;
        }
        eprintln!("gpi: fatal: {err}");
        self.request_sim_end();
        if self.lock.depth() == 0 {
            self.finalize();
        }
    }

    fn print_statistics(&self, handles: usize) {
        use tabled::{
            builder::Builder,
            settings::{Alignment, Panel, Style, Width, object::Rows},
        };

        let total_time = self.start_time.elapsed();
        let fired = self.callbacks.borrow().total_fired();

        let mut builder = Builder::new();
        builder.push_record(["total_time_taken", "user_time_taken", "callbacks_fired", "handles"]);
        builder.push_record([
            format!("{:.2} sec", total_time.as_secs_f64()),
            self.lock
                .user_time()
                .map_or("--".to_string(), |t| format!("{:.2} sec", t.as_secs_f64())),
            fired.to_string(),
            handles.to_string(),
        ]);

        let mut table = builder.build();
        table
            .with(Panel::header("GPI STATISTIC"))
            .with(Alignment::center())
            .with(Style::modern())
            .modify(Rows::new(0..), Width::increase(18));

        log::info!("\n{table}");
        if self.lock.takes() != self.lock.releases() {
            log::warn!(
                "unbalanced execution lock: {} takes, {} releases",
                self.lock.takes(),
                self.lock.releases()
            );
        }
    }

    // ── callbacks ───────────────────────────────────────────────────────

    fn register_with<F>(
        &self,
        kind: CallbackKind,
        reaction: Box<dyn Reaction>,
        arm: F,
    ) -> GpiResult<CbId>
    where
        F: FnOnce(CallbackTrigger) -> GpiResult<Box<dyn GpiCbHdl>>,
    {
        if self.finalized.get() {
            return Err(GpiError::StoreCleared);
        }

        let id = self.callbacks.borrow_mut().insert(kind, reaction);
        let trigger = CallbackTrigger::new(id, self.weak());

        match arm(trigger) {
            Ok(native) => {
                #[cfg(feature = "debug")]
                log::debug!("[{kind}] armed {id} as {}", native.repr());
                let rejected = self.callbacks.borrow_mut().attach_native(id, native);
                if let Some(native) = rejected {
                    native.cleanup();
                }
                Ok(id)
            }
            Err(e) => {
                log::warn!("[{kind}] registration failed: {e}");
                self.callbacks.borrow_mut().discard(id);
                Err(e)
            }
        }
    }

    pub fn register_timed_callback(&self, time: u64, reaction: Box<dyn Reaction>) -> GpiResult<CbId> {
        let imp = self.registry.first_impl()?;
        self.register_with(CallbackKind::Timed, reaction, |t| {
            imp.register_timed_callback(time, t)
        })
    }

    pub fn register_readonly_callback(&self, reaction: Box<dyn Reaction>) -> GpiResult<CbId> {
        let imp = self.registry.first_impl()?;
        self.register_with(CallbackKind::ReadOnly, reaction, |t| {
            imp.register_readonly_callback(t)
        })
    }

    pub fn register_nexttime_callback(&self, reaction: Box<dyn Reaction>) -> GpiResult<CbId> {
        let imp = self.registry.first_impl()?;
        self.register_with(CallbackKind::NextTime, reaction, |t| {
            imp.register_nexttime_callback(t)
        })
    }

    pub fn register_readwrite_callback(&self, reaction: Box<dyn Reaction>) -> GpiResult<CbId> {
        let imp = self.registry.first_impl()?;
        self.register_with(CallbackKind::ReadWrite, reaction, |t| {
            imp.register_readwrite_callback(t)
        })
    }

    pub fn register_value_change_callback(
        &self,
        handle: HandleId,
        edge: GpiEdge,
        reaction: Box<dyn Reaction>,
    ) -> GpiResult<CbId> {
        let obj = self.signal(handle)?;
        let sig = obj
            .as_signal()
            .ok_or_else(|| GpiError::NotASignal(obj.full_name().to_string()))?;
        self.register_with(CallbackKind::ValueChange, reaction, |t| {
            sig.register_value_change_callback(edge, t)
        })
    }

    /// Cancels a callback that has not fired yet.
    pub fn remove_callback(&self, id: CbId) -> GpiResult<()> {
        let native = self.callbacks.borrow_mut().cancel(id)?;
        match native {
            Some(native) => native.remove(),
            None => Ok(()),
        }
    }

    pub fn callback_state(&self, id: CbId) -> Option<CallbackState> {
        self.callbacks.borrow().state(id)
    }

    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.borrow().pending()
    }

    pub fn callbacks_fired(&self) -> u64 {
        self.callbacks.borrow().total_fired()
    }

    /// Entry point of [`CallbackTrigger::fire`].
    pub(crate) fn fire_callback(&self, id: CbId) -> GpiResult<FireOutcome> {
        let begun = self.callbacks.borrow_mut().begin_fire(id);
        let mut reaction = match begun {
            Ok(reaction) => reaction,
            Err(e) => {
                self.fatal(&e);
                return Err(e);
            }
        };

        let user = self.enter_user();
        let result = reaction.react(self);

        let outcome = match &result {
            Ok(outcome) => *outcome,
            Err(_) => ReactionOutcome::Done,
        };
        let (fired, native) = self.callbacks.borrow_mut().finish_fire(id, reaction, outcome);
        if let Some(native) = native {
            native.cleanup();
        }

        let ret = match result {
            Ok(_) => Ok(fired),
            Err(e) => {
                let e = GpiError::Reaction(e.to_string());
                self.fatal(&e);
                Err(e)
            }
        };
        drop(user);
        ret
    }

    // ── handles ─────────────────────────────────────────────────────────

    pub fn get_root_handle(&self, name: Option<&str>) -> Option<HandleId> {
        self.registry.get_root_handle(name)
    }

    pub fn get_handle_by_name(&self, parent: HandleId, name: &str) -> Option<HandleId> {
        self.registry.get_handle_by_name(parent, name)
    }

    pub fn get_handle_by_index(&self, parent: HandleId, index: i32) -> Option<HandleId> {
        self.registry.get_handle_by_index(parent, index)
    }

    pub fn iterate(&self, parent: Option<HandleId>, sel: GpiIteratorSel) -> Option<IterId> {
        self.registry.iterate(parent, sel)
    }

    pub fn next(&self, iter: IterId) -> GpiResult<Option<HandleId>> {
        self.registry.next(iter)
    }

    pub fn object(&self, handle: HandleId) -> GpiResult<Rc<dyn GpiObjHdl>> {
        self.registry.object(handle)
    }

    /// The object behind `handle`, checked to carry a value.
    pub fn signal(&self, handle: HandleId) -> GpiResult<Rc<dyn GpiObjHdl>> {
        let obj = self.registry.object(handle)?;
        if obj.as_signal().is_none() {
            return Err(GpiError::NotASignal(obj.full_name().to_string()));
        }
        Ok(obj)
    }

    // ── values ──────────────────────────────────────────────────────────

    pub fn get_signal_value_binstr(&self, handle: HandleId) -> GpiResult<String> {
        let obj = self.signal(handle)?;
        let value = with_signal(&*obj, |s| s.value_binstr())?;
        Ok(value.to_ascii_uppercase())
    }

    pub fn get_signal_value_str(&self, handle: HandleId) -> GpiResult<Vec<u8>> {
        let obj = self.signal(handle)?;
        with_signal(&*obj, |s| s.value_str())
    }

    pub fn get_signal_value_real(&self, handle: HandleId) -> GpiResult<f64> {
        let obj = self.signal(handle)?;
        with_signal(&*obj, |s| s.value_real())
    }

    pub fn get_signal_value_long(&self, handle: HandleId) -> GpiResult<i64> {
        let obj = self.signal(handle)?;
        with_signal(&*obj, |s| s.value_long())
    }

    pub fn set_signal_value_int(&self, handle: HandleId, value: i32, action: GpiSetAction) -> GpiResult<()> {
        let obj = self.signal(handle)?;
        with_signal(&*obj, |s| s.set_value_int(value, action))
    }

    pub fn set_signal_value_real(&self, handle: HandleId, value: f64, action: GpiSetAction) -> GpiResult<()> {
        let obj = self.signal(handle)?;
        with_signal(&*obj, |s| s.set_value_real(value, action))
    }

    pub fn set_signal_value_str(&self, handle: HandleId, value: &[u8], action: GpiSetAction) -> GpiResult<()> {
        let obj = self.signal(handle)?;
        with_signal(&*obj, |s| s.set_value_str(value, action))
    }

    pub fn set_signal_value_binstr(&self, handle: HandleId, value: &str, action: GpiSetAction) -> GpiResult<()> {
        let obj = self.signal(handle)?;
        with_signal(&*obj, |s| s.set_value_binstr(value, action))
    }

    // ── simulator metadata ──────────────────────────────────────────────

    pub fn sim_time(&self) -> GpiResult<u64> {
        self.registry.sim_time()
    }

    pub fn sim_precision(&self) -> GpiResult<i32> {
        self.registry.sim_precision()
    }

    pub fn simulator_product(&self) -> GpiResult<String> {
        self.registry.simulator_product()
    }

    pub fn simulator_version(&self) -> GpiResult<String> {
        self.registry.simulator_version()
    }
}

fn with_signal<T>(
    obj: &dyn GpiObjHdl,
    f: impl FnOnce(&dyn GpiSignalObjHdl) -> GpiResult<T>,
) -> GpiResult<T> {
    match obj.as_signal() {
        Some(sig) => f(sig),
        None => Err(GpiError::NotASignal(obj.full_name().to_string())),
    }
}

impl Drop for GpiContext {
    fn drop(&mut self) {
        log::trace!("GpiContext::drop()");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::reaction_fn;
    use crate::testing::SimImpl;

    fn context_with_sim() -> (Rc<GpiContext>, Rc<SimImpl>) {
        let ctx = GpiContext::new(GpiConfig::default());
        let sim = Rc::new(SimImpl::new("sim"));
        ctx.register_impl(sim.clone()).unwrap();
        (ctx, sim)
    }

    #[test]
    fn test_lock_brackets_user_code() {
        let (ctx, _sim) = context_with_sim();
        assert_eq!(ctx.lock().control(), ControlState::Simulator);
        {
            let _outer = ctx.enter_user();
            let _inner = ctx.enter_user();
            assert_eq!(ctx.lock().depth(), 2);
            assert_eq!(ctx.lock().control(), ControlState::User);
        }
        assert_eq!(ctx.lock().control(), ControlState::Simulator);
        assert_eq!(ctx.lock().takes(), ctx.lock().releases());
    }

    #[test]
    fn test_request_sim_end_once() {
        let (ctx, sim) = context_with_sim();
        ctx.request_sim_end();
        ctx.request_sim_end();
        assert_eq!(sim.end_sim_calls(), 1);
    }

    #[test]
    fn test_invalid_environment_refuses_to_start() {
        let err = GpiError::Config("GPI_ATTACH must be set to an integer base 10 or omitted".into());
        let ctx = GpiContext::build(GpiConfig::default(), Some(err));
        assert!(matches!(ctx.embed_init(vec![]), Err(GpiError::Config(_))));
        assert!(!ctx.has_runtime());
    }

    #[test]
    fn test_no_end_sim_after_simulator_stopped() {
        let (ctx, sim) = context_with_sim();
        ctx.stop_sim();
        ctx.request_sim_end();
        assert_eq!(sim.end_sim_calls(), 0);
        assert!(ctx.is_sim_ending());
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let (ctx, sim) = context_with_sim();
        sim.add_module("top");
        let top = ctx.get_root_handle(None).unwrap();
        ctx.register_readonly_callback(reaction_fn(|_| Ok(ReactionOutcome::Done)))
            .unwrap();

        ctx.finalize();
        ctx.finalize();
        assert!(ctx.is_finalized());
        assert_eq!(ctx.pending_callbacks(), 0);
        assert_eq!(sim.pending_registrations(), 0);
        assert!(matches!(ctx.object(top), Err(GpiError::StoreCleared)));
    }

    #[test]
    fn test_end_requested_inside_user_code_finalizes_on_return() {
        let (ctx, sim) = context_with_sim();
        ctx.register_timed_callback(
            5,
            reaction_fn(|ctx| {
                ctx.request_sim_end();
                assert!(!ctx.is_finalized());
                Ok(ReactionOutcome::Done)
            }),
        )
        .unwrap();

        sim.advance(5);
        assert_eq!(sim.end_sim_calls(), 1);
        assert!(ctx.is_finalized());
    }

    #[test]
    fn test_failed_reaction_is_fatal() {
        let (ctx, sim) = context_with_sim();
        let id = ctx
            .register_timed_callback(
                1,
                reaction_fn(|_| Err(GpiError::Reaction("boom".into()))),
            )
            .unwrap();

        sim.advance(1);
        assert_eq!(ctx.callback_state(id), Some(CallbackState::Fired));
        assert!(ctx.is_sim_ending());
        assert!(ctx.is_finalized());
        assert_eq!(sim.end_sim_calls(), 1);
    }

    #[test]
    fn test_rejected_registration_is_discarded() {
        let (ctx, sim) = context_with_sim();
        sim.reject_registrations(true);
        let err = ctx
            .register_readwrite_callback(reaction_fn(|_| Ok(ReactionOutcome::Done)))
            .unwrap_err();
        assert!(matches!(err, GpiError::RegistrationFailed { .. }));
        assert_eq!(ctx.pending_callbacks(), 0);
    }
}

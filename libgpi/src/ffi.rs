//! # C surface
//!
//! Entry points called by the host simulator glue and by vendor adapters
//! written against the C ABI. Every function works on the calling thread's
//! [`GpiContext`](crate::context::GpiContext).
//!
//! Handles, iterators and callbacks cross the boundary as `long long`
//! tokens, `0` being the null token. Failures are logged and reported with a
//! sentinel: `0` for tokens, `-1` for status codes, a null pointer for
//! strings.
//!
//! Returned strings are owned by the library. Names and type strings stay
//! valid for the whole run; signal value strings stay valid until the next
//! value query.

use std::rc::Rc;

use libc::{c_char, c_double, c_int, c_longlong, c_void};

use crate::adapter::GpiImpl;
use crate::callback::{CbId, Reaction, ReactionOutcome};
use crate::context::{GpiContext, get_gpi_context};
use crate::error::{GpiError, GpiResult};
use crate::handle_store::HandleId;
use crate::registry::IterId;
use crate::types::{GpiEdge, GpiEvent, GpiIteratorSel, GpiRangeDir, GpiSetAction};
use crate::utils;

/// User function of a C callback. `0` retires the callback, a positive value
/// re-arms it and a negative value reports a failure.
pub type GpiCallbackFn = unsafe extern "C" fn(user_data: *mut c_void) -> c_int;

struct CReaction {
    func: GpiCallbackFn,
    user_data: *mut c_void,
}

impl Reaction for CReaction {
    fn react(&mut self, _ctx: &GpiContext) -> GpiResult<ReactionOutcome> {
        match unsafe { (self.func)(self.user_data) } {
            0 => Ok(ReactionOutcome::Done),
            r if r > 0 => Ok(ReactionOutcome::Rearm),
            r => Err(GpiError::Reaction(format!("C callback returned {r}"))),
        }
    }

    fn describe(&self) -> String {
        format!("<C function {:p}>", self.func as *const c_void)
    }
}

#[inline(always)]
fn handle(token: c_longlong) -> Option<HandleId> {
    HandleId::from_token(token as u64)
}

#[inline(always)]
fn tok(id: Option<HandleId>) -> c_longlong {
    id.map_or(0, |h| h.token() as c_longlong)
}

/// Logs `err` under `func` and returns `fallback`.
fn report<T>(func: &str, err: GpiError, fallback: T) -> T {
    log::error!("[{func}] {err}");
    fallback
}

fn with_handle<T>(func: &str, token: c_longlong, fallback: T, f: impl FnOnce(&GpiContext, HandleId) -> GpiResult<T>) -> T {
    let ctx = get_gpi_context();
    let result = handle(token)
        .ok_or(GpiError::InvalidHandle(token))
        .and_then(|h| f(&ctx, h));
    result.unwrap_or_else(|e| report(func, e, fallback))
}

fn cb_token(func: &str, result: GpiResult<CbId>) -> c_longlong {
    match result {
        Ok(id) => id.token() as c_longlong,
        Err(e) => report(func, e, 0),
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ────────────────────────────────────────────────────────────────────────────────

/// Starts the embedded runtime. Returns `0` on success.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpi_embed_init(argc: c_int, argv: *const *const c_char) -> c_int {
    let argv = unsafe { utils::c_argv(argc, argv) };
    match get_gpi_context().embed_init(argv) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("gpi: failed to initialize the embedded runtime: {e}");
            report("gpi_embed_init", e, -1)
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_sim_start() {
    get_gpi_context().sim_start();
}

/// The simulator is shutting down on its own.
#[unsafe(no_mangle)]
pub extern "C" fn gpi_sim_stop() {
    get_gpi_context().stop_sim();
}

/// Asks the simulator to end the run.
#[unsafe(no_mangle)]
pub extern "C" fn gpi_sim_end() {
    get_gpi_context().request_sim_end();
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpi_sim_event(level: c_int, msg: *const c_char) {
    let Ok(level) = GpiEvent::try_from(level) else {
        log::error!("[gpi_sim_event] unknown event level {level}");
        return;
    };
    let msg = unsafe { utils::c_str(msg) };
    get_gpi_context().sim_event(level, msg);
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_cleanup() {
    get_gpi_context().finalize();
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_to_user() {
    get_gpi_context().to_user();
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_to_simulator() {
    get_gpi_context().to_simulator();
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_load_extra_libs() {
    get_gpi_context().load_extra_libs();
}

/// Registers an adapter passed as `Box::into_raw(Box::new(boxed_impl))`.
/// Ownership moves to the library even when registration fails.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpi_register_impl(imp: *mut Box<dyn GpiImpl>) -> c_int {
    if imp.is_null() {
        log::error!("[gpi_register_impl] null implementation");
        return -1;
    }
    let imp: Rc<dyn GpiImpl> = Rc::from(*unsafe { Box::from_raw(imp) });
    match get_gpi_context().register_impl(imp) {
        Ok(_) => 0,
        Err(e) => report("gpi_register_impl", e, -1),
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Hierarchy
// ────────────────────────────────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpi_get_root_handle(name: *const c_char) -> c_longlong {
    let name = unsafe { utils::c_str(name) };
    tok(get_gpi_context().get_root_handle(name))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpi_get_handle_by_name(parent: c_longlong, name: *const c_char) -> c_longlong {
    let Some(name) = (unsafe { utils::c_str(name) }) else {
        return report("gpi_get_handle_by_name", GpiError::Config("null or invalid name".into()), 0);
    };
    with_handle("gpi_get_handle_by_name", parent, 0, |ctx, p| {
        Ok(tok(ctx.get_handle_by_name(p, name)))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_get_handle_by_index(parent: c_longlong, index: c_int) -> c_longlong {
    with_handle("gpi_get_handle_by_index", parent, 0, |ctx, p| {
        Ok(tok(ctx.get_handle_by_index(p, index)))
    })
}

/// `parent` may be `0` only for package scopes.
#[unsafe(no_mangle)]
pub extern "C" fn gpi_iterate(parent: c_longlong, sel: c_int) -> c_longlong {
    let Ok(sel) = GpiIteratorSel::try_from(sel) else {
        log::error!("[gpi_iterate] unknown iterator selector {sel}");
        return 0;
    };
    get_gpi_context()
        .iterate(handle(parent), sel)
        .map_or(0, |it| it.token() as c_longlong)
}

/// Next handle of `iter`, `0` once exhausted. The iterator token is dead
/// after the `0`.
#[unsafe(no_mangle)]
pub extern "C" fn gpi_next(iter: c_longlong) -> c_longlong {
    let result = IterId::from_token(iter as u64)
        .ok_or(GpiError::InvalidIterator(iter))
        .and_then(|it| get_gpi_context().next(it));
    match result {
        Ok(h) => tok(h),
        Err(e) => report("gpi_next", e, 0),
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Object queries
// ────────────────────────────────────────────────────────────────────────────────

macro_rules! impl_gen_str_query {
    ($($name:ident => |$obj:ident| $body:expr),* $(,)?) => {
        paste::paste! {
            $(
                #[unsafe(no_mangle)]
                pub extern "C" fn [<gpi_get_ $name>](h: c_longlong) -> *const c_char {
                    with_handle(stringify!([<gpi_get_ $name>]), h, std::ptr::null(), |ctx, h| {
                        let $obj = ctx.object(h)?;
                        let s: Option<&str> = $body;
                        Ok(s.map_or(std::ptr::null(), utils::intern))
                    })
                }
            )*
        }
    };
}

impl_gen_str_query! {
    name_str => |obj| Some(obj.name()),
    fullname_str => |obj| Some(obj.full_name()),
    type_str => |obj| Some(obj.type_str()),
    definition_name => |obj| obj.definition_name(),
    definition_file => |obj| obj.definition_file(),
}

macro_rules! impl_gen_int_query {
    ($($name:ident -> $ret:ty => |$obj:ident| $body:expr),* $(,)?) => {
        paste::paste! {
            $(
                #[unsafe(no_mangle)]
                pub extern "C" fn [<gpi_get_ $name>](h: c_longlong) -> $ret {
                    with_handle(stringify!([<gpi_get_ $name>]), h, -1, |ctx, h| {
                        let $obj = ctx.object(h)?;
                        Ok($body)
                    })
                }
            )*
        }
    };
}

impl_gen_int_query! {
    object_type -> c_int => |obj| obj.kind() as c_int,
    num_elems -> c_int => |obj| obj.num_elems(),
    range_left -> c_int => |obj| obj.range_left(),
    range_right -> c_int => |obj| obj.range_right(),
    range_dir -> c_int => |obj| obj.range_dir() as c_int,
    is_constant -> c_int => |obj| obj.is_const() as c_int,
    is_indexable -> c_int => |obj| obj.is_indexable() as c_int,
}

// ────────────────────────────────────────────────────────────────────────────────
// Signal values
// ────────────────────────────────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn gpi_get_signal_value_binstr(h: c_longlong) -> *const c_char {
    with_handle("gpi_get_signal_value_binstr", h, std::ptr::null(), |ctx, h| {
        Ok(utils::scratch(ctx.get_signal_value_binstr(h)?))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_get_signal_value_str(h: c_longlong) -> *const c_char {
    with_handle("gpi_get_signal_value_str", h, std::ptr::null(), |ctx, h| {
        Ok(utils::scratch(ctx.get_signal_value_str(h)?))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_get_signal_value_real(h: c_longlong) -> c_double {
    with_handle("gpi_get_signal_value_real", h, 0.0, |ctx, h| ctx.get_signal_value_real(h))
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_get_signal_value_long(h: c_longlong) -> c_longlong {
    with_handle("gpi_get_signal_value_long", h, 0, |ctx, h| ctx.get_signal_value_long(h))
}

fn set_action(action: c_int) -> GpiResult<GpiSetAction> {
    GpiSetAction::try_from(action).map_err(|_| GpiError::InvalidValue {
        what: "set action",
        value: action.to_string(),
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_set_signal_value_int(h: c_longlong, value: c_int, action: c_int) -> c_int {
    with_handle("gpi_set_signal_value_int", h, -1, |ctx, h| {
        ctx.set_signal_value_int(h, value, set_action(action)?).map(|_| 0)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_set_signal_value_real(h: c_longlong, value: c_double, action: c_int) -> c_int {
    with_handle("gpi_set_signal_value_real", h, -1, |ctx, h| {
        ctx.set_signal_value_real(h, value, set_action(action)?).map(|_| 0)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpi_set_signal_value_str(h: c_longlong, value: *const c_char, action: c_int) -> c_int {
    let value = unsafe { utils::c_bytes(value) };
    with_handle("gpi_set_signal_value_str", h, -1, |ctx, h| {
        let value = value.ok_or(GpiError::InvalidValue {
            what: "string value",
            value: "NULL".into(),
        })?;
        ctx.set_signal_value_str(h, value, set_action(action)?).map(|_| 0)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpi_set_signal_value_binstr(h: c_longlong, value: *const c_char, action: c_int) -> c_int {
    let value = unsafe { utils::c_str(value) };
    with_handle("gpi_set_signal_value_binstr", h, -1, |ctx, h| {
        let value = value.ok_or(GpiError::InvalidValue {
            what: "binary string",
            value: "NULL".into(),
        })?;
        ctx.set_signal_value_binstr(h, value, set_action(action)?).map(|_| 0)
    })
}

// ────────────────────────────────────────────────────────────────────────────────
// Callbacks
// ────────────────────────────────────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn gpi_register_timed_callback(func: GpiCallbackFn, user_data: *mut c_void, time: u64) -> c_longlong {
    let reaction = Box::new(CReaction { func, user_data });
    cb_token(
        "gpi_register_timed_callback",
        get_gpi_context().register_timed_callback(time, reaction),
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_register_value_change_callback(
    func: GpiCallbackFn,
    user_data: *mut c_void,
    h: c_longlong,
    edge: c_int,
) -> c_longlong {
    let result = GpiEdge::try_from(edge)
        .map_err(|_| GpiError::InvalidValue {
            what: "edge",
            value: edge.to_string(),
        })
        .and_then(|edge| {
            let h = handle(h).ok_or(GpiError::InvalidHandle(h))?;
            let reaction = Box::new(CReaction { func, user_data });
            get_gpi_context().register_value_change_callback(h, edge, reaction)
        });
    cb_token("gpi_register_value_change_callback", result)
}

// Generated:
//      gpi_register_readonly_callback
//      gpi_register_nexttime_callback
//      gpi_register_readwrite_callback
macro_rules! impl_gen_register_phase_callback {
    ($($phase:ident),*) => {
        paste::paste! {
            $(
                #[unsafe(no_mangle)]
                pub extern "C" fn [<gpi_register_ $phase _callback>](func: GpiCallbackFn, user_data: *mut c_void) -> c_longlong {
                    let reaction = Box::new(CReaction { func, user_data });
                    cb_token(
                        stringify!([<gpi_register_ $phase _callback>]),
                        get_gpi_context().[<register_ $phase _callback>](reaction),
                    )
                }
            )*
        }
    };
}

impl_gen_register_phase_callback!(readonly, nexttime, readwrite);

/// Removes a callback that has not fired yet. Returns `0` on success.
#[unsafe(no_mangle)]
pub extern "C" fn gpi_remove_cb(cb: c_longlong) -> c_int {
    let result = CbId::from_token(cb as u64)
        .ok_or(GpiError::CallbackCorrupted {
            token: cb as u64,
            reason: "not a callback token".into(),
        })
        .and_then(|id| get_gpi_context().remove_callback(id));
    match result {
        Ok(()) => 0,
        Err(e) => report("gpi_remove_cb", e, -1),
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Simulator metadata
// ────────────────────────────────────────────────────────────────────────────────

/// Splits the current time into two 32-bit words.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpi_get_sim_time(high: *mut u32, low: *mut u32) {
    let t = get_gpi_context()
        .sim_time()
        .unwrap_or_else(|e| report("gpi_get_sim_time", e, 0));
    unsafe {
        if !high.is_null() {
            *high = (t >> 32) as u32;
        }
        if !low.is_null() {
            *low = t as u32;
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gpi_get_sim_precision(precision: *mut i32) {
    let p = get_gpi_context()
        .sim_precision()
        .unwrap_or_else(|e| report("gpi_get_sim_precision", e, 0));
    if !precision.is_null() {
        unsafe { *precision = p };
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_get_simulator_product() -> *const c_char {
    match get_gpi_context().simulator_product() {
        Ok(s) => utils::intern(&s),
        Err(e) => report("gpi_get_simulator_product", e, std::ptr::null()),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn gpi_get_simulator_version() -> *const c_char {
    match get_gpi_context().simulator_version() {
        Ok(s) => utils::intern(&s),
        Err(e) => report("gpi_get_simulator_version", e, std::ptr::null()),
    }
}

/// Direction constants for C callers comparing [`gpi_get_range_dir`].
pub const GPI_RANGE_DOWN: c_int = GpiRangeDir::Down as c_int;
pub const GPI_RANGE_NO_DIR: c_int = GpiRangeDir::NoDir as c_int;
pub const GPI_RANGE_UP: c_int = GpiRangeDir::Up as c_int;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimImpl;

    // The C surface works on the thread's context, and each test runs on its
    // own thread, so every test sees a fresh context.
    fn setup() -> Rc<SimImpl> {
        let sim = Rc::new(SimImpl::new("sim"));
        sim.add_module("top");
        sim.add_signal("top.data", 8);
        let boxed: Box<dyn GpiImpl> = Box::new(sim.clone());
        assert_eq!(unsafe { gpi_register_impl(Box::into_raw(Box::new(boxed))) }, 0);
        sim
    }

    unsafe extern "C" fn count_twice(data: *mut c_void) -> c_int {
        let hits = unsafe { &mut *(data as *mut u32) };
        *hits += 1;
        (*hits < 2) as c_int
    }

    #[test]
    fn test_handles_and_values_through_c() {
        let _sim = setup();
        let top = unsafe { gpi_get_root_handle(std::ptr::null()) };
        assert_ne!(top, 0);
        let data = unsafe { gpi_get_handle_by_name(top, c"data".as_ptr()) };
        assert_ne!(data, 0);
        assert_eq!(data, unsafe { gpi_get_handle_by_name(top, c"data".as_ptr()) });
        assert_eq!(unsafe { gpi_get_handle_by_name(top, c"nope".as_ptr()) }, 0);

        assert_eq!(unsafe { utils::c_str(gpi_get_fullname_str(data)) }, Some("top.data"));
        assert_eq!(unsafe { utils::c_str(gpi_get_type_str(data)) }, Some("GPI_LOGIC_ARRAY"));
        assert_eq!(gpi_get_num_elems(data), 8);
        assert_eq!(gpi_get_range_dir(data), GPI_RANGE_DOWN);

        assert_eq!(gpi_set_signal_value_int(data, 0x5a, GpiSetAction::Deposit as c_int), 0);
        assert_eq!(gpi_get_signal_value_long(data), 0x5a);
        assert_eq!(unsafe { utils::c_str(gpi_get_signal_value_binstr(data)) }, Some("01011010"));
        assert_eq!(gpi_set_signal_value_int(data, 1, 99), -1);
        assert_eq!(gpi_get_num_elems(0), -1);
    }

    #[test]
    fn test_c_callback_rearms_on_positive_return() {
        let sim = setup();
        let mut hits: u32 = 0;
        let cb = gpi_register_readwrite_callback(count_twice, &mut hits as *mut u32 as *mut c_void);
        assert_ne!(cb, 0);

        sim.advance(1);
        sim.advance(1);
        sim.advance(1);
        assert_eq!(hits, 2);
        assert_eq!(gpi_remove_cb(cb), -1);
        assert_eq!(gpi_remove_cb(0), -1);
    }

    #[test]
    fn test_sim_time_words() {
        let sim = setup();
        sim.advance(0x1_0000_0002);
        let (mut high, mut low) = (0u32, 0u32);
        unsafe { gpi_get_sim_time(&mut high, &mut low) };
        assert_eq!((high, low), (1, 2));
    }
}

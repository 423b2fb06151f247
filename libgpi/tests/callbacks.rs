use std::cell::{Cell, RefCell};
use std::rc::Rc;

use gpi::config::GpiConfig;
use gpi::testing::SimImpl;
use gpi::types::{GpiEdge, GpiSetAction};
use gpi::{CallbackState, CbId, GpiContext, GpiError, ReactionOutcome, reaction_fn};

fn setup() -> (Rc<GpiContext>, Rc<SimImpl>) {
    let ctx = GpiContext::new(GpiConfig::default());
    let sim = Rc::new(SimImpl::new("sim"));
    sim.add_module("top");
    sim.add_signal("top.clk", 1);
    sim.add_signal("top.count", 8);
    ctx.register_impl(sim.clone()).unwrap();
    (ctx, sim)
}

#[test]
fn timed_callback_fires_once_with_its_data() {
    let (ctx, sim) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let data = 0xD;
    let log = seen.clone();
    ctx.register_timed_callback(
        10,
        reaction_fn(move |ctx| {
            log.borrow_mut().push((data, ctx.sim_time()?));
            Ok(ReactionOutcome::Done)
        }),
    )
    .unwrap();

    sim.advance(9);
    assert!(seen.borrow().is_empty());
    sim.advance(1);
    assert_eq!(*seen.borrow(), vec![(0xD, 10)]);

    sim.advance(10);
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(ctx.pending_callbacks(), 0);
    assert_eq!(sim.pending_registrations(), 0);
}

#[test]
fn rearmed_timed_callback_fires_every_period() {
    let (ctx, sim) = setup();
    let hits = Rc::new(Cell::new(0u32));

    let h = hits.clone();
    let id = ctx
        .register_timed_callback(
            5,
            reaction_fn(move |_| {
                h.set(h.get() + 1);
                Ok(if h.get() < 3 { ReactionOutcome::Rearm } else { ReactionOutcome::Done })
            }),
        )
        .unwrap();

    sim.advance(5);
    assert_eq!(ctx.callback_state(id), Some(CallbackState::Armed));
    sim.advance(20);
    assert_eq!(hits.get(), 3);
    assert_eq!(ctx.callback_state(id), Some(CallbackState::Fired));
}

#[test]
fn spurious_second_fire_is_fatal() {
    let (ctx, sim) = setup();
    let hits = Rc::new(Cell::new(0u32));

    let h = hits.clone();
    ctx.register_timed_callback(
        1,
        reaction_fn(move |_| {
            h.set(h.get() + 1);
            Ok(ReactionOutcome::Done)
        }),
    )
    .unwrap();
    sim.advance(1);
    assert_eq!(hits.get(), 1);
    assert!(!ctx.is_sim_ending());

    let stale = sim.last_trigger().unwrap();
    let err = stale.fire().unwrap_err();
    assert!(matches!(err, GpiError::CallbackCorrupted { .. }));
    assert_eq!(hits.get(), 1);
    assert!(ctx.is_sim_ending());
    assert!(ctx.is_finalized());
    assert_eq!(sim.end_sim_calls(), 1);
}

#[test]
fn removed_callback_never_fires() {
    let (ctx, sim) = setup();
    let hits = Rc::new(Cell::new(0u32));

    let h = hits.clone();
    let id = ctx
        .register_readonly_callback(reaction_fn(move |_| {
            h.set(h.get() + 1);
            Ok(ReactionOutcome::Done)
        }))
        .unwrap();
    assert_eq!(sim.pending_registrations(), 1);

    ctx.remove_callback(id).unwrap();
    assert_eq!(ctx.callback_state(id), Some(CallbackState::Cancelled));
    assert_eq!(sim.pending_registrations(), 0);

    sim.advance(1);
    assert_eq!(hits.get(), 0);
    assert!(ctx.remove_callback(id).is_err());
    assert!(!ctx.is_sim_ending());
}

#[test]
fn reaction_can_remove_itself() {
    let (ctx, sim) = setup();
    let own: Rc<Cell<Option<CbId>>> = Rc::new(Cell::new(None));
    let hits = Rc::new(Cell::new(0u32));

    let (me, h) = (own.clone(), hits.clone());
    let id = ctx
        .register_readwrite_callback(reaction_fn(move |ctx| {
            h.set(h.get() + 1);
            if let Some(id) = me.get() {
                ctx.remove_callback(id)?;
            }
            Ok(ReactionOutcome::Rearm)
        }))
        .unwrap();
    own.set(Some(id));

    sim.advance(1);
    sim.advance(1);
    assert_eq!(hits.get(), 1);
    assert_eq!(ctx.callback_state(id), Some(CallbackState::Cancelled));
    assert_eq!(sim.pending_registrations(), 0);
    assert!(!ctx.is_sim_ending());
}

#[test]
fn value_change_respects_edge() {
    let (ctx, sim) = setup();
    let top = ctx.get_root_handle(None).unwrap();
    let clk = ctx.get_handle_by_name(top, "clk").unwrap();
    let rising = Rc::new(Cell::new(0u32));

    let r = rising.clone();
    ctx.register_value_change_callback(
        clk,
        GpiEdge::Rising,
        reaction_fn(move |_| {
            r.set(r.get() + 1);
            Ok(ReactionOutcome::Rearm)
        }),
    )
    .unwrap();

    for bits in ["1", "0", "1", "1", "0", "1"] {
        sim.drive("top.clk", bits).unwrap();
    }
    assert_eq!(rising.get(), 3);
}

#[test]
fn reactions_may_write_signals() {
    let (ctx, sim) = setup();
    let top = ctx.get_root_handle(None).unwrap();
    let clk = ctx.get_handle_by_name(top, "clk").unwrap();
    let count = ctx.get_handle_by_name(top, "count").unwrap();

    ctx.register_value_change_callback(
        clk,
        GpiEdge::Rising,
        reaction_fn(move |ctx| {
            let n = ctx.get_signal_value_long(count)?;
            ctx.set_signal_value_int(count, n as i32 + 1, GpiSetAction::Deposit)?;
            Ok(ReactionOutcome::Rearm)
        }),
    )
    .unwrap();

    for _ in 0..4 {
        sim.drive("top.clk", "1").unwrap();
        sim.drive("top.clk", "0").unwrap();
    }
    assert_eq!(sim.bits_of("top.count").unwrap(), "00000100");
    assert_eq!(ctx.lock().takes(), ctx.lock().releases());
}

#[test]
fn phase_callbacks_follow_adapter_order() {
    let (ctx, sim) = setup();
    let order = Rc::new(RefCell::new(Vec::new()));

    let push = |tag: &'static str| {
        let order = order.clone();
        reaction_fn(move |_| {
            order.borrow_mut().push(tag);
            Ok(ReactionOutcome::Done)
        })
    };
    ctx.register_readonly_callback(push("ro")).unwrap();
    ctx.register_readwrite_callback(push("rw")).unwrap();
    ctx.register_nexttime_callback(push("next")).unwrap();
    ctx.register_timed_callback(1, push("timed")).unwrap();

    sim.advance(1);
    assert_eq!(*order.borrow(), ["next", "timed", "rw", "ro"]);
    assert_eq!(ctx.callbacks_fired(), 4);
}

#[test]
fn value_change_on_a_scope_is_rejected() {
    let (ctx, _sim) = setup();
    let top = ctx.get_root_handle(None).unwrap();
    let err = ctx
        .register_value_change_callback(top, GpiEdge::ValueChange, reaction_fn(|_| Ok(ReactionOutcome::Done)))
        .unwrap_err();
    assert!(matches!(err, GpiError::NotASignal(_)));
    assert_eq!(ctx.pending_callbacks(), 0);
}

#[test]
fn pending_callbacks_are_released_at_finalize() {
    let (ctx, sim) = setup();
    for t in [5, 10, 15] {
        ctx.register_timed_callback(t, reaction_fn(|_| Ok(ReactionOutcome::Done)))
            .unwrap();
    }
    assert_eq!(sim.pending_registrations(), 3);

    ctx.finalize();
    assert_eq!(sim.pending_registrations(), 0);
    assert_eq!(ctx.pending_callbacks(), 0);
}

#[test]
fn callback_fired_during_registration_is_retired() {
    let (ctx, sim) = setup();
    sim.fire_during_registration(true);
    let hits = Rc::new(Cell::new(0u32));

    let h = hits.clone();
    let once = ctx
        .register_readwrite_callback(reaction_fn(move |_| {
            h.set(h.get() + 1);
            Ok(ReactionOutcome::Done)
        }))
        .unwrap();
    assert_eq!(hits.get(), 1);
    assert_eq!(ctx.callback_state(once), Some(CallbackState::Fired));
    assert_eq!(sim.pending_registrations(), 0);
    assert_eq!(ctx.pending_callbacks(), 0);

    let h = hits.clone();
    let again = ctx
        .register_readwrite_callback(reaction_fn(move |_| {
            h.set(h.get() + 1);
            Ok(ReactionOutcome::Rearm)
        }))
        .unwrap();
    sim.fire_during_registration(false);
    assert_eq!(hits.get(), 2);
    assert_eq!(ctx.callback_state(again), Some(CallbackState::Armed));
    assert_eq!(sim.pending_registrations(), 1);

    sim.advance(1);
    assert_eq!(hits.get(), 3);
    ctx.remove_callback(again).unwrap();
    assert_eq!(sim.pending_registrations(), 0);
    assert!(!ctx.is_sim_ending());
}

#[test]
fn rejected_value_change_names_the_adapter() {
    let (ctx, sim) = setup();
    let top = ctx.get_root_handle(None).unwrap();
    let clk = ctx.get_handle_by_name(top, "clk").unwrap();

    sim.reject_registrations(true);
    let err = ctx
        .register_value_change_callback(clk, GpiEdge::Rising, reaction_fn(|_| Ok(ReactionOutcome::Done)))
        .unwrap_err();
    assert!(matches!(err, GpiError::RegistrationFailed { ref adapter, .. } if adapter == "sim"));
    assert_eq!(ctx.pending_callbacks(), 0);
}

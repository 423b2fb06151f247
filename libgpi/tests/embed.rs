use std::fs;
use std::rc::Rc;

use mlua::prelude::*;
use tempfile::TempDir;

use gpi::config::GpiConfig;
use gpi::testing::SimImpl;
use gpi::types::GpiEvent;
use gpi::GpiContext;

const ENTRY: &str = r#"
local M = {}

events = {}
logs = {}

function M.log_from_c(target, level, path, line, msg)
    logs[#logs + 1] = msg
end

function M.filter_from_c(target, level)
    return level >= 30
end

function M.entry(argv)
    args = argv
    program = arg[0]

    local top = gpi.get_root_handle("top")
    local clk = gpi.get_handle_by_name(top, "clk")
    rising = 0
    gpi.register_value_change_callback(clk, function()
        rising = rising + 1
        return true
    end, gpi.RISING)

    gpi.register_timed_callback(100, function(msg)
        finished = msg
        gpi.log(30, "testbench finished")
    end, "done")
end

function M.sim_event(level, msg)
    events[#events + 1] = level .. ":" .. msg
end

return M
"#;

fn write_entry(name: &str, body: &str) -> (TempDir, GpiConfig) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(format!("{name}.lua")), body).unwrap();
    let config = GpiConfig {
        entry_module: name.to_string(),
        lua_path: Some(format!("{}/?.lua", dir.path().display())),
        ..Default::default()
    };
    (dir, config)
}

fn start(config: GpiConfig) -> (Rc<GpiContext>, Rc<SimImpl>) {
    let _ = gpi::logging::init();
    gpi::logging::set_level(log::LevelFilter::Info);

    let ctx = GpiContext::new(config);
    let sim = Rc::new(SimImpl::new("sim"));
    sim.add_module("top");
    sim.add_signal("top.clk", 1);
    ctx.register_impl(sim.clone()).unwrap();

    ctx.embed_init(vec![b"vsim".to_vec(), b"+seed=1".to_vec()]).unwrap();
    ctx.sim_start();
    (ctx, sim)
}

fn globals(ctx: &GpiContext) -> LuaTable {
    ctx.runtime().unwrap().lua().globals()
}

#[test]
fn entry_runs_with_host_argv() {
    let (_dir, config) = write_entry("tb_argv", ENTRY);
    let (ctx, sim) = start(config);

    let g = globals(&ctx);
    let args: Vec<String> = g.get::<LuaTable>("args").unwrap().sequence_values::<String>().collect::<LuaResult<_>>().unwrap();
    assert_eq!(args, ["vsim", "+seed=1"]);
    assert_eq!(g.get::<String>("program").unwrap(), "gpi");
    assert!(!ctx.is_sim_ending());
    assert_eq!(sim.pending_registrations(), 2);
    assert_eq!(ctx.lock().depth(), 0);
}

#[test]
fn lua_callbacks_drive_the_testbench() {
    let (_dir, config) = write_entry("tb_run", ENTRY);
    let (ctx, sim) = start(config);

    for _ in 0..3 {
        sim.drive("top.clk", "1").unwrap();
        sim.drive("top.clk", "0").unwrap();
    }
    sim.advance(100);

    let g = globals(&ctx);
    assert_eq!(g.get::<i64>("rising").unwrap(), 3);
    assert_eq!(g.get::<String>("finished").unwrap(), "done");

    let logs: Vec<String> = g.get::<LuaTable>("logs").unwrap().sequence_values::<String>().collect::<LuaResult<_>>().unwrap();
    assert!(logs.iter().any(|m| m == "testbench finished"));
}

fn logs_of(ctx: &GpiContext) -> Vec<String> {
    globals(ctx)
        .get::<LuaTable>("logs")
        .unwrap()
        .sequence_values::<String>()
        .collect::<LuaResult<_>>()
        .unwrap()
}

#[test]
fn contexts_on_one_thread_keep_their_own_log_sink() {
    let (_dir_a, config_a) = write_entry("tb_sink_a", ENTRY);
    let (_dir_b, config_b) = write_entry("tb_sink_b", ENTRY);
    let (ctx_a, sim_a) = start(config_a);
    let (ctx_b, _sim_b) = start(config_b);

    sim_a.advance(100);
    assert!(logs_of(&ctx_a).iter().any(|m| m == "testbench finished"));
    assert!(logs_of(&ctx_b).is_empty());

    ctx_b.cleanup_runtime();
    assert!(ctx_b.log_sink().is_none());
    assert!(ctx_a.log_sink().is_some());

    {
        let _user = ctx_a.enter_user();
        globals(&ctx_a)
            .get::<LuaTable>("gpi")
            .unwrap()
            .get::<LuaFunction>("log")
            .unwrap()
            .call::<()>((30, "after the other runtime closed"))
            .unwrap();
    }
    assert!(logs_of(&ctx_a).iter().any(|m| m == "after the other runtime closed"));
}

#[test]
fn events_reach_the_sink_and_stop_is_reported() {
    let (_dir, config) = write_entry("tb_events", ENTRY);
    let (ctx, sim) = start(config);
    let runtime = ctx.runtime().unwrap();

    ctx.sim_event(GpiEvent::SimInfo, Some("hello"));
    ctx.sim_event(GpiEvent::SimTestFail, None);
    ctx.stop_sim();
    ctx.stop_sim();

    let events: Vec<String> = runtime
        .lua()
        .globals()
        .get::<LuaTable>("events")
        .unwrap()
        .sequence_values::<String>()
        .collect::<LuaResult<_>>()
        .unwrap();
    assert_eq!(
        events,
        ["1:hello", "2:No message provided", "0:Simulator shut down prematurely"]
    );

    // the simulator stopped on its own, so nobody asks it to end
    ctx.request_sim_end();
    assert_eq!(sim.end_sim_calls(), 0);
    assert!(ctx.is_finalized());
}

#[test]
fn teardown_twice_is_harmless() {
    let (_dir, config) = write_entry("tb_teardown", ENTRY);
    let (ctx, sim) = start(config);
    let runtime = ctx.runtime().unwrap();
    assert!(runtime.has_event_fn());

    ctx.cleanup_runtime();
    ctx.finalize();
    ctx.finalize();
    ctx.cleanup_runtime();

    assert!(!runtime.is_alive());
    assert!(!runtime.has_event_fn());
    assert!(!ctx.has_runtime());
    assert!(ctx.is_finalized());
    assert_eq!(sim.pending_registrations(), 0);

    // events after teardown are dropped
    ctx.sim_event(GpiEvent::SimFail, Some("late"));
}

#[test]
fn missing_hook_ends_the_simulation() {
    let (_dir, config) = write_entry(
        "tb_no_event",
        r#"
        return {
            log_from_c = function() end,
            filter_from_c = function() return true end,
            entry = function() entered = true end,
        }
        "#,
    );
    let (ctx, sim) = start(config);

    assert!(ctx.is_sim_ending());
    assert_eq!(sim.end_sim_calls(), 1);
    // control went back to the simulator with the end requested
    assert!(ctx.is_finalized());
    assert!(!ctx.has_runtime());
}

#[test]
fn entry_error_ends_the_simulation() {
    let (_dir, config) = write_entry(
        "tb_entry_error",
        r#"
        return {
            log_from_c = function() end,
            filter_from_c = function() return false end,
            entry = function() error("bad testbench") end,
            sim_event = function() end,
        }
        "#,
    );
    let (ctx, sim) = start(config);
    assert_eq!(sim.end_sim_calls(), 1);
    assert!(ctx.is_finalized());

    ctx.to_user();
    ctx.to_simulator();
    assert_eq!(ctx.lock().takes(), ctx.lock().releases());
}

#[test]
fn failing_lua_reaction_is_fatal() {
    let (_dir, config) = write_entry(
        "tb_reaction_error",
        r#"
        return {
            log_from_c = function() end,
            filter_from_c = function() return false end,
            entry = function()
                gpi.register_timed_callback(5, function() error("boom") end)
            end,
            sim_event = function() end,
        }
        "#,
    );
    let (ctx, sim) = start(config);
    assert!(!ctx.is_sim_ending());

    sim.advance(5);
    assert!(ctx.is_sim_ending());
    assert!(ctx.is_finalized());
    assert_eq!(sim.end_sim_calls(), 1);
    assert!(!ctx.has_runtime());
}

#[test]
fn missing_root_is_reported_as_a_warning() {
    let (_dir, config) = write_entry(
        "tb_missing_root",
        r#"
        logs = {}
        return {
            log_from_c = function(target, level, path, line, msg)
                logs[#logs + 1] = level .. ":" .. msg
            end,
            filter_from_c = function() return true end,
            entry = function()
                missing = gpi.get_root_handle("no_such_top")
            end,
            sim_event = function() end,
        }
        "#,
    );
    let (ctx, _sim) = start(config);

    let g = globals(&ctx);
    assert!(g.get::<Option<i64>>("missing").unwrap().is_none());
    let logs = logs_of(&ctx);
    assert!(logs.iter().any(|m| m == "30:[registry] no root handle found"));
    assert!(!logs.iter().any(|m| m.starts_with("40:")));
}

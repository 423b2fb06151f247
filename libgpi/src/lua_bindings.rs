//! The `gpi` global table seen by user scripts.
//!
//! Handles, iterators and callbacks cross as integer tokens. A zero or
//! unknown token raises a Lua error; a lookup that finds nothing returns
//! `nil`. Setters take the value first and an optional action that defaults
//! to `gpi.DEPOSIT`.

use std::rc::{Rc, Weak};

use mlua::prelude::*;

use crate::callback::CbId;
use crate::context::GpiContext;
use crate::embed::LuaReaction;
use crate::error::GpiError;
use crate::handle_store::HandleId;
use crate::logging;
use crate::registry::IterId;
use crate::types::{GpiEdge, GpiIteratorSel, GpiSetAction};

fn upgrade(weak: &Weak<GpiContext>) -> LuaResult<Rc<GpiContext>> {
    weak.upgrade()
        .ok_or_else(|| LuaError::runtime("GPI context is gone"))
}

/// Resolves a handle token, checking that it names a live object.
fn handle(ctx: &GpiContext, token: i64) -> LuaResult<HandleId> {
    let id = HandleId::from_token(token as u64).ok_or(GpiError::InvalidHandle(token))?;
    ctx.object(id)?;
    Ok(id)
}

fn iter_id(token: i64) -> LuaResult<IterId> {
    Ok(IterId::from_token(token as u64).ok_or(GpiError::InvalidIterator(token))?)
}

fn cb_id(token: i64) -> LuaResult<CbId> {
    CbId::from_token(token as u64).ok_or_else(|| {
        LuaError::external(GpiError::CallbackCorrupted {
            token: token as u64,
            reason: "not a callback token".to_string(),
        })
    })
}

#[inline(always)]
fn tok(id: HandleId) -> i64 {
    id.token() as i64
}

fn action(action: Option<i32>) -> LuaResult<GpiSetAction> {
    match action {
        None => Ok(GpiSetAction::Deposit),
        Some(a) => GpiSetAction::try_from(a).map_err(|_| {
            GpiError::InvalidValue {
                what: "set action",
                value: a.to_string(),
            }
            .into()
        }),
    }
}

fn reaction(func: LuaFunction, args: LuaVariadic<LuaValue>) -> Box<LuaReaction> {
    Box::new(LuaReaction::new(func, args.iter().cloned().collect()))
}

macro_rules! bind {
    ($lua:ident, $gpi:ident, $weak:ident, $name:literal, |$l:ident, $ctx:ident $(, $arg:ident : $ty:ty)*| $body:expr) => {{
        let weak = $weak.clone();
        $gpi.set(
            $name,
            $lua.create_function(move |$l, ($($arg,)*): ($($ty,)*)| {
                let $ctx = upgrade(&weak)?;
                let _ = $l;
                $body
            })?,
        )?;
    }};
}

pub fn install(lua: &Lua, ctx: Weak<GpiContext>) -> LuaResult<()> {
    let gpi = lua.create_table()?;

    for (name, value) in [
        ("OBJECTS", GpiIteratorSel::Objects as i32),
        ("DRIVERS", GpiIteratorSel::Drivers as i32),
        ("LOADS", GpiIteratorSel::Loads as i32),
        ("PACKAGE_SCOPES", GpiIteratorSel::PackageScopes as i32),
        ("RISING", GpiEdge::Rising as i32),
        ("FALLING", GpiEdge::Falling as i32),
        ("EDGE", GpiEdge::Edge as i32),
        ("VALUE_CHANGE", GpiEdge::ValueChange as i32),
        ("DEPOSIT", GpiSetAction::Deposit as i32),
        ("FORCE", GpiSetAction::Force as i32),
        ("RELEASE", GpiSetAction::Release as i32),
        ("NO_DELAY", GpiSetAction::NoDelay as i32),
    ] {
        gpi.set(name, value)?;
    }

    // ── hierarchy ───────────────────────────────────────────────────────
    bind!(lua, gpi, ctx, "get_root_handle", |_l, ctx, name: Option<String>| {
        Ok(ctx.get_root_handle(name.as_deref()).map(tok))
    });
    bind!(lua, gpi, ctx, "get_handle_by_name", |_l, ctx, parent: i64, name: String| {
        let parent = handle(&ctx, parent)?;
        Ok(ctx.get_handle_by_name(parent, &name).map(tok))
    });
    bind!(lua, gpi, ctx, "get_handle_by_index", |_l, ctx, parent: i64, index: i32| {
        let parent = handle(&ctx, parent)?;
        Ok(ctx.get_handle_by_index(parent, index).map(tok))
    });
    bind!(lua, gpi, ctx, "iterate", |_l, ctx, parent: Option<i64>, sel: Option<i32>| {
        let parent = match parent {
            None | Some(0) => None,
            Some(t) => Some(handle(&ctx, t)?),
        };
        let sel = match sel {
            None => GpiIteratorSel::Objects,
            Some(s) => GpiIteratorSel::try_from(s).map_err(|_| GpiError::InvalidValue {
                what: "iterator selector",
                value: s.to_string(),
            })?,
        };
        Ok(ctx.iterate(parent, sel).map(|it| it.token() as i64))
    });
    bind!(lua, gpi, ctx, "next", |_l, ctx, iter: i64| {
        Ok(ctx.next(iter_id(iter)?)?.map(tok))
    });

    // ── object queries ──────────────────────────────────────────────────
    bind!(lua, gpi, ctx, "get_name_string", |_l, ctx, h: i64| {
        Ok(ctx.object(handle(&ctx, h)?)?.name().to_string())
    });
    bind!(lua, gpi, ctx, "get_fullname_string", |_l, ctx, h: i64| {
        Ok(ctx.object(handle(&ctx, h)?)?.full_name().to_string())
    });
    bind!(lua, gpi, ctx, "get_type", |_l, ctx, h: i64| {
        Ok(ctx.object(handle(&ctx, h)?)?.kind() as i32)
    });
    bind!(lua, gpi, ctx, "get_type_string", |_l, ctx, h: i64| {
        Ok(ctx.object(handle(&ctx, h)?)?.type_str().to_string())
    });
    bind!(lua, gpi, ctx, "get_const", |_l, ctx, h: i64| {
        Ok(ctx.object(handle(&ctx, h)?)?.is_const())
    });
    bind!(lua, gpi, ctx, "get_indexable", |_l, ctx, h: i64| {
        Ok(ctx.object(handle(&ctx, h)?)?.is_indexable())
    });
    bind!(lua, gpi, ctx, "get_num_elems", |_l, ctx, h: i64| {
        Ok(ctx.object(handle(&ctx, h)?)?.num_elems())
    });
    bind!(lua, gpi, ctx, "get_range", |_l, ctx, h: i64| {
        let obj = ctx.object(handle(&ctx, h)?)?;
        Ok((obj.range_left(), obj.range_right(), obj.range_dir() as i32))
    });
    bind!(lua, gpi, ctx, "get_definition_name", |_l, ctx, h: i64| {
        Ok(ctx.object(handle(&ctx, h)?)?.definition_name().map(str::to_string))
    });
    bind!(lua, gpi, ctx, "get_definition_file", |_l, ctx, h: i64| {
        Ok(ctx.object(handle(&ctx, h)?)?.definition_file().map(str::to_string))
    });

    // ── values ──────────────────────────────────────────────────────────
    bind!(lua, gpi, ctx, "get_signal_val_binstr", |_l, ctx, h: i64| {
        Ok(ctx.get_signal_value_binstr(handle(&ctx, h)?)?)
    });
    bind!(lua, gpi, ctx, "get_signal_val_str", |l, ctx, h: i64| {
        let bytes = ctx.get_signal_value_str(handle(&ctx, h)?)?;
        l.create_string(&bytes)
    });
    bind!(lua, gpi, ctx, "get_signal_val_real", |_l, ctx, h: i64| {
        Ok(ctx.get_signal_value_real(handle(&ctx, h)?)?)
    });
    bind!(lua, gpi, ctx, "get_signal_val_long", |_l, ctx, h: i64| {
        Ok(ctx.get_signal_value_long(handle(&ctx, h)?)?)
    });
    bind!(lua, gpi, ctx, "set_signal_val_int", |_l, ctx, h: i64, value: i32, act: Option<i32>| {
        Ok(ctx.set_signal_value_int(handle(&ctx, h)?, value, action(act)?)?)
    });
    bind!(lua, gpi, ctx, "set_signal_val_real", |_l, ctx, h: i64, value: f64, act: Option<i32>| {
        Ok(ctx.set_signal_value_real(handle(&ctx, h)?, value, action(act)?)?)
    });
    bind!(lua, gpi, ctx, "set_signal_val_str", |_l, ctx, h: i64, value: LuaString, act: Option<i32>| {
        Ok(ctx.set_signal_value_str(handle(&ctx, h)?, &value.as_bytes(), action(act)?)?)
    });
    bind!(lua, gpi, ctx, "set_signal_val_binstr", |_l, ctx, h: i64, value: String, act: Option<i32>| {
        Ok(ctx.set_signal_value_binstr(handle(&ctx, h)?, &value, action(act)?)?)
    });

    // ── callbacks ───────────────────────────────────────────────────────
    bind!(lua, gpi, ctx, "register_timed_callback", |_l, ctx, time: u64, func: LuaFunction, args: LuaVariadic<LuaValue>| {
        let id = ctx.register_timed_callback(time, reaction(func, args))?;
        Ok(id.token() as i64)
    });
    bind!(lua, gpi, ctx, "register_value_change_callback", |_l, ctx, h: i64, func: LuaFunction, edge: i32, args: LuaVariadic<LuaValue>| {
        let edge = GpiEdge::try_from(edge).map_err(|_| GpiError::InvalidValue {
            what: "edge",
            value: edge.to_string(),
        })?;
        let id = ctx.register_value_change_callback(handle(&ctx, h)?, edge, reaction(func, args))?;
        Ok(id.token() as i64)
    });
    bind!(lua, gpi, ctx, "register_readonly_callback", |_l, ctx, func: LuaFunction, args: LuaVariadic<LuaValue>| {
        Ok(ctx.register_readonly_callback(reaction(func, args))?.token() as i64)
    });
    bind!(lua, gpi, ctx, "register_nextstep_callback", |_l, ctx, func: LuaFunction, args: LuaVariadic<LuaValue>| {
        Ok(ctx.register_nexttime_callback(reaction(func, args))?.token() as i64)
    });
    bind!(lua, gpi, ctx, "register_rwsynch_callback", |_l, ctx, func: LuaFunction, args: LuaVariadic<LuaValue>| {
        Ok(ctx.register_readwrite_callback(reaction(func, args))?.token() as i64)
    });
    bind!(lua, gpi, ctx, "deregister_callback", |_l, ctx, token: i64| {
        Ok(ctx.remove_callback(cb_id(token)?)?)
    });

    // ── simulator ───────────────────────────────────────────────────────
    bind!(lua, gpi, ctx, "get_sim_time", |_l, ctx| Ok(ctx.sim_time()? as i64));
    bind!(lua, gpi, ctx, "get_precision", |_l, ctx| Ok(ctx.sim_precision()?));
    bind!(lua, gpi, ctx, "get_simulator_product", |_l, ctx| Ok(ctx.simulator_product()?));
    bind!(lua, gpi, ctx, "get_simulator_version", |_l, ctx| Ok(ctx.simulator_version()?));
    bind!(lua, gpi, ctx, "stop_simulator", |_l, ctx| {
        ctx.request_sim_end();
        Ok(())
    });

    gpi.set(
        "log",
        lua.create_function(|_, (level, msg, target): (i32, String, Option<String>)| {
            let target = target.unwrap_or_else(|| "gpi.lua".to_string());
            log::log!(target: target.as_str(), logging::level_from_gpi(level), "{msg}");
            Ok(())
        })?,
    )?;

    lua.globals().set("gpi", gpi)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GpiConfig;
    use crate::testing::SimImpl;

    fn setup() -> (Rc<GpiContext>, Rc<SimImpl>, Lua) {
        let ctx = GpiContext::new(GpiConfig::default());
        let sim = Rc::new(SimImpl::new("sim"));
        sim.add_module("top");
        sim.add_signal("top.clk", 1);
        ctx.register_impl(sim.clone()).unwrap();

        let lua = Lua::new();
        install(&lua, ctx.weak()).unwrap();
        (ctx, sim, lua)
    }

    #[test]
    fn test_lookup_and_query() {
        let (_ctx, _sim, lua) = setup();
        lua.load(
            r#"
            local top = gpi.get_root_handle("top")
            assert(top ~= nil)
            assert(gpi.get_root_handle("nope") == nil)
            local clk = gpi.get_handle_by_name(top, "clk")
            assert(clk == gpi.get_handle_by_name(top, "clk"))
            assert(gpi.get_handle_by_name(top, "missing") == nil)
            assert(gpi.get_fullname_string(clk) == "top.clk")
            assert(gpi.get_type_string(clk) == "GPI_LOGIC")
            assert(gpi.get_type_string(top) == "GPI_MODULE")

            gpi.set_signal_val_binstr(clk, "x")
            assert(gpi.get_signal_val_binstr(clk) == "X")
            gpi.set_signal_val_int(clk, 1, gpi.DEPOSIT)
            assert(gpi.get_signal_val_long(clk) == 1)
            "#,
        )
        .exec()
        .unwrap();
    }

    #[test]
    fn test_bad_tokens_raise() {
        let (_ctx, _sim, lua) = setup();
        assert!(lua.load("gpi.get_name_string(0)").exec().is_err());
        assert!(lua.load("gpi.get_name_string(999)").exec().is_err());
        assert!(lua.load("gpi.next(12345)").exec().is_err());
        assert!(lua.load("gpi.deregister_callback(0)").exec().is_err());
        assert!(lua.load("gpi.get_signal_val_long(gpi.get_root_handle())").exec().is_err());
    }

    #[test]
    fn test_callback_arguments_and_rearm() {
        let (_ctx, sim, lua) = setup();
        lua.load(
            r#"
            hits = {}
            gpi.register_timed_callback(10, function(tag, n)
                hits[#hits + 1] = tag .. n
            end, "t", 1)
            rw_count = 0
            gpi.register_rwsynch_callback(function()
                rw_count = rw_count + 1
                return rw_count < 3
            end)
            "#,
        )
        .exec()
        .unwrap();

        sim.advance(10);
        sim.advance(10);
        sim.advance(10);
        sim.advance(10);

        let hits: LuaTable = lua.globals().get("hits").unwrap();
        assert_eq!(hits.raw_len(), 1);
        assert_eq!(hits.get::<String>(1).unwrap(), "t1");
        assert_eq!(lua.globals().get::<i64>("rw_count").unwrap(), 3);
    }
}

//! # Embedded Runtime
//!
//! Hosts the Lua interpreter that runs the user's testbench and implements
//! the host side of the startup handshake.
//!
//! ```text
//!   host                        GPI                           Lua
//!    │  gpi_embed_init(argv)     │                              │
//!    │ ────────────────────────> │ Lua::new, `gpi`, `arg`       │
//!    │                           │ package.path, attach pause   │
//!    │  gpi_sim_start()          │                              │
//!    │ ────────────────────────> │ require(entry_module) ─────> │
//!    │                           │ <── log_from_c, filter_from_c│
//!    │                           │     entry, sim_event         │
//!    │                           │ entry(argv) ───────────────> │
//!    │ <──────────────────────── │                              │
//!    │  gpi_sim_event(level,msg) │ sim_event(level, msg) ─────> │
//!    │  gpi_cleanup()            │ drop hooks, close runtime    │
//! ```
//!
//! Every call into Lua is made by the context with the execution lock held.

use std::cell::{Cell, RefCell};
use std::rc::Weak;
use std::time::Duration;

use mlua::prelude::*;

use crate::callback::{Reaction, ReactionOutcome};
use crate::config::GpiConfig;
use crate::context::GpiContext;
use crate::error::{GpiError, GpiResult};
use crate::logging::LuaLogSink;
use crate::lua_bindings;
use crate::types::GpiEvent;

/// Program name given to the runtime as `arg[0]`.
pub const PROGRAM_NAME: &str = "gpi";

pub struct EmbeddedRuntime {
    lua: Lua,
    argv: Vec<String>,
    entry_module: String,
    event_fn: RefCell<Option<LuaFunction>>,
    log_sink: RefCell<Option<LuaLogSink>>,
    alive: Cell<bool>,
}

impl EmbeddedRuntime {
    /// Starts the interpreter. The entry module is not loaded yet.
    pub fn new(config: &GpiConfig, argv: Vec<Vec<u8>>, ctx: Weak<GpiContext>) -> GpiResult<Self> {
        let lua = Lua::new();
        let argv: Vec<String> = argv
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();

        lua_bindings::install(&lua, ctx)?;

        let arg = lua.create_table()?;
        arg.raw_set(0, PROGRAM_NAME)?;
        for (i, a) in argv.iter().enumerate() {
            arg.raw_set(i + 1, a.as_str())?;
        }
        lua.globals().set("arg", arg)?;

        if let Some(extra) = &config.lua_path {
            let package: LuaTable = lua.globals().get("package")?;
            let path: String = package.get("path")?;
            package.set("path", format!("{extra};{path}"))?;
        }

        if let Some(secs) = config.attach_secs {
            log::info!(
                "Waiting for {secs} seconds - attach to PID {} with your debugger",
                unsafe { libc::getpid() }
            );
            std::thread::sleep(Duration::from_secs(secs as u64));
        }

        log::debug!("[embed] runtime initialized with {} arguments", argv.len());

        Ok(Self {
            lua,
            argv,
            entry_module: config.entry_module.clone(),
            event_fn: RefCell::new(None),
            log_sink: RefCell::new(None),
            alive: Cell::new(true),
        })
    }

    #[inline(always)]
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    #[inline(always)]
    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    pub fn has_event_fn(&self) -> bool {
        self.event_fn.borrow().is_some()
    }

    /// The log hooks of this runtime, once the entry module provided them.
    pub fn log_sink(&self) -> Option<LuaLogSink> {
        self.log_sink.try_borrow().ok()?.clone()
    }

    fn hook(&self, module: &LuaTable, name: &str) -> GpiResult<LuaFunction> {
        module.get::<LuaFunction>(name).map_err(|e| {
            GpiError::Runtime(format!(
                "failed to get `{name}` from `{}`: {e}",
                self.entry_module
            ))
        })
    }

    /// Resolves the four hooks of the entry module and calls `entry(argv)`.
    pub fn sim_init(&self) -> GpiResult<()> {
        if !self.alive.get() {
            return Err(GpiError::RuntimeNotInitialized);
        }

        let require: LuaFunction = self.lua.globals().get("require")?;
        let module: LuaTable = require.call(self.entry_module.as_str()).map_err(|e| {
            GpiError::Runtime(format!("failed to load `{}`: {e}", self.entry_module))
        })?;

        let log_fn = self.hook(&module, "log_from_c")?;
        let filter_fn = self.hook(&module, "filter_from_c")?;
        *self.log_sink.borrow_mut() = Some(LuaLogSink::new(log_fn, filter_fn));

        let entry = self.hook(&module, "entry")?;
        let event_fn = self.hook(&module, "sim_event")?;
        *self.event_fn.borrow_mut() = Some(event_fn);

        let argv = self
            .lua
            .create_sequence_from(self.argv.iter().map(String::as_str))?;
        entry
            .call::<()>(argv)
            .map_err(|e| GpiError::Runtime(format!("user entry failed: {e}")))
    }

    pub fn sim_event(&self, level: GpiEvent, msg: &str) -> GpiResult<()> {
        let event_fn = self.event_fn.borrow().clone();
        match event_fn {
            Some(f) => Ok(f.call::<()>((level as i32, msg))?),
            None => Ok(()),
        }
    }

    /// Drops the retained hooks and shuts the interpreter down. Idempotent.
    pub fn cleanup(&self) {
        if !self.alive.replace(false) {
            return;
        }
        log::debug!("[embed] cleaning up runtime");
        let event_fn = self.event_fn.borrow_mut().take();
        drop(event_fn);
        let sink = self.log_sink.borrow_mut().take();
        drop(sink);
        if let Err(e) = self.lua.gc_collect() {
            log::warn!("[embed] final collection failed: {e}");
        }
    }
}

/// A Lua function registered as a callback reaction, with its arguments.
///
/// The callback re-arms when the function returns `true`.
pub struct LuaReaction {
    func: LuaFunction,
    args: Vec<LuaValue>,
}

impl LuaReaction {
    pub fn new(func: LuaFunction, args: Vec<LuaValue>) -> Self {
        Self { func, args }
    }
}

impl Reaction for LuaReaction {
    fn react(&mut self, _ctx: &GpiContext) -> GpiResult<ReactionOutcome> {
        let args = LuaMultiValue::from_vec(self.args.clone());
        match self.func.call::<LuaValue>(args) {
            Ok(LuaValue::Boolean(true)) => Ok(ReactionOutcome::Rearm),
            Ok(_) => Ok(ReactionOutcome::Done),
            Err(e) => Err(GpiError::Reaction(e.to_string())),
        }
    }

    fn describe(&self) -> String {
        let info = self.func.info();
        format!(
            "<lua function {}:{}>",
            info.short_src.as_deref().unwrap_or("?"),
            info.line_defined.unwrap_or(0)
        )
    }
}

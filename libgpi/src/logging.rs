//! Logging bridge.
//!
//! All crate code logs through the `log` facade. [`GpiLogger`] forwards each
//! record to the Lua log sink of the context that runs user code (or of the
//! thread's process context when none does), and to `env_logger` otherwise
//! or when the sink itself fails. Sinks belong to their embedded runtime, so
//! contexts sharing a thread never see each other's hooks.

use std::cell::{Cell, RefCell};
use std::rc::Weak;

use log::{Level, LevelFilter, Log, Metadata, Record};
use mlua::prelude::*;

use crate::context::{GpiContext, current_gpi_context};

/// GPI numeric log levels, shared with the Lua side.
pub const GPI_TRACE: i32 = 5;
pub const GPI_DEBUG: i32 = 10;
pub const GPI_INFO: i32 = 20;
pub const GPI_WARNING: i32 = 30;
pub const GPI_ERROR: i32 = 40;
pub const GPI_CRITICAL: i32 = 50;

pub fn level_from_name(name: &str) -> Option<LevelFilter> {
    match name.trim().to_ascii_uppercase().as_str() {
        "CRITICAL" | "ERROR" => Some(LevelFilter::Error),
        "WARNING" => Some(LevelFilter::Warn),
        "INFO" => Some(LevelFilter::Info),
        "DEBUG" => Some(LevelFilter::Debug),
        "TRACE" => Some(LevelFilter::Trace),
        _ => None,
    }
}

#[inline(always)]
pub fn gpi_level(level: Level) -> i32 {
    match level {
        Level::Trace => GPI_TRACE,
        Level::Debug => GPI_DEBUG,
        Level::Info => GPI_INFO,
        Level::Warn => GPI_WARNING,
        Level::Error => GPI_ERROR,
    }
}

/// Maps a GPI numeric level to the closest `log` level at or below it.
pub fn level_from_gpi(level: i32) -> Level {
    match level {
        l if l >= GPI_ERROR => Level::Error,
        l if l >= GPI_WARNING => Level::Warn,
        l if l >= GPI_INFO => Level::Info,
        l if l >= GPI_DEBUG => Level::Debug,
        _ => Level::Trace,
    }
}

/// The `log_from_c` / `filter_from_c` pair of one embedded runtime.
#[derive(Clone)]
pub struct LuaLogSink {
    log_fn: LuaFunction,
    filter_fn: LuaFunction,
}

impl LuaLogSink {
    pub fn new(log_fn: LuaFunction, filter_fn: LuaFunction) -> Self {
        Self { log_fn, filter_fn }
    }

    /// Returns `false` if the record must still reach the native logger.
    pub fn forward(&self, record: &Record) -> bool {
        let level = gpi_level(record.level());
        let target = record.target();
        match self.filter_fn.call::<bool>((target, level)) {
            Ok(false) => true,
            Ok(true) => self
                .log_fn
                .call::<()>((
                    target,
                    level,
                    record.file().unwrap_or("<unknown>"),
                    record.line().unwrap_or(0),
                    record.args().to_string(),
                ))
                .is_ok(),
            Err(_) => false,
        }
    }
}

thread_local! {
    // Contexts currently running user code, innermost last
    static ACTIVE: RefCell<Vec<Weak<GpiContext>>> = const { RefCell::new(Vec::new()) };
    static IN_SINK: Cell<bool> = const { Cell::new(false) };
}

/// Records logged from now on go to `ctx`'s sink.
pub(crate) fn enter_context(ctx: Weak<GpiContext>) {
    let _ = ACTIVE.try_with(|active| active.borrow_mut().push(ctx));
}

pub(crate) fn leave_context(ctx: &Weak<GpiContext>) {
    let _ = ACTIVE.try_with(|active| {
        let mut active = active.borrow_mut();
        if let Some(pos) = active.iter().rposition(|c| c.ptr_eq(ctx)) {
            active.remove(pos);
        }
    });
}

/// The sink of the context running user code, or else of the thread's
/// process context.
fn current_sink() -> Option<LuaLogSink> {
    let active = ACTIVE
        .try_with(|active| active.try_borrow().ok().and_then(|a| a.last().cloned()))
        .ok()
        .flatten()
        .and_then(|ctx| ctx.upgrade());
    let ctx = active.or_else(current_gpi_context)?;
    ctx.log_sink()
}

/// Returns `false` if the record must still reach the native logger.
fn forward_to_lua(record: &Record) -> bool {
    if IN_SINK.with(|f| f.replace(true)) {
        return false;
    }
    let handled = current_sink().is_some_and(|sink| sink.forward(record));
    IN_SINK.with(|f| f.set(false));
    handled
}

pub struct GpiLogger {
    native: env_logger::Logger,
}

impl Log for GpiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if forward_to_lua(record) {
            return;
        }
        if self.native.matches(record) {
            self.native.log(record);
        }
    }

    fn flush(&self) {
        self.native.flush();
    }
}

/// Installs [`GpiLogger`] as the global logger.
///
/// `RUST_LOG` filters the native backend; the effective level defaults to
/// `info` and is raised or lowered by [`set_level`].
pub fn init() -> Result<(), log::SetLoggerError> {
    let rust_log = std::env::var("RUST_LOG").is_ok();
    let native = env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .parse_default_env()
        .build();
    let level = if rust_log { native.filter() } else { LevelFilter::Info };

    log::set_boxed_logger(Box::new(GpiLogger { native }))?;
    log::set_max_level(level);
    Ok(())
}

pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(level_from_name("critical"), Some(LevelFilter::Error));
        assert_eq!(level_from_name("WARNING"), Some(LevelFilter::Warn));
        assert_eq!(level_from_name("TRACE"), Some(LevelFilter::Trace));
        assert_eq!(level_from_name("WARN"), None);
    }

    #[test]
    fn test_numeric_levels_round_trip_through_log() {
        for level in [Level::Trace, Level::Debug, Level::Info, Level::Warn, Level::Error] {
            assert_eq!(level_from_gpi(gpi_level(level)), level);
        }
        assert_eq!(level_from_gpi(GPI_CRITICAL), Level::Error);
        assert_eq!(level_from_gpi(0), Level::Trace);
        assert_eq!(level_from_gpi(25), Level::Info);
    }

    #[test]
    fn test_lua_sink_receives_filtered_records() {
        let lua = Lua::new();
        lua.load(
            r#"
            seen = {}
            function log_from_c(target, level, path, line, msg)
                seen[#seen + 1] = level .. ":" .. msg
            end
            function filter_from_c(target, level) return level >= 20 end
            "#,
        )
        .exec()
        .unwrap();

        let globals = lua.globals();
        let sink = LuaLogSink::new(
            globals.get("log_from_c").unwrap(),
            globals.get("filter_from_c").unwrap(),
        );

        assert!(sink.forward(
            &Record::builder()
                .level(Level::Debug)
                .target("gpi")
                .args(format_args!("hidden"))
                .build()
        ));
        assert!(sink.forward(
            &Record::builder()
                .level(Level::Warn)
                .target("gpi")
                .args(format_args!("shown"))
                .build()
        ));

        let seen = globals
            .get::<LuaTable>("seen")
            .unwrap()
            .sequence_values::<String>()
            .collect::<LuaResult<Vec<_>>>()
            .unwrap();
        assert_eq!(seen, vec!["30:shown".to_string()]);
    }

    #[test]
    fn test_no_sink_without_a_context() {
        assert!(current_sink().is_none());
        assert!(!forward_to_lua(
            &Record::builder()
                .level(Level::Warn)
                .args(format_args!("native"))
                .build()
        ));
    }
}

//! Process configuration, read once from the environment.

use log::LevelFilter;

use crate::error::{GpiError, GpiResult};
use crate::loader::{self, ExtraLib};
use crate::logging;

pub const ENV_EXTRA: &str = "GPI_EXTRA";
pub const ENV_LOG_LEVEL: &str = "GPI_LOG_LEVEL";
pub const ENV_ATTACH: &str = "GPI_ATTACH";
pub const ENV_ENTRY_MODULE: &str = "GPI_ENTRY_MODULE";
pub const ENV_LUA_PATH: &str = "GPI_LUA_PATH";

pub const DEFAULT_ENTRY_MODULE: &str = "gpi_entry";

#[derive(Debug, Clone, PartialEq)]
pub struct GpiConfig {
    pub extra_libs: Vec<ExtraLib>,
    pub log_level: Option<LevelFilter>,
    /// Seconds to sleep at startup so a debugger can attach
    pub attach_secs: Option<u32>,
    pub entry_module: String,
    pub lua_path: Option<String>,
}

impl Default for GpiConfig {
    fn default() -> Self {
        Self {
            extra_libs: Vec::new(),
            log_level: None,
            attach_secs: None,
            entry_module: DEFAULT_ENTRY_MODULE.to_string(),
            lua_path: None,
        }
    }
}

impl GpiConfig {
    pub fn from_env() -> GpiResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> GpiResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = GpiConfig::default();

        if let Some(list) = lookup(ENV_EXTRA) {
            config.extra_libs = loader::parse_library_list(&list);
        }

        if let Some(name) = lookup(ENV_LOG_LEVEL) {
            match logging::level_from_name(&name) {
                Some(level) => config.log_level = Some(level),
                None => log::error!(
                    "Invalid log level {name:?} in {ENV_LOG_LEVEL}, expected one of CRITICAL, ERROR, WARNING, INFO, DEBUG, TRACE"
                ),
            }
        }

        if let Some(pause) = lookup(ENV_ATTACH) {
            config.attach_secs = Some(parse_attach(&pause)?);
        }

        if let Some(module) = lookup(ENV_ENTRY_MODULE).filter(|m| !m.is_empty()) {
            config.entry_module = module;
        }

        config.lua_path = lookup(ENV_LUA_PATH).filter(|p| !p.is_empty());

        Ok(config)
    }
}

fn parse_attach(value: &str) -> GpiResult<u32> {
    let secs: u64 = value.trim().parse().map_err(|_| {
        GpiError::Config(format!("{ENV_ATTACH} must be set to an integer base 10 or omitted"))
    })?;

    if secs >= u32::MAX as u64 {
        return Err(GpiError::Config(format!(
            "{ENV_ATTACH} only needs to be set to ~30 seconds"
        )));
    }
    if secs == 0 {
        return Err(GpiError::Config(format!(
            "{ENV_ATTACH} must be set to an integer base 10 or omitted"
        )));
    }
    Ok(secs as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;

    fn config_of(vars: &[(&str, &str)]) -> GpiResult<GpiConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GpiConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_of(&[]).unwrap();
        assert_eq!(config, GpiConfig::default());
        assert_eq!(config.entry_module, "gpi_entry");
    }

    #[test]
    fn test_full_environment() {
        let config = config_of(&[
            ("GPI_EXTRA", "libvhpi.so:vhpi_entry,fli"),
            ("GPI_LOG_LEVEL", "WARNING"),
            ("GPI_ATTACH", "30"),
            ("GPI_ENTRY_MODULE", "my_tb"),
            ("GPI_LUA_PATH", "/tmp/tb/?.lua"),
        ])
        .unwrap();

        assert_eq!(config.extra_libs.len(), 2);
        assert_eq!(config.extra_libs[1].library, "libfli.so");
        assert_eq!(config.log_level, Some(LevelFilter::Warn));
        assert_eq!(config.attach_secs, Some(30));
        assert_eq!(config.entry_module, "my_tb");
        assert_eq!(config.lua_path.as_deref(), Some("/tmp/tb/?.lua"));
    }

    #[test]
    fn test_bad_log_level_is_ignored() {
        let config = config_of(&[("GPI_LOG_LEVEL", "LOUD")]).unwrap();
        assert_eq!(config.log_level, None);
    }

    #[test]
    fn test_attach_must_be_positive_and_small() {
        assert!(config_of(&[("GPI_ATTACH", "0")]).is_err());
        assert!(config_of(&[("GPI_ATTACH", "-3")]).is_err());
        assert!(config_of(&[("GPI_ATTACH", "soon")]).is_err());
        assert!(config_of(&[("GPI_ATTACH", "4294967295")]).is_err());
        assert_eq!(
            config_of(&[("GPI_ATTACH", "4294967294")]).unwrap().attach_secs,
            Some(u32::MAX - 1)
        );
    }
}

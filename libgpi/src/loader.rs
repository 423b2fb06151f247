//! Loading of the extra adapter libraries named in `GPI_EXTRA`.
//!
//! Every entry is `library:entry_function`. The library part runs up to the
//! last colon so paths containing colons still work. A bare `name` expands to
//! `lib<name>.so` with entry `<name>_entry_point`.

use std::ffi::{CStr, CString};

use crate::error::{GpiError, GpiResult};

/// Entry point exported by an adapter library. It registers its adapter(s).
pub type LayerEntryFn = unsafe extern "C" fn();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraLib {
    pub library: String,
    pub entry: String,
}

impl ExtraLib {
    pub fn parse(item: &str) -> Self {
        match item.rfind(':') {
            Some(idx) => ExtraLib {
                library: item[..idx].to_string(),
                entry: item[idx + 1..].to_string(),
            },
            None => ExtraLib {
                library: format!("lib{item}.so"),
                entry: format!("{item}_entry_point"),
            },
        }
    }
}

pub fn parse_library_list(list: &str) -> Vec<ExtraLib> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ExtraLib::parse)
        .collect()
}

fn dl_error() -> String {
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "unknown error".to_string()
        } else {
            CStr::from_ptr(err).to_string_lossy().into_owned()
        }
    }
}

/// Opens `lib` and resolves its entry point. The library stays loaded for
/// the rest of the process.
pub fn resolve_entry(lib: &ExtraLib) -> GpiResult<LayerEntryFn> {
    let load_err = |reason: String| GpiError::Load {
        library: lib.library.clone(),
        reason,
    };

    let c_path = CString::new(lib.library.as_str()).map_err(|e| load_err(e.to_string()))?;
    let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_GLOBAL) };
    if handle.is_null() {
        return Err(load_err(dl_error()));
    }

    let c_entry = CString::new(lib.entry.as_str()).map_err(|e| load_err(e.to_string()))?;
    unsafe { libc::dlerror() };
    let sym = unsafe { libc::dlsym(handle, c_entry.as_ptr()) };
    if sym.is_null() {
        return Err(load_err(format!(
            "unable to find entry point {} ({}); perhaps you meant to use `,` instead of `:` to separate library names",
            lib.entry,
            dl_error()
        )));
    }

    Ok(unsafe { std::mem::transmute::<*mut libc::c_void, LayerEntryFn>(sym) })
}

/// Loads every library in order and calls its entry point.
///
/// Any failure is fatal: a diagnostic is printed and the process exits.
pub fn load_extra_libs(libs: &[ExtraLib]) {
    for lib in libs {
        log::debug!("[loader] loading {}:{}", lib.library, lib.entry);
        match resolve_entry(lib) {
            Ok(entry) => unsafe { entry() },
            Err(e) => {
                eprintln!("gpi: {e}");
                std::process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_library_list() {
        let libs = parse_library_list("libvpi.so:vpi_entry, fli ,/opt/c:/sim/libx.so:x_entry,");
        assert_eq!(
            libs,
            vec![
                ExtraLib {
                    library: "libvpi.so".into(),
                    entry: "vpi_entry".into()
                },
                ExtraLib {
                    library: "libfli.so".into(),
                    entry: "fli_entry_point".into()
                },
                ExtraLib {
                    library: "/opt/c:/sim/libx.so".into(),
                    entry: "x_entry".into()
                },
            ]
        );
        assert!(parse_library_list("").is_empty());
    }

    #[test]
    fn test_missing_library_is_a_load_error() {
        let lib = ExtraLib::parse("/nonexistent/libnothing.so:nothing");
        match resolve_entry(&lib) {
            Err(GpiError::Load { library, .. }) => assert_eq!(library, "/nonexistent/libnothing.so"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}

pub mod idpool;

use std::cell::RefCell;
use std::ffi::{CStr, CString};

use hashbrown::HashSet;
use libc::c_char;

/// Borrows a C string as UTF-8. Null or non-UTF-8 input yields `None`.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// # Safety
/// Same as [`c_str`].
pub unsafe fn c_bytes<'a>(ptr: *const c_char) -> Option<&'a [u8]> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_bytes())
}

/// Copies a NUL-terminated `argv` array.
///
/// # Safety
/// `argv` must be null or hold `argc` valid C strings.
pub unsafe fn c_argv(argc: i32, argv: *const *const c_char) -> Vec<Vec<u8>> {
    if argv.is_null() || argc <= 0 {
        return Vec::new();
    }
    (0..argc as usize)
        .filter_map(|i| unsafe { c_bytes(*argv.add(i)) })
        .map(<[u8]>::to_vec)
        .collect()
}

thread_local! {
    static INTERNED: RefCell<HashSet<CString>> = RefCell::new(HashSet::new());
    static SCRATCH: RefCell<CString> = RefCell::new(CString::default());
}

fn to_cstring(bytes: impl Into<Vec<u8>>) -> CString {
    let mut bytes = bytes.into();
    bytes.retain(|&b| b != 0);
    // Interior NULs were removed above.
    CString::new(bytes).unwrap_or_default()
}

/// Returns a pointer that stays valid for the rest of the process.
///
/// Used for names and type strings, whose set is bounded by the design.
pub fn intern(s: &str) -> *const c_char {
    INTERNED.with(|set| {
        let mut set = set.borrow_mut();
        if let Some(existing) = set.get(to_cstring(s).as_c_str()) {
            return existing.as_ptr();
        }
        let owned = to_cstring(s);
        let ptr = owned.as_ptr();
        set.insert(owned);
        ptr
    })
}

/// Returns a pointer valid until the next call of this function on the same thread.
pub fn scratch(bytes: impl Into<Vec<u8>>) -> *const c_char {
    SCRATCH.with(|slot| {
        let mut slot = slot.borrow_mut();
        *slot = to_cstring(bytes);
        slot.as_ptr()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let a = intern("top.clk");
        let b = intern("top.clk");
        assert_eq!(a, b);
        for i in 0..256 {
            intern(&format!("top.sig{i}"));
        }
        assert_eq!(unsafe { c_str(a) }, Some("top.clk"));
    }

    #[test]
    fn test_argv_copy() {
        let args = [c"vsim".as_ptr(), c"-c".as_ptr()];
        let argv = unsafe { c_argv(2, args.as_ptr()) };
        assert_eq!(argv, vec![b"vsim".to_vec(), b"-c".to_vec()]);
        assert!(unsafe { c_argv(0, std::ptr::null()) }.is_empty());
        assert_eq!(unsafe { c_str(std::ptr::null()) }, None);
    }

    #[test]
    fn test_scratch_strips_nul() {
        let p = scratch(b"ab\0c".to_vec());
        assert_eq!(unsafe { c_str(p) }, Some("abc"));
    }
}

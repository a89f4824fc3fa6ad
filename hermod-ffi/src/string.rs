use std::{
    ffi::{CString, c_char},
    ptr::{self, null},
};

/// Strip NUL bytes so a [`CString`] can always be built from the input.
fn sanitize_null_bytes(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().copied().filter(|&b| b != 0).collect()
}

/// An owned, NUL-terminated string handed to a native plugin, released with
/// [`hermod_free_string`].
#[repr(C)]
pub struct String {
    pub len: usize,
    pub data: *const c_char,
}

impl Default for String {
    fn default() -> Self {
        Self {
            len: 0,
            data: null(),
        }
    }
}

impl Drop for String {
    fn drop(&mut self) {
        if !self.data.is_null() {
            let _ = unsafe { CString::from_raw(self.data.cast_mut()) };
            self.data = null();
        }
    }
}

/// An owned array of [`String`]s, released with [`hermod_free_string_vector`].
#[repr(C)]
#[allow(clippy::module_name_repetitions)]
pub struct StringVector {
    pub len: usize,
    pub data: *const String,
}

impl Default for StringVector {
    fn default() -> Self {
        Self {
            len: 0,
            data: null(),
        }
    }
}

impl Drop for StringVector {
    fn drop(&mut self) {
        if !self.data.is_null() {
            let slice = ptr::slice_from_raw_parts_mut(self.data.cast_mut(), self.len);
            drop(unsafe { Box::from_raw(slice) });
            self.data = null();
        }
    }
}

impl From<&[u8]> for String {
    fn from(value: &[u8]) -> Self {
        let sanitized = sanitize_null_bytes(value);
        let len = sanitized.len();
        let data = CString::new(sanitized).unwrap_or_default().into_raw();

        Self { len, data }
    }
}

impl From<&str> for String {
    fn from(value: &str) -> Self {
        Self::from(value.as_bytes())
    }
}

impl From<&std::string::String> for String {
    fn from(value: &std::string::String) -> Self {
        Self::from(value.as_str())
    }
}

impl<S: AsRef<str>> From<&[S]> for StringVector {
    fn from(value: &[S]) -> Self {
        let strings: Box<[String]> = value.iter().map(|s| String::from(s.as_ref())).collect();
        let len = strings.len();
        let data = Box::into_raw(strings).cast::<String>().cast_const();

        Self { len, data }
    }
}

#[unsafe(no_mangle)]
#[allow(clippy::module_name_repetitions)]
pub extern "C" fn hermod_free_string(ffi_string: String) {
    drop(ffi_string);
}

#[unsafe(no_mangle)]
#[allow(clippy::module_name_repetitions)]
pub extern "C" fn hermod_free_string_vector(ffi_vector: StringVector) {
    drop(ffi_vector);
}

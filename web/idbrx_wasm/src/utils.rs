//! Utility functions for WASM setup.

/// Sets up the panic hook for better error messages.
///
/// Called when the WASM module initializes. Rust panic messages go to the
/// browser console instead of an opaque `unreachable` trap.
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

//! `sys` namespace: clock, delay and guest printing.

use std::time::Duration;

use tracing::info;
use tracing::warn;

use crate::host::HostState;
use crate::memory;

/// `sys.millis() -> i32`
pub fn millis(state: &HostState) -> i32 {
    state.env.elapsed_millis() as i32
}

/// `sys.delay(ms: i32)`
///
/// Blocks the calling thread only. Negative durations return immediately.
pub fn delay(ms: i32) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// `sys.print(ptr: i32, len: i32)`
pub fn print(state: &HostState, memory: &[u8], ptr: i32, len: i32) {
    match memory::read_slice(memory, ptr as u32, len as u32) {
        Ok(bytes) => emit(state, &bytes),
        Err(e) => warn!(module = %state.module, error = %e, "print: bad guest string"),
    }
}

/// `sys.println(ptr: i32)`
///
/// Prints the NUL-terminated string at `ptr`.
pub fn println(state: &HostState, memory: &[u8], ptr: i32) {
    match memory::read_c_str(memory, ptr as u32) {
        Ok(bytes) => emit(state, bytes),
        Err(e) => warn!(module = %state.module, error = %e, "println: bad guest string"),
    }
}

/// `sys.printInt(n: i32)`
pub fn print_int(state: &HostState, n: i32) {
    info!(target: "guest", module = %state.module, "{}", n);
}

fn emit(state: &HostState, bytes: &[u8]) {
    let text = String::from_utf8_lossy(bytes);
    info!(target: "guest", module = %state.module, "{}", text);
}

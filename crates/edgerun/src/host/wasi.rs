//! `wasi_snapshot_preview1` namespace: the subset of WASI guests link against.

use rand::RngCore;
use tracing::warn;

use crate::host::HostState;
use crate::memory;

/// WASI errno values returned to the guest.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    Success = 0,
    Badf = 8,
    Inval = 28,
}

/// `wasi_snapshot_preview1.random_get(buf_ptr: i32, size: i32) -> errno`
///
/// Fills `size` bytes at `buf_ptr` with host randomness. Only an invalid
/// buffer makes it fail, in which case memory is left untouched.
pub fn random_get(state: &HostState, memory: &mut [u8], buf_ptr: i32, size: i32) -> i32 {
    let mut bytes = vec![0u8; size.max(0) as usize];
    rand::thread_rng().fill_bytes(&mut bytes);
    match memory::write_slice(memory, buf_ptr as u32, &bytes) {
        Ok(()) => Errno::Success as i32,
        Err(e) => {
            warn!(module = %state.module, error = %e, "random_get: bad buffer");
            Errno::Inval as i32
        }
    }
}

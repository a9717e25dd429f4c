//! `camera` and `dht` namespaces: peripheral reads.
//!
//! Drivers are collaborators behind the [`Camera`] and [`Sensor`] traits. A
//! failing peripheral never traps the guest: sensor reads return NaN and a
//! failed capture leaves guest memory untouched. The cause is logged.

use tracing::debug;
use tracing::warn;

use crate::host::HostState;
use crate::memory;

/// Fixed frame shape: height, width, channels.
pub const IMAGE_SHAPE: [usize; 3] = [480, 640, 3];

/// Byte length of one flattened frame.
pub const IMAGE_BYTES: usize = IMAGE_SHAPE[0] * IMAGE_SHAPE[1] * IMAGE_SHAPE[2];

#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralError {
    /// No driver is attached for this peripheral.
    Unavailable(&'static str),
    /// The driver reported a failure.
    Device(String),
    /// A captured frame did not match [`IMAGE_SHAPE`].
    FrameSize { expected: usize, actual: usize },
}

impl std::fmt::Display for PeripheralError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(what) => write!(f, "No {} attached", what),
            Self::Device(msg) => write!(f, "Device error: {}", msg),
            Self::FrameSize { expected, actual } => {
                write!(f, "Frame has {} bytes, expected {}", actual, expected)
            }
        }
    }
}

impl std::error::Error for PeripheralError {}

/// Synchronous fixed-shape frame capture.
///
/// Frames are interleaved RGB, one byte per channel. Drivers that capture in
/// BGR order (OpenCV does) convert with [`swap_red_blue`] before returning.
pub trait Camera: Send + 'static {
    /// Captures one frame, flattened row-major to [`IMAGE_BYTES`] bytes.
    fn capture(&mut self) -> Result<Vec<u8>, PeripheralError>;
}

/// Swaps the first and third channel of every pixel, turning BGR into RGB
/// and back. A trailing partial pixel is left alone.
pub fn swap_red_blue(frame: &mut [u8]) {
    for pixel in frame.chunks_exact_mut(IMAGE_SHAPE[2]) {
        pixel.swap(0, 2);
    }
}

/// Synchronous temperature/humidity sensor.
pub trait Sensor: Send + 'static {
    fn temperature(&mut self) -> Result<f32, PeripheralError>;
    fn humidity(&mut self) -> Result<f32, PeripheralError>;
}

/// Placeholder for peripherals that are not attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unavailable;

impl Camera for Unavailable {
    fn capture(&mut self) -> Result<Vec<u8>, PeripheralError> {
        Err(PeripheralError::Unavailable("camera"))
    }
}

impl Sensor for Unavailable {
    fn temperature(&mut self) -> Result<f32, PeripheralError> {
        Err(PeripheralError::Unavailable("sensor"))
    }

    fn humidity(&mut self) -> Result<f32, PeripheralError> {
        Err(PeripheralError::Unavailable("sensor"))
    }
}

/// `dht.getTemperature() -> f32`
pub fn temperature(state: &HostState) -> f32 {
    read_sensor(state, "temperature", |sensor| sensor.temperature())
}

/// `dht.getHumidity() -> f32`
pub fn humidity(state: &HostState) -> f32 {
    read_sensor(state, "humidity", |sensor| sensor.humidity())
}

fn read_sensor(
    state: &HostState,
    quantity: &str,
    read: impl FnOnce(&mut dyn Sensor) -> Result<f32, PeripheralError>,
) -> f32 {
    let result = match state.env.sensor.lock() {
        Ok(mut sensor) => read(sensor.as_mut()),
        Err(_) => Err(PeripheralError::Device("sensor lock poisoned".into())),
    };
    result.unwrap_or_else(|e| {
        warn!(module = %state.module, quantity, error = %e, "sensor read failed");
        f32::NAN
    })
}

/// First half of `camera.takeImage`: capture a frame.
///
/// Split from [`store_frame`] so the capture runs before the backend borrows
/// guest memory mutably.
pub fn capture(state: &HostState) -> Option<Vec<u8>> {
    let result = match state.env.camera.lock() {
        Ok(mut camera) => camera.capture(),
        Err(_) => Err(PeripheralError::Device("camera lock poisoned".into())),
    };
    let frame = result
        .and_then(|frame| {
            if frame.len() == IMAGE_BYTES {
                Ok(frame)
            } else {
                Err(PeripheralError::FrameSize {
                    expected: IMAGE_BYTES,
                    actual: frame.len(),
                })
            }
        })
        .map_err(|e| warn!(module = %state.module, error = %e, "image capture failed"))
        .ok()?;
    Some(frame)
}

/// Second half of `camera.takeImage(dst_ptr: i32)`: copy the frame into guest
/// memory. The guest must have allocated [`IMAGE_BYTES`] bytes at `dst_ptr`.
pub fn store_frame(state: &HostState, memory: &mut [u8], dst_ptr: i32, frame: &[u8]) {
    match memory::write_slice(memory, dst_ptr as u32, frame) {
        Ok(()) => debug!(module = %state.module, address = dst_ptr as u32, "image stored"),
        Err(e) => warn!(module = %state.module, error = %e, "image store failed"),
    }
}

//! Microphone capture for the live session.
//!
//! The device delivers samples in whatever callback sizes it likes; the
//! [`Windower`] cuts them into constant windows, each window is encoded once
//! and handed to the frame callback. One callback per window, never batched.

use crate::codec::{self, EncodedFrame};
use crate::error::CaptureError;
use tracing::{info, warn};

/// Default window: 4096 samples (256 ms at 16 kHz).
pub const DEFAULT_WINDOW: usize = 4096;

/// Raw samples from the device callback.
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Device errors raised after the stream is running.
pub type CaptureErrorCallback = Box<dyn FnMut(CaptureError) + Send + 'static>;

/// A microphone opened at a fixed rate. Dropping it releases the device.
pub trait InputDevice {
    fn sample_rate(&self) -> u32;

    /// Begin streaming mono samples into `on_samples`.
    fn start(
        &mut self,
        on_samples: SampleCallback,
        on_error: CaptureErrorCallback,
    ) -> Result<(), CaptureError>;

    /// Stop streaming. Safe to call more than once.
    fn stop(&mut self);
}

/// Cuts an arbitrary sample stream into fixed-size windows.
#[derive(Debug)]
pub struct Windower {
    size: usize,
    pending: Vec<f32>,
}

impl Windower {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            pending: Vec::with_capacity(size),
        }
    }

    pub fn window_size(&self) -> usize {
        self.size
    }

    /// Feed samples; `emit` runs once per completed window.
    pub fn push(&mut self, mut data: &[f32], mut emit: impl FnMut(&[f32])) {
        while !data.is_empty() {
            let take = (self.size - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() == self.size {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }

    /// Samples waiting for the current window to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// A running capture: device + windowing + encoding.
pub struct AudioCaptureSource {
    device: Box<dyn InputDevice>,
    window: usize,
}

impl AudioCaptureSource {
    /// Start capture and deliver one [`EncodedFrame`] per window to `on_frame`.
    ///
    /// On failure the device is handed back so the caller decides when to release it.
    pub fn start<F, E>(
        mut device: Box<dyn InputDevice>,
        window: usize,
        mut on_frame: F,
        mut on_error: E,
    ) -> Result<Self, (CaptureError, Box<dyn InputDevice>)>
    where
        F: FnMut(EncodedFrame) + Send + 'static,
        E: FnMut(CaptureError) + Send + 'static,
    {
        let rate = device.sample_rate();
        let mut windower = Windower::new(window);
        let window = windower.window_size();

        let on_samples: SampleCallback = Box::new(move |data: &[f32]| {
            windower.push(data, |samples| on_frame(codec::encode(samples, rate)));
        });

        // Deliver at most one error; the stream is dead after the first.
        let mut failed = false;
        let on_device_error: CaptureErrorCallback = Box::new(move |err: CaptureError| {
            if failed {
                return;
            }
            failed = true;
            warn!("Capture stopped: {}", err);
            on_error(err);
        });

        if let Err(err) = device.start(on_samples, on_device_error) {
            return Err((err, device));
        }

        info!("🎤 Capture started ({} Hz, {} samples per frame)", rate, window);
        Ok(Self { device, window })
    }

    pub fn window_size(&self) -> usize {
        self.window
    }

    /// Stop capture and hand the device back for release.
    pub fn stop(mut self) -> Box<dyn InputDevice> {
        self.device.stop();
        info!("🎤 Capture stopped");
        self.device
    }
}

//! Error type shared by the queues, kernels and intersection devices.

use thiserror::Error;

/// Failures raised while setting up or driving an intersection device.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No wgpu adapter matched the requested device types
    #[error("No suitable adapter found")]
    NoAdapter,

    /// The adapter refused to create a logical device
    #[error("Failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    /// Shader compilation or pipeline creation failed
    #[error("Kernel setup failed on {device}: {log}")]
    KernelSetup { device: String, log: String },

    /// A batch could not be staged, launched or read back
    #[error("Dispatch failed on {device}: {reason}")]
    Dispatch { device: String, reason: String },

    /// Mapping the hit readback buffer failed
    #[error("Hit readback failed: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),

    /// A blocking queue pop was interrupted
    #[error("Queue wait interrupted")]
    Interrupted,

    /// The kernel was lost with a panicked worker thread
    #[error("Device {0} has no kernel left to run")]
    KernelLost(String),

    /// A batch is larger than the accelerator buffers
    #[error("Ray buffer holds {count} rays but {device} accepts at most {capacity}")]
    CapacityExceeded {
        device: String,
        count: usize,
        capacity: usize,
    },

    /// The OS refused to spawn a device thread
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl DeviceError {
    /// Cancellation is the normal exit path of every worker loop, not a failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, DeviceError::Interrupted)
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{DeviceError, Result};
use crate::ray_buffer::RayBuffer;

#[derive(Default)]
struct QueueState {
    buffers: VecDeque<RayBuffer>,
    interrupted: bool,
}

/// Blocking FIFO handing ray buffers between producer and device threads.
///
/// `interrupt` wakes every thread parked in `pop`, and keeps failing pops with
/// `DeviceError::Interrupted` until `reset_interrupt` is called.
#[derive(Default)]
pub struct RayBufferQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl RayBufferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, ray_buffer: RayBuffer) {
        let mut state = self.state.lock();
        state.buffers.push_back(ray_buffer);
        self.available.notify_one();
    }

    pub fn pop(&self) -> Result<RayBuffer> {
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                return Err(DeviceError::Interrupted);
            }
            if let Some(ray_buffer) = state.buffers.pop_front() {
                return Ok(ray_buffer);
            }
            self.available.wait(&mut state);
        }
    }

    /// Like `pop`, but gives up with `Ok(None)` once `timeout` has passed.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<RayBuffer>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                return Err(DeviceError::Interrupted);
            }
            if let Some(ray_buffer) = state.buffers.pop_front() {
                return Ok(Some(ray_buffer));
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return if state.interrupted { Err(DeviceError::Interrupted) } else { Ok(state.buffers.pop_front()) };
            }
        }
    }

    pub fn size(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Empties the queue, handing the buffers back to the caller.
    pub fn clear(&self) -> Vec<RayBuffer> {
        self.state.lock().buffers.drain(..).collect()
    }

    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.available.notify_all();
    }

    pub fn reset_interrupt(&self) {
        self.state.lock().interrupted = false;
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.lock().interrupted
    }
}

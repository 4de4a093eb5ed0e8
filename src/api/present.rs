//! Present thread.
//!
//! Swapchain presentation can stall on the driver (vsync, compositor
//! backpressure). Presenting from a dedicated thread keeps those stalls
//! out of the frame-submission thread, which can start recording the next
//! frame immediately after submit. Requests travel over a bounded channel
//! keyed by frame index; the bound matches the frame ring, so the
//! submission thread only blocks when every in-flight frame is still
//! waiting to present.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};

use crate::backend::{GpuBackend, TextureHandle};
use crate::FRAMES_IN_FLIGHT;

/// One queued presentation.
#[derive(Debug, Clone, Copy)]
pub struct PresentRequest {
    pub frame_index: usize,
    pub image: TextureHandle,
}

/// Owns the thread issuing swapchain present calls.
pub struct PresentThread {
    sender: Option<Sender<PresentRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl PresentThread {
    /// Spawn the present thread against the given backend.
    pub fn spawn(backend: Arc<dyn GpuBackend>) -> Self {
        let (sender, receiver) = bounded::<PresentRequest>(FRAMES_IN_FLIGHT);
        let handle = std::thread::Builder::new()
            .name("present".into())
            .spawn(move || {
                for request in receiver.iter() {
                    log::trace!(
                        "presenting frame {} (image {:?})",
                        request.frame_index,
                        request.image
                    );
                    if let Err(error) = backend.present(request.image) {
                        log::warn!("present failed for frame {}: {error}", request.frame_index);
                    }
                }
                log::debug!("present thread exiting");
            })
            .expect("failed to spawn present thread");

        Self {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    /// Queue a presentation. Blocks only when the queue already holds a
    /// full ring of frames.
    pub fn enqueue(&self, request: PresentRequest) {
        if let Some(sender) = &self.sender {
            if sender.send(request).is_err() {
                log::warn!("present thread is gone; frame {} dropped", request.frame_index);
            }
        }
    }
}

impl PresentThread {
    /// Close the queue, let the thread drain pending requests, and join
    /// it. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("present thread panicked");
            }
        }
    }
}

impl Drop for PresentThread {
    fn drop(&mut self) {
        // Join so no present call outlives the backend.
        self.shutdown();
    }
}

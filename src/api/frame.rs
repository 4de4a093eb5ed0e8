//! Per-frame-in-flight state.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// View/projection constants uploaded once per frame and bound to every
/// pass through the reserved `u_viewconstants` resource.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ViewConstants {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub inv_view: Mat4,
    pub inv_proj: Mat4,
    /// xyz = camera position, w unused.
    pub camera_position: Vec4,
    /// xy = viewport size, z = near, w = far.
    pub viewport: Vec4,
}

impl Default for ViewConstants {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
            view_proj: Mat4::IDENTITY,
            inv_view: Mat4::IDENTITY,
            inv_proj: Mat4::IDENTITY,
            camera_position: Vec4::ZERO,
            viewport: Vec4::ZERO,
        }
    }
}

/// State of one frame-in-flight slot.
///
/// One context exists per slot in the ring; it is created at api init,
/// mutated every time its slot comes around, and lives until shutdown.
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub view_constants: ViewConstants,
    /// Slot index in the frame ring (`0..FRAMES_IN_FLIGHT`).
    pub frame_index: usize,
    /// Monotonic counter of frames started since api init.
    pub absolute_frame: u64,
    /// Monotonic counter of compute submissions.
    pub compute_frame: u64,
}

impl FrameContext {
    pub fn new(frame_index: usize) -> Self {
        Self {
            view_constants: ViewConstants::default(),
            frame_index,
            absolute_frame: 0,
            compute_frame: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_constants_layout() {
        // The uniform block must be tightly packed for GPU upload.
        assert_eq!(
            std::mem::size_of::<ViewConstants>(),
            5 * 64 + 2 * 16,
        );
    }

    #[test]
    fn test_new_frame_context() {
        let frame = FrameContext::new(2);
        assert_eq!(frame.frame_index, 2);
        assert_eq!(frame.absolute_frame, 0);
    }
}

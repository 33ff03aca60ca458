// =============================================================================
// FRAME SYNCHRONIZER - the per-frame render/present protocol
// =============================================================================
//
// FRAME TIMELINE (one slot):
// ┌──────────────────────────────────────────────────────────────────────────┐
// │ wait slot fence ─> acquire image ─> wait image owner ─> reset fence      │
// │   ─> record ─> submit (wait image_available, signal render_finished      │
// │      + slot fence) ─> present (wait render_finished) ─> next slot        │
// └──────────────────────────────────────────────────────────────────────────┘
//
// The protocol lives here once. The GPU calls it makes go through
// `FrameBackend`, implemented for Vulkan in `backend::frames`.
//
// =============================================================================

use std::fmt;

use crate::backend::sync::ImagesInFlight;
use crate::error::EngineResult;

/// How many frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// GPU operations the frame protocol needs, addressed by frame slot.
///
/// Each slot owns one fence, an "image available" and a "render finished"
/// semaphore, and a command buffer.
pub trait FrameBackend {
    type Fence: Copy + PartialEq + fmt::Debug;

    /// Number of swapchain images
    fn image_count(&self) -> usize;

    fn slot_fence(&self, slot: usize) -> Self::Fence;

    fn wait_fence(&mut self, fence: Self::Fence, timeout: u64) -> EngineResult<()>;

    fn reset_fence(&mut self, fence: Self::Fence) -> EngineResult<()>;

    /// Acquire the next image, signaling the slot's "image available" semaphore.
    fn acquire_image(&mut self, slot: usize, timeout: u64) -> EngineResult<u32>;

    /// Record the slot's command buffer for `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> EngineResult<()>;

    /// Submit the slot's command buffer: wait "image available", signal
    /// "render finished" and the slot fence.
    fn submit(&mut self, slot: usize) -> EngineResult<()>;

    /// Present `image_index` once "render finished" is signaled.
    fn present(&mut self, slot: usize, image_index: u32) -> EngineResult<()>;

    fn wait_idle(&mut self) -> EngineResult<()>;

    /// Release every GPU object. Called once, after all fences were observed.
    fn destroy(&mut self);
}

pub struct FrameSynchronizer<B: FrameBackend> {
    backend: B,
    images_in_flight: ImagesInFlight<B::Fence>,
    /// Which sync slot we're currently using (0 to MAX_FRAMES_IN_FLIGHT-1)
    current_slot: usize,
    frame_count: u64,
    timeout: u64,
    /// Slots whose fence guards a submission the CPU has not yet waited on
    submitted: [bool; MAX_FRAMES_IN_FLIGHT],
    destroyed: bool,
}

impl<B: FrameBackend> FrameSynchronizer<B> {
    /// `timeout` bounds every fence wait and image acquire, in nanoseconds.
    pub fn new(backend: B, timeout: u64) -> Self {
        let images_in_flight = ImagesInFlight::new(backend.image_count());
        log::debug!(
            "Frame synchronizer: {} slots over {} swapchain images",
            MAX_FRAMES_IN_FLIGHT,
            images_in_flight.len()
        );
        Self {
            backend,
            images_in_flight,
            current_slot: 0,
            frame_count: 0,
            timeout,
            submitted: [false; MAX_FRAMES_IN_FLIGHT],
            destroyed: false,
        }
    }

    /// Render and present one frame.
    ///
    /// The slot index and frame counter advance even when this fails; the
    /// caller is expected to stop the loop and tear down on error.
    pub fn render_frame(&mut self) -> EngineResult<()> {
        let slot = self.current_slot;
        let result = self.run_slot(slot);

        self.current_slot = (slot + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frame_count += 1;

        result
    }

    fn run_slot(&mut self, slot: usize) -> EngineResult<()> {
        let fence = self.backend.slot_fence(slot);

        // Previous use of this slot must be finished on the GPU
        self.backend.wait_fence(fence, self.timeout)?;
        self.submitted[slot] = false;

        let image_index = self.backend.acquire_image(slot, self.timeout)?;

        // Another slot may still be rendering into this image
        if let Some(owner) = self.images_in_flight.fence_for(image_index) {
            if owner != fence {
                self.backend.wait_fence(owner, self.timeout)?;
                self.mark_observed(owner);
            }
        }
        self.images_in_flight.claim(image_index, fence);

        self.backend.reset_fence(fence)?;
        self.backend.record(slot, image_index)?;
        self.backend.submit(slot)?;
        self.submitted[slot] = true;

        self.backend.present(slot, image_index)
    }

    fn mark_observed(&mut self, fence: B::Fence) {
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            if self.backend.slot_fence(slot) == fence {
                self.submitted[slot] = false;
            }
        }
    }

    /// Wait for every outstanding submission, then release the backend.
    ///
    /// If completion of some submission cannot be observed (its fence wait
    /// and the device idle wait both fail), the backend is left alive: its
    /// objects may still be in use by the GPU.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            if !self.submitted[slot] {
                continue;
            }
            let fence = self.backend.slot_fence(slot);
            match self.backend.wait_fence(fence, self.timeout) {
                Ok(()) => self.submitted[slot] = false,
                Err(e) => log::warn!("Frame slot {} did not finish before teardown: {}", slot, e),
            }
        }

        match self.backend.wait_idle() {
            // Idle device: every fence has signaled
            Ok(()) => self.submitted = [false; MAX_FRAMES_IN_FLIGHT],
            Err(e) => log::warn!("Device did not go idle before teardown: {}", e),
        }

        if let Some(slot) = self.submitted.iter().position(|&pending| pending) {
            log::error!(
                "Frame slot {} never completed; leaking frame resources instead of destroying them in use",
                slot
            );
            return;
        }

        self.images_in_flight.reset();
        self.backend.destroy();
        log::debug!("Frame synchronizer destroyed after {} frames", self.frame_count);
    }

    /// Frames attempted so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[cfg(test)]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    #[cfg(test)]
    pub fn images_in_flight(&self) -> &ImagesInFlight<B::Fence> {
        &self.images_in_flight
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: FrameBackend> Drop for FrameSynchronizer<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Wait(usize),
        Acquire(usize, u32),
        Reset(usize),
        Record(usize, u32),
        Submit(usize, u32),
        Present(usize, u32),
    }

    /// Simulated GPU. Work only completes when the CPU waits on its fence,
    /// so completion order is whatever order the CPU waits in. Every
    /// submission asserts the synchronization invariants.
    struct SimGpu {
        image_count: usize,
        signaled: [bool; MAX_FRAMES_IN_FLIGHT],
        /// Image an unresolved submission is writing, per fence
        pending: [Option<u32>; MAX_FRAMES_IN_FLIGHT],
        recorded: [Option<u32>; MAX_FRAMES_IN_FLIGHT],
        acquire_order: VecDeque<u32>,
        next_image: u32,
        fail_present_on: Option<usize>,
        hung_fence: Option<usize>,
        device_lost: bool,
        presents: usize,
        ops: Vec<Op>,
        idle_waits: usize,
        destroyed: usize,
    }

    impl SimGpu {
        fn new(image_count: usize) -> Self {
            Self {
                image_count,
                signaled: [true; MAX_FRAMES_IN_FLIGHT],
                pending: [None; MAX_FRAMES_IN_FLIGHT],
                recorded: [None; MAX_FRAMES_IN_FLIGHT],
                acquire_order: VecDeque::new(),
                next_image: 0,
                fail_present_on: None,
                hung_fence: None,
                device_lost: false,
                presents: 0,
                ops: Vec::new(),
                idle_waits: 0,
                destroyed: 0,
            }
        }

        fn with_acquire_order(mut self, order: &[u32]) -> Self {
            self.acquire_order = order.iter().copied().collect();
            self
        }

        fn unresolved(&self) -> usize {
            self.pending.iter().filter(|p| p.is_some()).count()
        }
    }

    impl FrameBackend for SimGpu {
        type Fence = usize;

        fn image_count(&self) -> usize {
            self.image_count
        }

        fn slot_fence(&self, slot: usize) -> usize {
            slot
        }

        fn wait_fence(&mut self, fence: usize, _timeout: u64) -> EngineResult<()> {
            if self.hung_fence == Some(fence) && !self.signaled[fence] {
                return Err(EngineError::Timeout);
            }
            self.ops.push(Op::Wait(fence));
            self.signaled[fence] = true;
            self.pending[fence] = None;
            Ok(())
        }

        fn reset_fence(&mut self, fence: usize) -> EngineResult<()> {
            assert!(self.signaled[fence], "reset of fence {} with work pending", fence);
            self.ops.push(Op::Reset(fence));
            self.signaled[fence] = false;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize, _timeout: u64) -> EngineResult<u32> {
            let image = match self.acquire_order.pop_front() {
                Some(image) => image,
                None => {
                    let image = self.next_image;
                    self.next_image = (self.next_image + 1) % self.image_count as u32;
                    image
                }
            };
            self.ops.push(Op::Acquire(slot, image));
            Ok(image)
        }

        fn record(&mut self, slot: usize, image_index: u32) -> EngineResult<()> {
            assert!(self.pending[slot].is_none(), "slot {} re-recorded while in flight", slot);
            self.ops.push(Op::Record(slot, image_index));
            self.recorded[slot] = Some(image_index);
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> EngineResult<()> {
            let image = self.recorded[slot].expect("submit without record");
            for (other, pending) in self.pending.iter().enumerate() {
                assert!(
                    *pending != Some(image),
                    "image {} written by slot {} while slot {} still renders it",
                    image,
                    slot,
                    other
                );
            }
            self.pending[slot] = Some(image);
            assert!(self.unresolved() <= MAX_FRAMES_IN_FLIGHT);
            self.ops.push(Op::Submit(slot, image));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> EngineResult<()> {
            let frame = self.presents;
            self.presents += 1;
            if self.fail_present_on == Some(frame) {
                return Err(EngineError::SwapchainOutOfDate);
            }
            self.ops.push(Op::Present(slot, image_index));
            Ok(())
        }

        fn wait_idle(&mut self) -> EngineResult<()> {
            self.idle_waits += 1;
            if self.device_lost {
                return Err(EngineError::DeviceLost);
            }
            // Nothing outstanding survives an idle device, hung fences included
            self.signaled = [true; MAX_FRAMES_IN_FLIGHT];
            self.pending = [None; MAX_FRAMES_IN_FLIGHT];
            self.hung_fence = None;
            Ok(())
        }

        fn destroy(&mut self) {
            assert_eq!(self.unresolved(), 0, "destroyed with submissions in flight");
            self.destroyed += 1;
        }
    }

    #[test]
    fn frame_counter_advances_once_per_frame() {
        let mut frames = FrameSynchronizer::new(SimGpu::new(3), u64::MAX);

        for n in 1..=10u64 {
            frames.render_frame().unwrap();
            assert_eq!(frames.frame_count(), n);
            assert_eq!(frames.current_slot(), (n as usize) % MAX_FRAMES_IN_FLIGHT);
        }
        assert_eq!(frames.backend().presents, 10);
    }

    #[test]
    fn one_frame_follows_protocol_order() {
        let mut frames = FrameSynchronizer::new(SimGpu::new(3), u64::MAX);
        frames.render_frame().unwrap();

        assert_eq!(
            frames.backend().ops,
            vec![
                Op::Wait(0),
                Op::Acquire(0, 0),
                Op::Reset(0),
                Op::Record(0, 0),
                Op::Submit(0, 0),
                Op::Present(0, 0),
            ]
        );
        assert_eq!(frames.images_in_flight().fence_for(0), Some(0));
    }

    #[test]
    fn reused_image_waits_on_previous_owner() {
        // Both slots get image 0 back to back
        let gpu = SimGpu::new(3).with_acquire_order(&[0, 0]);
        let mut frames = FrameSynchronizer::new(gpu, u64::MAX);

        frames.render_frame().unwrap();
        frames.render_frame().unwrap();

        let ops = &frames.backend().ops;
        let second = &ops[6..];
        assert_eq!(
            second,
            &[
                Op::Wait(1),
                Op::Acquire(1, 0),
                Op::Wait(0),
                Op::Reset(1),
                Op::Record(1, 0),
                Op::Submit(1, 0),
                Op::Present(1, 0),
            ]
        );
        assert_eq!(frames.images_in_flight().fence_for(0), Some(1));
    }

    #[test]
    fn invariants_hold_for_any_image_count() {
        for image_count in 1..=4 {
            let mut frames = FrameSynchronizer::new(SimGpu::new(image_count), u64::MAX);
            for _ in 0..25 {
                frames.render_frame().unwrap();
                assert!(frames.backend().unresolved() <= MAX_FRAMES_IN_FLIGHT);
            }
            assert_eq!(frames.frame_count(), 25);
        }
    }

    #[test]
    fn out_of_order_images_never_overlap() {
        let order = [2, 0, 0, 1, 2, 2, 1, 0, 1, 1, 0, 2];
        let gpu = SimGpu::new(3).with_acquire_order(&order);
        let mut frames = FrameSynchronizer::new(gpu, u64::MAX);

        for _ in 0..order.len() {
            frames.render_frame().unwrap();
        }
        assert_eq!(frames.backend().presents, order.len());
    }

    #[test]
    fn failed_frame_still_advances_slot() {
        let mut gpu = SimGpu::new(3);
        gpu.fail_present_on = Some(1);
        let mut frames = FrameSynchronizer::new(gpu, u64::MAX);

        frames.render_frame().unwrap();
        let err = frames.render_frame().unwrap_err();

        assert!(matches!(err, EngineError::SwapchainOutOfDate));
        assert_eq!(frames.frame_count(), 2);
        assert_eq!(frames.current_slot(), 0);
    }

    #[test]
    fn timeout_is_reported_distinctly() {
        let mut gpu = SimGpu::new(2).with_acquire_order(&[0, 1, 0]);
        gpu.hung_fence = Some(0);
        let mut frames = FrameSynchronizer::new(gpu, 1_000_000);

        frames.render_frame().unwrap();
        frames.render_frame().unwrap();
        // Slot 0 comes around again while its first submission never completes
        assert!(matches!(frames.render_frame(), Err(EngineError::Timeout)));
        assert_eq!(frames.backend().unresolved(), 2);

        // The hung fence times out again, but device idle observes everything
        frames.destroy();
        let gpu = frames.backend();
        assert_eq!(gpu.idle_waits, 1);
        assert_eq!(gpu.unresolved(), 0);
        assert_eq!(gpu.destroyed, 1);
    }

    #[test]
    fn teardown_keeps_resources_when_completion_is_never_observed() {
        let mut gpu = SimGpu::new(2).with_acquire_order(&[0, 1, 0]);
        gpu.hung_fence = Some(0);
        gpu.device_lost = true;
        let mut frames = FrameSynchronizer::new(gpu, 1_000_000);

        frames.render_frame().unwrap();
        frames.render_frame().unwrap();
        assert!(frames.render_frame().is_err());

        frames.destroy();
        let gpu = frames.backend();
        // Slot 1 was observed, slot 0 never was
        assert_eq!(gpu.pending[0], Some(0));
        assert_eq!(gpu.pending[1], None);
        assert_eq!(gpu.destroyed, 0);
        assert_eq!(frames.images_in_flight().fence_for(0), Some(0));

        // Dropping afterwards must not retry the release
        drop(frames);
    }

    #[test]
    fn teardown_waits_for_submitted_slots_once() {
        let mut frames = FrameSynchronizer::new(SimGpu::new(3), u64::MAX);
        for _ in 0..3 {
            frames.render_frame().unwrap();
        }
        let before = frames.backend().ops.len();

        frames.destroy();
        frames.destroy();

        let gpu = frames.backend();
        assert_eq!(&gpu.ops[before..], &[Op::Wait(0), Op::Wait(1)]);
        assert_eq!(gpu.idle_waits, 1);
        assert_eq!(gpu.destroyed, 1);
        assert_eq!(frames.images_in_flight().fence_for(0), None);
    }

    #[test]
    fn teardown_skips_slots_that_never_submitted() {
        let mut gpu = SimGpu::new(3);
        gpu.fail_present_on = Some(0);
        let mut frames = FrameSynchronizer::new(gpu, u64::MAX);

        assert!(frames.render_frame().is_err());
        frames.destroy();

        // Slot 0 submitted before present failed; slot 1 never ran
        let gpu = frames.backend();
        assert_eq!(gpu.ops.last(), Some(&Op::Wait(0)));
        assert_eq!(gpu.destroyed, 1);
    }
}

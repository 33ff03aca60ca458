// Per-slot GPU objects for the frame loop
//
// Command pool + one command buffer, fence and semaphore pair per frame slot,
// plus the clear render pass and one framebuffer per swapchain image.

use ash::vk;
use glam::Vec4;
use std::sync::Arc;

use super::render_pass::{create_framebuffers, create_render_pass, destroy_framebuffers};
use super::sync::FrameSync;
use super::{Swapchain, VulkanDevice};
use crate::error::EngineResult;
use crate::renderer::{FrameBackend, FrameSynchronizer, MAX_FRAMES_IN_FLIGHT};

pub struct VulkanFrames {
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    frame_sync: Vec<FrameSync>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    clear_color: vk::ClearValue,
    wait_stages: [vk::PipelineStageFlags; 1],
    swapchain: Arc<Swapchain>,
    device: Arc<VulkanDevice>,
}

impl VulkanFrames {
    pub fn new(
        device: Arc<VulkanDevice>,
        swapchain: Arc<Swapchain>,
        clear_color: Vec4,
    ) -> EngineResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_families.graphics)
            // Each slot's buffer is reset and re-recorded every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }?;

        // Everything below is owned by `frames`, so an early return through
        // `?` releases what was created so far
        let mut frames = Self {
            command_pool,
            command_buffers: Vec::new(),
            frame_sync: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            clear_color: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color.to_array(),
                },
            },
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            swapchain,
            device,
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);
        frames.command_buffers = unsafe { frames.device.device.allocate_command_buffers(&alloc_info) }?;

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let sync = FrameSync::new(&frames.device.device)?;
            frames.frame_sync.push(sync);
        }

        frames.render_pass = create_render_pass(&frames.device.device, frames.swapchain.format)?;
        frames.framebuffers = create_framebuffers(
            &frames.device.device,
            &frames.swapchain.image_views,
            frames.render_pass,
            frames.swapchain.extent,
        )?;

        log::info!(
            "Created {} frame slots for {} swapchain images",
            MAX_FRAMES_IN_FLIGHT,
            frames.swapchain.image_count()
        );
        Ok(frames)
    }

    fn release(&mut self) {
        let device = &self.device.device;
        unsafe {
            for sync in self.frame_sync.drain(..) {
                sync.destroy(device);
            }

            destroy_framebuffers(device, &self.framebuffers);
            self.framebuffers.clear();

            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }

            if !self.command_buffers.is_empty() {
                device.free_command_buffers(self.command_pool, &self.command_buffers);
                self.command_buffers.clear();
            }

            if self.command_pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.command_pool, None);
                self.command_pool = vk::CommandPool::null();
            }
        }
    }
}

impl FrameBackend for VulkanFrames {
    type Fence = vk::Fence;

    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn slot_fence(&self, slot: usize) -> vk::Fence {
        self.frame_sync[slot].in_flight_fence
    }

    fn wait_fence(&mut self, fence: vk::Fence, timeout: u64) -> EngineResult<()> {
        unsafe { self.device.device.wait_for_fences(&[fence], true, timeout) }?;
        Ok(())
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> EngineResult<()> {
        unsafe { self.device.device.reset_fences(&[fence]) }?;
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize, timeout: u64) -> EngineResult<u32> {
        self.swapchain
            .acquire_next_image(timeout, self.frame_sync[slot].image_available)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> EngineResult<()> {
        let device = &self.device.device;
        let cmd = self.command_buffers[slot];

        let clear_values = [self.clear_color];
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.swapchain.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;

            // Load op CLEAR does the work; the pass also moves the image to PRESENT_SRC
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> EngineResult<()> {
        let sync = &self.frame_sync[slot];

        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [self.command_buffers[slot]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)      // Wait for image to be available
            .wait_dst_stage_mask(&self.wait_stages) // Which stage waits
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores); // Signal when done

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence, // Signal this fence when GPU is done
            )
        }?;
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> EngineResult<()> {
        self.swapchain.present(
            self.device.present_queue,
            image_index,
            &[self.frame_sync[slot].render_finished],
        )
    }

    fn wait_idle(&mut self) -> EngineResult<()> {
        self.device.wait_idle()
    }

    fn destroy(&mut self) {
        self.release();
    }
}

impl Drop for VulkanFrames {
    fn drop(&mut self) {
        // Live objects here mean construction failed part way, or teardown
        // could not observe the GPU finishing with them
        if self.command_pool == vk::CommandPool::null() {
            return;
        }
        match self.device.wait_idle() {
            Ok(()) => self.release(),
            Err(e) => log::error!("Leaking frame resources, device not idle: {}", e),
        }
    }
}

/// Frame loop over the window's swapchain
pub type Renderer = FrameSynchronizer<VulkanFrames>;

impl FrameSynchronizer<VulkanFrames> {
    pub fn for_swapchain(
        device: Arc<VulkanDevice>,
        swapchain: Arc<Swapchain>,
        clear_color: Vec4,
        timeout: u64,
    ) -> EngineResult<Self> {
        let frames = VulkanFrames::new(device, swapchain, clear_color)?;
        Ok(Self::new(frames, timeout))
    }
}

// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync
// Critical for correct and efficient multi-frame rendering

use ash::vk;

use crate::error::EngineResult;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> EngineResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder()
            .flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        let (image_available, render_finished, in_flight_fence) = create_or_unwind(
            || Ok(unsafe { device.create_semaphore(&semaphore_info, None) }?),
            || Ok(unsafe { device.create_fence(&fence_info, None) }?),
            |semaphore| unsafe { device.destroy_semaphore(semaphore, None) },
        )?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Two semaphores then a fence; on failure, semaphores already created are destroyed.
fn create_or_unwind<S: Copy, F>(
    mut create_semaphore: impl FnMut() -> EngineResult<S>,
    create_fence: impl FnOnce() -> EngineResult<F>,
    mut destroy_semaphore: impl FnMut(S),
) -> EngineResult<(S, S, F)> {
    let image_available = create_semaphore()?;

    let render_finished = match create_semaphore() {
        Ok(semaphore) => semaphore,
        Err(e) => {
            destroy_semaphore(image_available);
            return Err(e);
        }
    };

    match create_fence() {
        Ok(fence) => Ok((image_available, render_finished, fence)),
        Err(e) => {
            destroy_semaphore(image_available);
            destroy_semaphore(render_finished);
            Err(e)
        }
    }
}

/// Which fence last claimed each swapchain image.
///
/// A slot about to render into image `i` must first wait on `fence_for(i)`:
/// GPU work finishes in any order, so slot order alone does not say whether
/// the previous writer of `i` is done.
#[derive(Debug, Clone)]
pub struct ImagesInFlight<F> {
    owners: Vec<Option<F>>,
}

impl<F: Copy + PartialEq> ImagesInFlight<F> {
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn fence_for(&self, image_index: u32) -> Option<F> {
        self.owners.get(image_index as usize).copied().flatten()
    }

    /// Record `fence` as the owner of `image_index`, returning the previous owner.
    pub fn claim(&mut self, image_index: u32, fence: F) -> Option<F> {
        self.owners
            .get_mut(image_index as usize)
            .and_then(|owner| owner.replace(fence))
    }

    /// Forget every owner (after the device went idle).
    pub fn reset(&mut self) {
        self.owners.iter_mut().for_each(|owner| *owner = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::cell::RefCell;

    /// Runs `create_or_unwind` where the `fail_at`-th creation (0, 1 = semaphores,
    /// 2 = fence) fails, returning the result and the semaphores still alive.
    fn create_failing_at(fail_at: Option<u32>) -> (EngineResult<(u32, u32, u32)>, Vec<u32>) {
        let live = RefCell::new(Vec::new());
        let next = RefCell::new(0u32);

        let create = || {
            let id = *next.borrow();
            *next.borrow_mut() += 1;
            if fail_at == Some(id) {
                Err(EngineError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
            } else {
                Ok(id)
            }
        };

        let result = create_or_unwind(
            || {
                let id = create()?;
                live.borrow_mut().push(id);
                Ok(id)
            },
            create,
            |semaphore| live.borrow_mut().retain(|&id| id != semaphore),
        );
        let live = live.into_inner();
        (result, live)
    }

    #[test]
    fn sync_objects_created_in_order() {
        let (result, live) = create_failing_at(None);
        assert_eq!(result.unwrap(), (0, 1, 2));
        assert_eq!(live, vec![0, 1]);
    }

    #[test]
    fn failed_sync_creation_releases_earlier_semaphores() {
        for fail_at in 0..3 {
            let (result, live) = create_failing_at(Some(fail_at));
            assert!(result.is_err(), "creation {} should fail", fail_at);
            assert!(live.is_empty(), "leaked {:?} when creation {} failed", live, fail_at);
        }
    }

    #[test]
    fn starts_empty() {
        let ledger = ImagesInFlight::<u32>::new(3);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.fence_for(0), None);
        assert_eq!(ledger.fence_for(2), None);
        assert_eq!(ledger.fence_for(7), None);
    }

    #[test]
    fn claim_replaces_previous_owner() {
        let mut ledger = ImagesInFlight::new(2);
        assert_eq!(ledger.claim(1, 10u32), None);
        assert_eq!(ledger.fence_for(1), Some(10));
        assert_eq!(ledger.claim(1, 11), Some(10));
        assert_eq!(ledger.fence_for(1), Some(11));
        assert_eq!(ledger.fence_for(0), None);

        ledger.reset();
        assert_eq!(ledger.fence_for(1), None);
    }
}

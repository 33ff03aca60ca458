// Engine error taxonomy
//
// Setup failures split into two kinds: the requested capability set can
// never be satisfied on this machine (Configuration), or the driver
// rejected a call and trying again later may work (Driver).

use ash::vk;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller asked for something the hardware does not offer. Not retryable.
    Configuration,
    /// The driver or window system refused a call.
    Driver,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No Vulkan-capable GPU found")]
    NoAdapterFound,

    #[error("GPU does not support required device extension '{0}'")]
    UnsupportedExtension(String),

    #[error("GPU does not support required device feature '{0}'")]
    UnsupportedFeature(&'static str),

    #[error("No queue family supports {0}")]
    NoSuitableQueueFamily(&'static str),

    #[error("Swapchain creation failed: {0}")]
    SwapchainCreationFailed(vk::Result),

    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("Timed out waiting for the GPU")]
    Timeout,

    #[error("GPU device lost")]
    DeviceLost,

    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    #[error("Window error: {0}")]
    Window(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoAdapterFound
            | Self::UnsupportedExtension(_)
            | Self::UnsupportedFeature(_)
            | Self::NoSuitableQueueFamily(_) => ErrorKind::Configuration,
            Self::SwapchainCreationFailed(_)
            | Self::SwapchainOutOfDate
            | Self::Timeout
            | Self::DeviceLost
            | Self::Loading(_)
            | Self::Vulkan(_)
            | Self::Window(_) => ErrorKind::Driver,
        }
    }

    /// Whether backing off and repeating the failed operation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::DeviceLost
                | Self::SwapchainOutOfDate
                | Self::SwapchainCreationFailed(_)
        )
    }
}

impl From<vk::Result> for EngineError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::TIMEOUT => Self::Timeout,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SwapchainOutOfDate,
            other => Self::Vulkan(other),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

//! Centralized device initialization for NHDRRNet
//!
//! GPU runs go through a single WGPU device shared by the whole process.
//! Tests and CPU-only runs use the NdArray backend instead.

use burn::backend::{Autodiff, NdArray, Wgpu, wgpu::WgpuDevice};
use std::sync::OnceLock;

/// Global device instance to avoid conflicts
static DEVICE: OnceLock<WgpuDevice> = OnceLock::new();

/// Initialize the WGPU device once and hand out clones of it.
///
/// # Example
/// ```no_run
/// use nhdrrnet::device::init_device;
///
/// let device = init_device();
/// ```
pub fn init_device() -> WgpuDevice {
    DEVICE
        .get_or_init(|| {
            let device = WgpuDevice::default();
            log::info!("initialized WGPU device {:?}", device);
            device
        })
        .clone()
}

/// Type alias for the Wgpu backend used throughout the project
pub type Backend = Wgpu<f32, i32>;

/// Type alias for autodiff backend, for callers that train the model
pub type AutodiffBackend = Autodiff<Backend>;

/// CPU backend; normalization layers run on running statistics here.
pub type CpuBackend = NdArray<f32>;

//! Host-side control layer for CUDA execution graphs.
//!
//! This crate builds, instantiates, updates, and launches asynchronous
//! execution graphs through the CUDA driver API: DAGs whose nodes are units
//! of device work (kernel launches, memory operations, child graphs, host
//! callbacks, event and semaphore operations) and whose edges are explicit
//! or capture-derived dependencies.
//!
//! The graph API has no coverage in cudarc's safe layer, so this crate goes
//! to `cudarc::driver::sys` directly and layers three disciplines on top:
//!
//! - ownership-tagged handles — every wrapper knows whether dropping it
//!   destroys the underlying driver resource;
//! - lazy status translation — failure messages are only formatted when a
//!   driver call actually fails;
//! - runtime capability gating — operations the linked driver predates fail
//!   with [`GraphError::UnsupportedFeature`] instead of reaching the driver.
//!
//! # Example
//!
//! ```ignore
//! use cudagraph::{
//!     DriverCapabilities, GraphTemplate, InstantiateOptions, MemsetNodeParams, PrimaryContext,
//!     Stream,
//! };
//!
//! let ctx = PrimaryContext::retain(0)?;
//! let stream = Stream::create(ctx.handle())?;
//! let caps = DriverCapabilities::query()?;
//!
//! // Two independent fills, then a copy that depends on both.
//! let template = GraphTemplate::new()?;
//! let a = template.add_memset_node(&fill_a, &[], ctx.handle())?;
//! let b = template.add_memset_node(&fill_b, &[], ctx.handle())?;
//! let _c = template.add_memcpy_node(&gather, &[a, b], ctx.handle())?;
//!
//! let instance = template.instantiate(&InstantiateOptions::new(), &caps)?;
//! instance.launch(&stream)?;
//! stream.synchronize()?;
//! # Ok::<(), cudagraph::GraphError>(())
//! ```
//!
//! # Requirements
//!
//! - NVIDIA driver with CUDA 11.0+ (individual features are gated at
//!   runtime; see [`Feature`])
//! - CUDA 12 driver headers via cudarc's default bindings

#![warn(missing_docs)]

pub mod capability;
pub mod capture;
pub mod context;
pub mod error;
pub mod event;
mod handle;
pub mod instance;
pub mod node;
mod status;
pub mod stream;
pub mod template;

pub use capability::{DriverCapabilities, DriverVersion, Feature};
pub use capture::CaptureMode;
pub use context::{ContextHandle, PrimaryContext, ScopedContextGuard};
pub use error::{GraphError, Result};
pub use event::Event;
pub use instance::{GraphInstance, InstantiateOptions, UpdateStatus};
pub use node::params::{
    BatchMemOpParams, ConditionalKind, ConditionalParams, CopyOperand, ExtSemaphoreSignalParams,
    ExtSemaphoreWaitParams, HostNodeParams, KernelNodeParams, MemcpyNodeParams, MemsetNodeParams,
};
pub use node::{GraphNode, NodeKind};
pub use stream::Stream;
pub use template::GraphTemplate;

/// Check if a CUDA driver and at least one device are available at runtime.
///
/// Returns `false` when the driver library is missing entirely; cudarc
/// panics when it cannot load the library, so the probe catches that.
pub fn is_cuda_available() -> bool {
    std::panic::catch_unwind(|| {
        use cudarc::driver::sys as cuda_sys;
        let mut count: i32 = 0;
        unsafe {
            cuda_sys::cuInit(0) == cuda_sys::CUresult::CUDA_SUCCESS
                && cuda_sys::cuDeviceGetCount(&mut count) == cuda_sys::CUresult::CUDA_SUCCESS
                && count > 0
        }
    })
    .unwrap_or(false)
}

/// The linked driver's version, probed once per process.
pub fn driver_version() -> Result<DriverVersion> {
    DriverCapabilities::query().map(|caps| caps.version())
}

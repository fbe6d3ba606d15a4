//! Stream collaborator interface.
//!
//! Streams are an external concern; graphs only need a narrow slice of them:
//! creation against a context, asynchronous enqueue of a graph instance,
//! synchronization, and the capture entry points. This wrapper exposes
//! exactly that slice and remembers which context the stream belongs to, so
//! launch and upload can scope the right context without asking the driver.

use cudarc::driver::sys as cuda_sys;

use crate::capture::{self, CaptureMode};
use crate::context::{scoped_override, ContextHandle};
use crate::error::Result;
use crate::handle::Handle;
use crate::instance::GraphInstance;
use crate::status::{check, identify};
use crate::template::GraphTemplate;

/// A CUDA stream bound to a known context.
pub struct Stream {
    handle: Handle<cuda_sys::CUstream>,
    context: ContextHandle,
}

impl Stream {
    /// Create a new stream on `context`.
    pub fn create(context: ContextHandle) -> Result<Self> {
        let _ctx = scoped_override(context)?;
        let mut raw: cuda_sys::CUstream = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuStreamCreate(
                    &mut raw,
                    cuda_sys::CUstream_flags::CU_STREAM_DEFAULT as u32,
                )
            },
            || format!("creating a stream on {context}"),
        )?;
        Ok(Self {
            handle: Handle::adopt(raw),
            context,
        })
    }

    /// Wrap a stream owned elsewhere, without taking ownership.
    ///
    /// # Safety
    ///
    /// `raw` must be a live stream belonging to `context`, and must outlive
    /// the returned wrapper.
    pub unsafe fn from_raw(raw: cuda_sys::CUstream, context: ContextHandle) -> Self {
        Self {
            handle: Handle::alias(raw),
            context,
        }
    }

    /// The raw driver handle.
    pub fn raw(&self) -> cuda_sys::CUstream {
        self.handle.raw()
    }

    /// The context this stream was created under.
    pub fn context(&self) -> ContextHandle {
        self.context
    }

    /// Block the calling thread until all work enqueued so far has completed.
    pub fn synchronize(&self) -> Result<()> {
        check(unsafe { cuda_sys::cuStreamSynchronize(self.raw()) }, || {
            format!("synchronizing {}", identify::stream(self.raw()))
        })
    }

    /// Put this stream into capture mode. See [`capture::begin`].
    pub fn begin_capture(&self, mode: CaptureMode) -> Result<()> {
        capture::begin(self, mode)
    }

    /// Whether this stream is currently recording. See [`capture::is_capturing`].
    pub fn is_capturing(&self) -> Result<bool> {
        capture::is_capturing(self)
    }

    /// Finalize recording into an owned template. See [`capture::end`].
    pub fn end_capture(&self) -> Result<GraphTemplate> {
        capture::end(self)
    }

    /// Enqueue `instance` for asynchronous execution on this stream.
    ///
    /// Equivalent to [`GraphInstance::launch`] with the arguments flipped.
    pub fn launch_graph(&self, instance: &GraphInstance) -> Result<()> {
        instance.launch(self)
    }
}

// A stream handle may be used from any thread that makes its context
// current; cross-thread serialization is the caller's responsibility.
unsafe impl Send for Stream {}
unsafe impl Sync for Stream {}

//! Event collaborator interface.
//!
//! Events appear in graphs as the payload of event-record and event-wait
//! nodes, and in tests as the ordering observer. Only the operations graphs
//! depend on are exposed.

use cudarc::driver::sys as cuda_sys;

use crate::context::{scoped_override, ContextHandle};
use crate::error::Result;
use crate::handle::Handle;
use crate::status::{check, identify};
use crate::stream::Stream;

/// A CUDA event.
pub struct Event {
    handle: Handle<cuda_sys::CUevent>,
}

impl Event {
    /// Create a new event on `context`.
    pub fn create(context: ContextHandle) -> Result<Self> {
        let _ctx = scoped_override(context)?;
        let mut raw: cuda_sys::CUevent = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuEventCreate(&mut raw, cuda_sys::CUevent_flags::CU_EVENT_DEFAULT as u32)
            },
            || format!("creating an event on {context}"),
        )?;
        Ok(Self {
            handle: Handle::adopt(raw),
        })
    }

    /// The raw driver handle.
    pub fn raw(&self) -> cuda_sys::CUevent {
        self.handle.raw()
    }

    /// Record this event on `stream`.
    pub fn record(&self, stream: &Stream) -> Result<()> {
        check(
            unsafe { cuda_sys::cuEventRecord(self.raw(), stream.raw()) },
            || {
                format!(
                    "recording event {:#x} on {}",
                    self.raw() as usize,
                    identify::stream(stream.raw())
                )
            },
        )
    }

    /// Block the calling thread until all work captured by this event has
    /// completed.
    pub fn synchronize(&self) -> Result<()> {
        check(unsafe { cuda_sys::cuEventSynchronize(self.raw()) }, || {
            format!("synchronizing event {:#x}", self.raw() as usize)
        })
    }

    /// Whether the work captured by this event has completed (non-blocking).
    pub fn query(&self) -> Result<bool> {
        let status = unsafe { cuda_sys::cuEventQuery(self.raw()) };
        if status == cuda_sys::CUresult::CUDA_ERROR_NOT_READY {
            return Ok(false);
        }
        check(status, || {
            format!("querying event {:#x}", self.raw() as usize)
        })?;
        Ok(true)
    }
}

// Events can be used from any thread within their context.
unsafe impl Send for Event {}
unsafe impl Sync for Event {}

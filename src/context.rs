//! Device-context scoping.
//!
//! Several graph operations require a particular device context to be
//! current on the issuing thread. This module provides the scoped override
//! used throughout the crate: push the required context, run the call,
//! restore the prior context when the guard drops — on every exit path,
//! success or failure. The driver's context stack is per host thread; this
//! crate never touches it except through the guard.

use std::marker::PhantomData;

use cudarc::driver::sys as cuda_sys;

use crate::error::Result;
use crate::status::{check, identify};

/// A non-owning reference to a device context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextHandle(cuda_sys::CUcontext);

impl ContextHandle {
    /// Wrap a raw context handle.
    ///
    /// # Safety
    ///
    /// The handle must refer to a live context for as long as this value is
    /// used to issue calls.
    pub unsafe fn from_raw(raw: cuda_sys::CUcontext) -> Self {
        Self(raw)
    }

    /// The raw driver handle.
    pub fn raw(&self) -> cuda_sys::CUcontext {
        self.0
    }
}

impl std::fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&identify::context(self.0))
    }
}

// Context handles are plain identifiers; the driver serializes access to the
// context object itself.
unsafe impl Send for ContextHandle {}
unsafe impl Sync for ContextHandle {}

/// Guard that keeps a context current on this thread until dropped.
///
/// Created by [`scoped_override`]. Restores the previously current context
/// when dropped, including when unwinding out of a failed call.
pub struct ScopedContextGuard {
    // The driver's context stack is thread-local; the pop must happen on the
    // thread that pushed.
    _not_send: PhantomData<*const ()>,
}

/// Make `context` current for the lifetime of the returned guard.
pub(crate) fn scoped_override(context: ContextHandle) -> Result<ScopedContextGuard> {
    check(unsafe { cuda_sys::cuCtxPushCurrent_v2(context.raw()) }, || {
        format!("making {} current", identify::context(context.raw()))
    })?;
    Ok(ScopedContextGuard {
        _not_send: PhantomData,
    })
}

impl Drop for ScopedContextGuard {
    fn drop(&mut self) {
        let mut previous: cuda_sys::CUcontext = std::ptr::null_mut();
        // A failed pop leaves the thread's stack as the driver reports it;
        // there is no way to surface an error from Drop.
        unsafe {
            let _ = cuda_sys::cuCtxPopCurrent_v2(&mut previous);
        }
    }
}

/// An owned reference to a device's primary context.
///
/// Retains the primary context on construction and releases it on drop. This
/// is the entry point external collaborators (and the hardware tests) use to
/// obtain a [`ContextHandle`] for streams, events, and memory-operation
/// nodes.
pub struct PrimaryContext {
    device: cuda_sys::CUdevice,
    handle: ContextHandle,
}

impl PrimaryContext {
    /// Retain the primary context of device `ordinal`.
    pub fn retain(ordinal: i32) -> Result<Self> {
        check(unsafe { cuda_sys::cuInit(0) }, || {
            "initializing the driver".to_string()
        })?;

        let mut device: cuda_sys::CUdevice = 0;
        check(unsafe { cuda_sys::cuDeviceGet(&mut device, ordinal) }, || {
            format!("looking up device {ordinal}")
        })?;

        let mut raw: cuda_sys::CUcontext = std::ptr::null_mut();
        check(
            unsafe { cuda_sys::cuDevicePrimaryCtxRetain(&mut raw, device) },
            || format!("retaining the primary context of device {ordinal}"),
        )?;

        Ok(Self {
            device,
            handle: unsafe { ContextHandle::from_raw(raw) },
        })
    }

    /// The context handle.
    pub fn handle(&self) -> ContextHandle {
        self.handle
    }
}

impl Drop for PrimaryContext {
    fn drop(&mut self) {
        unsafe {
            let _ = cuda_sys::cuDevicePrimaryCtxRelease_v2(self.device);
        }
    }
}

unsafe impl Send for PrimaryContext {}
unsafe impl Sync for PrimaryContext {}

//! Ownership-tagged wrappers for opaque driver handles.
//!
//! Driver handles are plain pointers with no lifetime information of their
//! own. Whether a wrapper is responsible for destroying the underlying
//! resource is decided once, at construction: [`Handle::adopt`] takes
//! ownership, [`Handle::alias`] does not. Exactly one wrapper owns any given
//! handle at a time; aliases are always explicit.

use cudarc::driver::sys as cuda_sys;

/// A raw driver handle kind: null sentinel, kind name, and destructor.
pub(crate) trait RawHandle: Copy {
    /// Resource kind, used in debug formatting.
    const KIND: &'static str;

    /// The per-kind "no handle" sentinel.
    fn null() -> Self;

    /// Whether this is the null sentinel.
    fn is_null(self) -> bool;

    /// Release the underlying driver resource.
    ///
    /// # Safety
    ///
    /// The handle must be valid and must not be used after this call.
    unsafe fn destroy(self) -> cuda_sys::CUresult;
}

macro_rules! raw_handle {
    ($ty:ty, $kind:literal, $destroy:path) => {
        impl RawHandle for $ty {
            const KIND: &'static str = $kind;

            fn null() -> Self {
                std::ptr::null_mut()
            }

            fn is_null(self) -> bool {
                self.is_null()
            }

            unsafe fn destroy(self) -> cuda_sys::CUresult {
                $destroy(self)
            }
        }
    };
}

raw_handle!(cuda_sys::CUgraph, "graph template", cuda_sys::cuGraphDestroy);
raw_handle!(
    cuda_sys::CUgraphExec,
    "graph instance",
    cuda_sys::cuGraphExecDestroy
);
raw_handle!(cuda_sys::CUstream, "stream", cuda_sys::cuStreamDestroy_v2);
raw_handle!(cuda_sys::CUevent, "event", cuda_sys::cuEventDestroy_v2);

/// An opaque driver handle plus the destruction responsibility flag.
pub(crate) struct Handle<T: RawHandle> {
    raw: T,
    owned: bool,
}

impl<T: RawHandle> Handle<T> {
    /// Wrap a handle and take ownership of its destruction.
    pub(crate) fn adopt(raw: T) -> Self {
        Self { raw, owned: true }
    }

    /// Wrap a handle without taking ownership.
    pub(crate) fn alias(raw: T) -> Self {
        Self { raw, owned: false }
    }

    /// The raw handle value.
    pub(crate) fn raw(&self) -> T {
        self.raw
    }

    /// Whether dropping this wrapper releases the resource.
    pub(crate) fn is_owned(&self) -> bool {
        self.owned
    }

    /// Transfer the raw handle out, giving up destruction responsibility.
    pub(crate) fn release(mut self) -> T {
        self.owned = false;
        self.raw
    }
}

impl<T: RawHandle> Drop for Handle<T> {
    fn drop(&mut self) {
        if self.owned && !self.raw.is_null() {
            // Destruction failures cannot be reported from Drop; the handle
            // is unusable either way.
            unsafe {
                let _ = T::destroy(self.raw);
            }
        }
    }
}

impl<T: RawHandle> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} handle ({})",
            T::KIND,
            if self.owned { "owned" } else { "alias" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static DESTROYED: Cell<u32> = const { Cell::new(0) };
    }

    #[derive(Clone, Copy)]
    struct FakeHandle(usize);

    impl RawHandle for FakeHandle {
        const KIND: &'static str = "fake";

        fn null() -> Self {
            FakeHandle(0)
        }

        fn is_null(self) -> bool {
            self.0 == 0
        }

        unsafe fn destroy(self) -> cuda_sys::CUresult {
            DESTROYED.with(|d| d.set(d.get() + 1));
            cuda_sys::CUresult::CUDA_SUCCESS
        }
    }

    fn destroyed() -> u32 {
        DESTROYED.with(Cell::get)
    }

    #[test]
    fn adopted_handle_is_destroyed_on_drop() {
        let before = destroyed();
        drop(Handle::adopt(FakeHandle(1)));
        assert_eq!(destroyed(), before + 1);
    }

    #[test]
    fn alias_is_never_destroyed() {
        let before = destroyed();
        drop(Handle::alias(FakeHandle(1)));
        assert_eq!(destroyed(), before);
    }

    #[test]
    fn release_transfers_ownership_out() {
        let before = destroyed();
        let handle = Handle::adopt(FakeHandle(7));
        let raw = handle.release();
        assert_eq!(raw.0, 7);
        assert_eq!(destroyed(), before);
    }

    #[test]
    fn null_owned_handle_is_not_destroyed() {
        let before = destroyed();
        drop(Handle::adopt(FakeHandle::null()));
        assert_eq!(destroyed(), before);
    }

    #[test]
    fn ownership_flag_is_visible() {
        assert!(Handle::adopt(FakeHandle(1)).is_owned());
        assert!(!Handle::alias(FakeHandle(1)).is_owned());
    }
}

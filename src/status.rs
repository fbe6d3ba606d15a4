//! Driver status translation.
//!
//! Every raw driver call in this crate goes through [`check`], which turns a
//! `CUresult` into a crate [`Result`]. The descriptive context is supplied as
//! a closure and is only ever invoked on the failure branch, so the success
//! path pays for nothing beyond the status comparison.

use cudarc::driver::sys as cuda_sys;

use crate::error::{GraphError, Result};

/// Translate a driver status code, building the context string lazily.
pub(crate) fn check(status: cuda_sys::CUresult, context: impl FnOnce() -> String) -> Result<()> {
    if status == cuda_sys::CUresult::CUDA_SUCCESS {
        return Ok(());
    }
    Err(GraphError::DriverCall {
        status,
        context: context(),
    })
}

/// Identification helpers for rendering handles into failure messages.
///
/// These produce the phrases embedded in [`GraphError::DriverCall`] contexts,
/// e.g. `"node 0x7f.. in graph template 0x7f.."`. They are only called from
/// inside the deferred-context closures.
pub(crate) mod identify {
    use cudarc::driver::sys as cuda_sys;

    fn ptr_as_hex<T>(ptr: *mut T) -> String {
        format!("{:#x}", ptr as usize)
    }

    pub(crate) fn graph_template(handle: cuda_sys::CUgraph) -> String {
        format!("graph template {}", ptr_as_hex(handle))
    }

    pub(crate) fn node(handle: cuda_sys::CUgraphNode, template: cuda_sys::CUgraph) -> String {
        format!("node {} in {}", ptr_as_hex(handle), graph_template(template))
    }

    pub(crate) fn instance(handle: cuda_sys::CUgraphExec, template: cuda_sys::CUgraph) -> String {
        format!(
            "graph instance {} built from {}",
            ptr_as_hex(handle),
            graph_template(template)
        )
    }

    pub(crate) fn stream(handle: cuda_sys::CUstream) -> String {
        format!("stream {}", ptr_as_hex(handle))
    }

    pub(crate) fn context(handle: cuda_sys::CUcontext) -> String {
        format!("context {}", ptr_as_hex(handle))
    }
}

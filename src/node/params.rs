//! Per-kind node parameter records.
//!
//! Each kind of node owns a strongly-typed parameter record with two pure
//! functions: `validate`, which rejects parameter combinations this layer
//! can see are wrong before any driver call is made, and `marshal`, which
//! converts the record into the driver's call-ready representation. Neither
//! has side effects; the template's add-node operations call both.

use std::ffi::c_void;

use cudarc::driver::sys as cuda_sys;

use crate::context::ContextHandle;
use crate::error::{GraphError, Result};

/// Parameters of a kernel-launch node.
#[derive(Debug, Clone, Copy)]
pub struct KernelNodeParams {
    /// Kernel function handle, as loaded by the module collaborator.
    pub func: cuda_sys::CUfunction,
    /// Grid dimensions (blocks in x, y, z).
    pub grid_dim: (u32, u32, u32),
    /// Block dimensions (threads per block in x, y, z).
    pub block_dim: (u32, u32, u32),
    /// Dynamic shared memory per block in bytes.
    pub shared_mem_bytes: u32,
    /// Driver-ready argument pointer array; one pointer per kernel argument.
    /// Must stay valid for the duration of the add-node call.
    pub kernel_params: *mut *mut c_void,
}

impl KernelNodeParams {
    /// Kernel launch with a default 256-thread block and no shared memory.
    pub fn new(func: cuda_sys::CUfunction, kernel_params: *mut *mut c_void) -> Self {
        Self {
            func,
            grid_dim: (1, 1, 1),
            block_dim: (256, 1, 1),
            shared_mem_bytes: 0,
            kernel_params,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.func.is_null() {
            return Err(GraphError::InvalidArgument(
                "kernel node requires a function handle".to_string(),
            ));
        }
        let (gx, gy, gz) = self.grid_dim;
        let (bx, by, bz) = self.block_dim;
        if gx == 0 || gy == 0 || gz == 0 {
            return Err(GraphError::InvalidArgument(format!(
                "kernel node grid dimensions must be non-zero, got ({gx}, {gy}, {gz})"
            )));
        }
        if bx == 0 || by == 0 || bz == 0 {
            return Err(GraphError::InvalidArgument(format!(
                "kernel node block dimensions must be non-zero, got ({bx}, {by}, {bz})"
            )));
        }
        Ok(())
    }

    pub(crate) fn marshal(&self) -> cuda_sys::CUDA_KERNEL_NODE_PARAMS {
        let mut raw: cuda_sys::CUDA_KERNEL_NODE_PARAMS = unsafe { std::mem::zeroed() };
        raw.func = self.func;
        raw.gridDimX = self.grid_dim.0;
        raw.gridDimY = self.grid_dim.1;
        raw.gridDimZ = self.grid_dim.2;
        raw.blockDimX = self.block_dim.0;
        raw.blockDimY = self.block_dim.1;
        raw.blockDimZ = self.block_dim.2;
        raw.sharedMemBytes = self.shared_mem_bytes;
        raw.kernelParams = self.kernel_params;
        raw
    }
}

/// Parameters of a host-callback node.
///
/// The callback runs on a driver-internal thread once all dependencies have
/// completed; it must not call back into the driver.
#[derive(Debug, Clone, Copy)]
pub struct HostNodeParams {
    /// The callback to invoke.
    pub callback: cuda_sys::CUhostFn,
    /// Opaque pointer handed to the callback.
    pub user_data: *mut c_void,
}

impl HostNodeParams {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.callback.is_none() {
            return Err(GraphError::InvalidArgument(
                "host node requires a callback".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn marshal(&self) -> cuda_sys::CUDA_HOST_NODE_PARAMS {
        let mut raw: cuda_sys::CUDA_HOST_NODE_PARAMS = unsafe { std::mem::zeroed() };
        raw.fn_ = self.callback;
        raw.userData = self.user_data;
        raw
    }
}

/// One endpoint of a memory copy.
#[derive(Debug, Clone, Copy)]
pub enum CopyOperand {
    /// Host memory.
    Host(*mut c_void),
    /// Device memory.
    Device(cuda_sys::CUdeviceptr),
}

impl CopyOperand {
    fn memory_type(&self) -> cuda_sys::CUmemorytype {
        match self {
            CopyOperand::Host(_) => cuda_sys::CUmemorytype::CU_MEMORYTYPE_HOST,
            CopyOperand::Device(_) => cuda_sys::CUmemorytype::CU_MEMORYTYPE_DEVICE,
        }
    }
}

/// Parameters of a linear memory-copy node.
///
/// The driver's copy descriptor is three-dimensional; this layer models the
/// linear copies graphs are built from and marshals them as a 1-row, 1-slice
/// region.
#[derive(Debug, Clone, Copy)]
pub struct MemcpyNodeParams {
    /// Copy source.
    pub src: CopyOperand,
    /// Copy destination.
    pub dst: CopyOperand,
    /// Number of bytes to copy.
    pub bytes: usize,
}

impl MemcpyNodeParams {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.bytes == 0 {
            return Err(GraphError::InvalidArgument(
                "memcpy node must copy at least one byte".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn marshal(&self) -> cuda_sys::CUDA_MEMCPY3D {
        let mut raw: cuda_sys::CUDA_MEMCPY3D =
            unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        raw.srcMemoryType = self.src.memory_type();
        match self.src {
            CopyOperand::Host(ptr) => raw.srcHost = ptr,
            CopyOperand::Device(ptr) => raw.srcDevice = ptr,
        }
        raw.srcPitch = self.bytes;
        raw.srcHeight = 1;
        raw.dstMemoryType = self.dst.memory_type();
        match self.dst {
            CopyOperand::Host(ptr) => raw.dstHost = ptr,
            CopyOperand::Device(ptr) => raw.dstDevice = ptr,
        }
        raw.dstPitch = self.bytes;
        raw.dstHeight = 1;
        raw.WidthInBytes = self.bytes;
        raw.Height = 1;
        raw.Depth = 1;
        raw
    }
}

/// Parameters of a memory-fill node.
#[derive(Debug, Clone, Copy)]
pub struct MemsetNodeParams {
    /// Destination device pointer.
    pub dst: cuda_sys::CUdeviceptr,
    /// Fill value, truncated to `element_size` bytes.
    pub value: u32,
    /// Element width in bytes: 1, 2, or 4.
    pub element_size: u32,
    /// Number of elements per row.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
    /// Row pitch in elements; ignored when `height` is 1.
    pub pitch: usize,
}

impl MemsetNodeParams {
    /// A single-row fill of `width` elements.
    pub fn new(dst: cuda_sys::CUdeviceptr, value: u32, element_size: u32, width: usize) -> Self {
        Self {
            dst,
            value,
            element_size,
            width,
            height: 1,
            pitch: 0,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !matches!(self.element_size, 1 | 2 | 4) {
            return Err(GraphError::InvalidArgument(format!(
                "memset element size must be 1, 2, or 4 bytes, got {}",
                self.element_size
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(GraphError::InvalidArgument(
                "memset node must fill at least one element".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn marshal(&self) -> cuda_sys::CUDA_MEMSET_NODE_PARAMS {
        let mut raw: cuda_sys::CUDA_MEMSET_NODE_PARAMS = unsafe { std::mem::zeroed() };
        raw.dst = self.dst;
        raw.pitch = self.pitch;
        raw.value = self.value;
        raw.elementSize = self.element_size;
        raw.width = self.width;
        raw.height = self.height;
        raw
    }
}

/// Parameters of an external-semaphore-signal node.
#[derive(Debug, Clone, Copy)]
pub struct ExtSemaphoreSignalParams {
    /// Semaphore handles to signal.
    pub semaphores: *mut cuda_sys::CUexternalSemaphore,
    /// Per-semaphore signal parameters, parallel to `semaphores`.
    pub params: *const cuda_sys::CUDA_EXTERNAL_SEMAPHORE_SIGNAL_PARAMS,
    /// Number of semaphores.
    pub count: u32,
}

impl ExtSemaphoreSignalParams {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_semaphore_arrays(self.semaphores.is_null(), self.params.is_null(), self.count)
    }

    pub(crate) fn marshal(&self) -> cuda_sys::CUDA_EXT_SEM_SIGNAL_NODE_PARAMS {
        let mut raw: cuda_sys::CUDA_EXT_SEM_SIGNAL_NODE_PARAMS = unsafe { std::mem::zeroed() };
        raw.extSemArray = self.semaphores;
        raw.paramsArray = self.params;
        raw.numExtSems = self.count;
        raw
    }
}

/// Parameters of an external-semaphore-wait node.
#[derive(Debug, Clone, Copy)]
pub struct ExtSemaphoreWaitParams {
    /// Semaphore handles to wait on.
    pub semaphores: *mut cuda_sys::CUexternalSemaphore,
    /// Per-semaphore wait parameters, parallel to `semaphores`.
    pub params: *const cuda_sys::CUDA_EXTERNAL_SEMAPHORE_WAIT_PARAMS,
    /// Number of semaphores.
    pub count: u32,
}

impl ExtSemaphoreWaitParams {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_semaphore_arrays(self.semaphores.is_null(), self.params.is_null(), self.count)
    }

    pub(crate) fn marshal(&self) -> cuda_sys::CUDA_EXT_SEM_WAIT_NODE_PARAMS {
        let mut raw: cuda_sys::CUDA_EXT_SEM_WAIT_NODE_PARAMS = unsafe { std::mem::zeroed() };
        raw.extSemArray = self.semaphores;
        raw.paramsArray = self.params;
        raw.numExtSems = self.count;
        raw
    }
}

fn validate_semaphore_arrays(semaphores_null: bool, params_null: bool, count: u32) -> Result<()> {
    if count == 0 {
        return Err(GraphError::InvalidArgument(
            "semaphore node requires at least one semaphore".to_string(),
        ));
    }
    if semaphores_null || params_null {
        return Err(GraphError::InvalidArgument(
            "semaphore node arrays must be non-null".to_string(),
        ));
    }
    Ok(())
}

/// Parameters of a batch memory-operation node.
#[derive(Debug, Clone, Copy)]
pub struct BatchMemOpParams {
    /// Context under which the operations execute.
    pub context: ContextHandle,
    /// Driver-ready operation descriptors.
    pub ops: *mut cuda_sys::CUstreamBatchMemOpParams,
    /// Number of operations.
    pub count: u32,
    /// Driver flags; zero for none.
    pub flags: u32,
}

impl BatchMemOpParams {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(GraphError::InvalidArgument(
                "batch memory-operation node requires at least one operation".to_string(),
            ));
        }
        if self.ops.is_null() {
            return Err(GraphError::InvalidArgument(
                "batch memory-operation descriptors must be non-null".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn marshal(&self) -> cuda_sys::CUDA_BATCH_MEM_OP_NODE_PARAMS {
        let mut raw: cuda_sys::CUDA_BATCH_MEM_OP_NODE_PARAMS = unsafe { std::mem::zeroed() };
        raw.ctx = self.context.raw();
        raw.count = self.count;
        raw.paramArray = self.ops;
        raw.flags = self.flags;
        raw
    }
}

/// Whether a conditional node evaluates its body once or repeatedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalKind {
    /// Body executes once when the condition value is non-zero.
    If,
    /// Body re-executes while the condition value is non-zero.
    While,
}

/// Parameters of a conditional node.
#[derive(Debug, Clone, Copy)]
pub struct ConditionalParams {
    /// Condition handle created on the same template.
    pub handle: cuda_sys::CUgraphConditionalHandle,
    /// If- or while-style evaluation.
    pub kind: ConditionalKind,
    /// Context under which the body graphs execute.
    pub context: ContextHandle,
}

impl ConditionalParams {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.handle == 0 {
            return Err(GraphError::InvalidArgument(
                "conditional node requires a condition handle".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn marshal(&self) -> cuda_sys::CUDA_CONDITIONAL_NODE_PARAMS {
        let mut raw: cuda_sys::CUDA_CONDITIONAL_NODE_PARAMS = unsafe { std::mem::zeroed() };
        raw.handle = self.handle;
        raw.type_ = match self.kind {
            ConditionalKind::If => cuda_sys::CUgraphConditionalNodeType::CU_GRAPH_COND_TYPE_IF,
            ConditionalKind::While => {
                cuda_sys::CUgraphConditionalNodeType::CU_GRAPH_COND_TYPE_WHILE
            }
        };
        raw.size = 1;
        raw.ctx = self.context.raw();
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_function() -> cuda_sys::CUfunction {
        0x1000 as _
    }

    #[test]
    fn kernel_marshal_maps_every_dimension() {
        let mut args: [*mut c_void; 1] = [std::ptr::null_mut()];
        let params = KernelNodeParams {
            func: fake_function(),
            grid_dim: (3, 2, 1),
            block_dim: (128, 4, 2),
            shared_mem_bytes: 1024,
            kernel_params: args.as_mut_ptr(),
        };
        let raw = params.marshal();
        assert_eq!(raw.func, fake_function());
        assert_eq!((raw.gridDimX, raw.gridDimY, raw.gridDimZ), (3, 2, 1));
        assert_eq!((raw.blockDimX, raw.blockDimY, raw.blockDimZ), (128, 4, 2));
        assert_eq!(raw.sharedMemBytes, 1024);
        assert_eq!(raw.kernelParams, args.as_mut_ptr());
        assert!(raw.extra.is_null());
    }

    #[test]
    fn kernel_zero_dimensions_are_rejected() {
        let mut args: [*mut c_void; 1] = [std::ptr::null_mut()];
        let mut params = KernelNodeParams::new(fake_function(), args.as_mut_ptr());
        params.grid_dim = (0, 1, 1);
        assert!(matches!(
            params.validate(),
            Err(GraphError::InvalidArgument(_))
        ));

        params.grid_dim = (1, 1, 1);
        params.block_dim = (32, 0, 1);
        assert!(matches!(
            params.validate(),
            Err(GraphError::InvalidArgument(_))
        ));
    }

    #[test]
    fn kernel_null_function_is_rejected() {
        let mut args: [*mut c_void; 1] = [std::ptr::null_mut()];
        let params = KernelNodeParams::new(std::ptr::null_mut(), args.as_mut_ptr());
        assert!(matches!(
            params.validate(),
            Err(GraphError::InvalidArgument(_))
        ));
    }

    #[test]
    fn memset_marshal_and_validation() {
        let params = MemsetNodeParams::new(0xdead_0000, 0x42, 4, 256);
        assert!(params.validate().is_ok());
        let raw = params.marshal();
        assert_eq!(raw.dst, 0xdead_0000);
        assert_eq!(raw.value, 0x42);
        assert_eq!(raw.elementSize, 4);
        assert_eq!(raw.width, 256);
        assert_eq!(raw.height, 1);

        let bad = MemsetNodeParams::new(0xdead_0000, 0, 3, 256);
        assert!(matches!(bad.validate(), Err(GraphError::InvalidArgument(_))));

        let empty = MemsetNodeParams::new(0xdead_0000, 0, 4, 0);
        assert!(matches!(
            empty.validate(),
            Err(GraphError::InvalidArgument(_))
        ));
    }

    #[test]
    fn memcpy_marshal_is_a_linear_region() {
        let params = MemcpyNodeParams {
            src: CopyOperand::Device(0x1000),
            dst: CopyOperand::Device(0x2000),
            bytes: 4096,
        };
        assert!(params.validate().is_ok());
        let raw = params.marshal();
        assert_eq!(
            raw.srcMemoryType,
            cuda_sys::CUmemorytype::CU_MEMORYTYPE_DEVICE
        );
        assert_eq!(raw.srcDevice, 0x1000);
        assert_eq!(raw.dstDevice, 0x2000);
        assert_eq!(raw.WidthInBytes, 4096);
        assert_eq!(raw.Height, 1);
        assert_eq!(raw.Depth, 1);
    }

    #[test]
    fn memcpy_host_operand_sets_host_pointer() {
        let mut buf = [0u8; 16];
        let params = MemcpyNodeParams {
            src: CopyOperand::Host(buf.as_mut_ptr().cast()),
            dst: CopyOperand::Device(0x2000),
            bytes: buf.len(),
        };
        let raw = params.marshal();
        assert_eq!(
            raw.srcMemoryType,
            cuda_sys::CUmemorytype::CU_MEMORYTYPE_HOST
        );
        assert_eq!(raw.srcHost, buf.as_mut_ptr().cast::<c_void>() as *const _);
    }

    #[test]
    fn empty_copies_are_rejected() {
        let params = MemcpyNodeParams {
            src: CopyOperand::Device(0x1000),
            dst: CopyOperand::Device(0x2000),
            bytes: 0,
        };
        assert!(matches!(
            params.validate(),
            Err(GraphError::InvalidArgument(_))
        ));
    }

    #[test]
    fn host_node_requires_a_callback() {
        let params = HostNodeParams {
            callback: None,
            user_data: std::ptr::null_mut(),
        };
        assert!(matches!(
            params.validate(),
            Err(GraphError::InvalidArgument(_))
        ));
    }

    #[test]
    fn semaphore_nodes_reject_empty_and_null_arrays() {
        let params = ExtSemaphoreSignalParams {
            semaphores: std::ptr::null_mut(),
            params: std::ptr::null(),
            count: 0,
        };
        assert!(matches!(
            params.validate(),
            Err(GraphError::InvalidArgument(_))
        ));

        let mut sem: cuda_sys::CUexternalSemaphore = std::ptr::null_mut();
        let sig: cuda_sys::CUDA_EXTERNAL_SEMAPHORE_SIGNAL_PARAMS = unsafe { std::mem::zeroed() };
        let null_params = ExtSemaphoreSignalParams {
            semaphores: &mut sem,
            params: std::ptr::null(),
            count: 1,
        };
        assert!(matches!(
            null_params.validate(),
            Err(GraphError::InvalidArgument(_))
        ));

        let ok = ExtSemaphoreSignalParams {
            semaphores: &mut sem,
            params: &sig,
            count: 1,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn conditional_marshal_maps_kind() {
        let ctx = unsafe { ContextHandle::from_raw(std::ptr::null_mut()) };
        let params = ConditionalParams {
            handle: 7,
            kind: ConditionalKind::While,
            context: ctx,
        };
        let raw = params.marshal();
        assert_eq!(raw.handle, 7);
        assert_eq!(
            raw.type_,
            cuda_sys::CUgraphConditionalNodeType::CU_GRAPH_COND_TYPE_WHILE
        );
        assert_eq!(raw.size, 1);

        let missing = ConditionalParams {
            handle: 0,
            kind: ConditionalKind::If,
            context: ctx,
        };
        assert!(matches!(
            missing.validate(),
            Err(GraphError::InvalidArgument(_))
        ));
    }
}

//! Mutable graph templates.
//!
//! A [`GraphTemplate`] is the host-side definition of a device work DAG:
//! nodes of the various kinds plus dependency edges, added explicitly here
//! or recorded through stream capture. A template stays mutable for its
//! whole life — instantiating it takes a snapshot, and instances already
//! built from it are unaffected by later mutation until they are updated.

use std::ffi::CString;
use std::path::Path;

use cudarc::driver::sys as cuda_sys;

use crate::capability::{DriverCapabilities, Feature};
use crate::context::ContextHandle;
use crate::error::{GraphError, Result};
use crate::event::Event;
use crate::handle::Handle;
use crate::instance::{GraphInstance, InstantiateOptions};
use crate::node::params::{
    BatchMemOpParams, ConditionalParams, ExtSemaphoreSignalParams, ExtSemaphoreWaitParams,
    HostNodeParams, KernelNodeParams, MemcpyNodeParams, MemsetNodeParams,
};
use crate::node::GraphNode;
use crate::status::{check, identify};

/// A mutable definition of a device work DAG.
pub struct GraphTemplate {
    handle: Handle<cuda_sys::CUgraph>,
}

/// Dependency slices carry bound nodes; the driver wants bare handles.
fn raw_handles(deps: &[GraphNode]) -> Vec<cuda_sys::CUgraphNode> {
    deps.iter().map(GraphNode::raw).collect()
}

impl GraphTemplate {
    /// Create a new, empty template.
    pub fn new() -> Result<Self> {
        let mut raw: cuda_sys::CUgraph = std::ptr::null_mut();
        check(unsafe { cuda_sys::cuGraphCreate(&mut raw, 0) }, || {
            "creating a graph template".to_string()
        })?;
        Ok(Self::adopt(raw))
    }

    /// Wrap a raw handle, taking ownership of its destruction.
    pub(crate) fn adopt(raw: cuda_sys::CUgraph) -> Self {
        Self {
            handle: Handle::adopt(raw),
        }
    }

    /// Wrap a raw handle without taking ownership.
    pub(crate) fn alias(raw: cuda_sys::CUgraph) -> Self {
        Self {
            handle: Handle::alias(raw),
        }
    }

    /// Wrap a raw template handle obtained elsewhere.
    ///
    /// # Safety
    ///
    /// `raw` must be a live graph handle. With `take_ownership`, the wrapper
    /// destroys it on drop, and no other owner may exist.
    pub unsafe fn from_raw(raw: cuda_sys::CUgraph, take_ownership: bool) -> Self {
        if take_ownership {
            Self::adopt(raw)
        } else {
            Self::alias(raw)
        }
    }

    /// The raw driver handle.
    pub fn raw(&self) -> cuda_sys::CUgraph {
        self.handle.raw()
    }

    /// Whether this wrapper destroys the template on drop.
    pub fn owns_handle(&self) -> bool {
        self.handle.is_owned()
    }

    /// Transfer the raw handle out of this wrapper.
    ///
    /// The caller becomes responsible for eventually destroying the graph;
    /// this wrapper's drop no longer will.
    pub fn into_raw(self) -> cuda_sys::CUgraph {
        self.handle.release()
    }

    /// Every dependency must already live in this template.
    fn check_dependencies(&self, deps: &[GraphNode]) -> Result<()> {
        for dep in deps {
            if dep.template_handle() != self.raw() {
                return Err(GraphError::CrossTemplateReference {
                    node: *dep,
                    template: identify::graph_template(self.raw()),
                });
            }
        }
        Ok(())
    }

    fn wrap_new_node(&self, raw: cuda_sys::CUgraphNode) -> GraphNode {
        tracing::trace!(node = ?raw, template = ?self.raw(), "added graph node");
        GraphNode::wrap(raw, self.raw())
    }

    /// Add a kernel-launch node.
    pub fn add_kernel_node(
        &self,
        params: &KernelNodeParams,
        deps: &[GraphNode],
    ) -> Result<GraphNode> {
        params.validate()?;
        self.check_dependencies(deps)?;
        let raw_deps = raw_handles(deps);
        let raw_params = params.marshal();
        let mut raw: cuda_sys::CUgraphNode = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuGraphAddKernelNode_v2(
                    &mut raw,
                    self.raw(),
                    raw_deps.as_ptr(),
                    raw_deps.len(),
                    &raw_params,
                )
            },
            || {
                format!(
                    "adding a kernel node to {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(self.wrap_new_node(raw))
    }

    /// Add a host-callback node.
    pub fn add_host_node(&self, params: &HostNodeParams, deps: &[GraphNode]) -> Result<GraphNode> {
        params.validate()?;
        self.check_dependencies(deps)?;
        let raw_deps = raw_handles(deps);
        let raw_params = params.marshal();
        let mut raw: cuda_sys::CUgraphNode = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuGraphAddHostNode(
                    &mut raw,
                    self.raw(),
                    raw_deps.as_ptr(),
                    raw_deps.len(),
                    &raw_params,
                )
            },
            || {
                format!(
                    "adding a host-callback node to {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(self.wrap_new_node(raw))
    }

    /// Add a memory-copy node executing under `context`.
    pub fn add_memcpy_node(
        &self,
        params: &MemcpyNodeParams,
        deps: &[GraphNode],
        context: ContextHandle,
    ) -> Result<GraphNode> {
        params.validate()?;
        self.check_dependencies(deps)?;
        let raw_deps = raw_handles(deps);
        let raw_params = params.marshal();
        let mut raw: cuda_sys::CUgraphNode = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuGraphAddMemcpyNode(
                    &mut raw,
                    self.raw(),
                    raw_deps.as_ptr(),
                    raw_deps.len(),
                    &raw_params,
                    context.raw(),
                )
            },
            || {
                format!(
                    "adding a memcpy node to {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(self.wrap_new_node(raw))
    }

    /// Add a memory-fill node executing under `context`.
    pub fn add_memset_node(
        &self,
        params: &MemsetNodeParams,
        deps: &[GraphNode],
        context: ContextHandle,
    ) -> Result<GraphNode> {
        params.validate()?;
        self.check_dependencies(deps)?;
        let raw_deps = raw_handles(deps);
        let raw_params = params.marshal();
        let mut raw: cuda_sys::CUgraphNode = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuGraphAddMemsetNode(
                    &mut raw,
                    self.raw(),
                    raw_deps.as_ptr(),
                    raw_deps.len(),
                    &raw_params,
                    context.raw(),
                )
            },
            || {
                format!(
                    "adding a memset node to {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(self.wrap_new_node(raw))
    }

    /// Embed `child` as a child-graph node. The child is copied at add time;
    /// later mutation of `child` does not affect this template.
    pub fn add_child_graph_node(
        &self,
        child: &GraphTemplate,
        deps: &[GraphNode],
    ) -> Result<GraphNode> {
        self.check_dependencies(deps)?;
        let raw_deps = raw_handles(deps);
        let mut raw: cuda_sys::CUgraphNode = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuGraphAddChildGraphNode(
                    &mut raw,
                    self.raw(),
                    raw_deps.as_ptr(),
                    raw_deps.len(),
                    child.raw(),
                )
            },
            || {
                format!(
                    "embedding {} as a child of {}",
                    identify::graph_template(child.raw()),
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(self.wrap_new_node(raw))
    }

    /// Add a no-op node, useful as a junction for dependency shaping.
    pub fn add_empty_node(&self, deps: &[GraphNode]) -> Result<GraphNode> {
        self.check_dependencies(deps)?;
        let raw_deps = raw_handles(deps);
        let mut raw: cuda_sys::CUgraphNode = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuGraphAddEmptyNode(
                    &mut raw,
                    self.raw(),
                    raw_deps.as_ptr(),
                    raw_deps.len(),
                )
            },
            || {
                format!(
                    "adding an empty node to {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(self.wrap_new_node(raw))
    }

    /// Add a node that records `event` once its dependencies complete.
    pub fn add_event_record_node(&self, event: &Event, deps: &[GraphNode]) -> Result<GraphNode> {
        self.check_dependencies(deps)?;
        let raw_deps = raw_handles(deps);
        let mut raw: cuda_sys::CUgraphNode = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuGraphAddEventRecordNode(
                    &mut raw,
                    self.raw(),
                    raw_deps.as_ptr(),
                    raw_deps.len(),
                    event.raw(),
                )
            },
            || {
                format!(
                    "adding an event-record node to {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(self.wrap_new_node(raw))
    }

    /// Add a node that waits for `event` before its dependents may run.
    pub fn add_event_wait_node(&self, event: &Event, deps: &[GraphNode]) -> Result<GraphNode> {
        self.check_dependencies(deps)?;
        let raw_deps = raw_handles(deps);
        let mut raw: cuda_sys::CUgraphNode = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuGraphAddEventWaitNode(
                    &mut raw,
                    self.raw(),
                    raw_deps.as_ptr(),
                    raw_deps.len(),
                    event.raw(),
                )
            },
            || {
                format!(
                    "adding an event-wait node to {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(self.wrap_new_node(raw))
    }

    /// Add an external-semaphore-signal node.
    pub fn add_ext_semaphore_signal_node(
        &self,
        params: &ExtSemaphoreSignalParams,
        deps: &[GraphNode],
    ) -> Result<GraphNode> {
        params.validate()?;
        self.check_dependencies(deps)?;
        let raw_deps = raw_handles(deps);
        let raw_params = params.marshal();
        let mut raw: cuda_sys::CUgraphNode = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuGraphAddExternalSemaphoresSignalNode(
                    &mut raw,
                    self.raw(),
                    raw_deps.as_ptr(),
                    raw_deps.len(),
                    &raw_params,
                )
            },
            || {
                format!(
                    "adding a semaphore-signal node to {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(self.wrap_new_node(raw))
    }

    /// Add an external-semaphore-wait node.
    pub fn add_ext_semaphore_wait_node(
        &self,
        params: &ExtSemaphoreWaitParams,
        deps: &[GraphNode],
    ) -> Result<GraphNode> {
        params.validate()?;
        self.check_dependencies(deps)?;
        let raw_deps = raw_handles(deps);
        let raw_params = params.marshal();
        let mut raw: cuda_sys::CUgraphNode = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuGraphAddExternalSemaphoresWaitNode(
                    &mut raw,
                    self.raw(),
                    raw_deps.as_ptr(),
                    raw_deps.len(),
                    &raw_params,
                )
            },
            || {
                format!(
                    "adding a semaphore-wait node to {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(self.wrap_new_node(raw))
    }

    /// Add a batch memory-operation node. Requires [`Feature::BatchMemOps`].
    pub fn add_batch_mem_op_node(
        &self,
        params: &BatchMemOpParams,
        deps: &[GraphNode],
        caps: &DriverCapabilities,
    ) -> Result<GraphNode> {
        caps.ensure(Feature::BatchMemOps)?;
        params.validate()?;
        self.check_dependencies(deps)?;
        let raw_deps = raw_handles(deps);
        let raw_params = params.marshal();
        let mut raw: cuda_sys::CUgraphNode = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuGraphAddBatchMemOpNode(
                    &mut raw,
                    self.raw(),
                    raw_deps.as_ptr(),
                    raw_deps.len(),
                    &raw_params,
                )
            },
            || {
                format!(
                    "adding a batch memory-operation node to {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(self.wrap_new_node(raw))
    }

    /// Create a condition handle for use by a conditional node of this
    /// template. Requires [`Feature::ConditionalNodes`].
    ///
    /// `default_value` is assigned to the condition before each launch.
    pub fn create_conditional_handle(
        &self,
        context: ContextHandle,
        default_value: u32,
        caps: &DriverCapabilities,
    ) -> Result<cuda_sys::CUgraphConditionalHandle> {
        caps.ensure(Feature::ConditionalNodes)?;
        let mut handle: cuda_sys::CUgraphConditionalHandle = 0;
        check(
            unsafe {
                cuda_sys::cuGraphConditionalHandleCreate(
                    &mut handle,
                    self.raw(),
                    context.raw(),
                    default_value,
                    1, // CU_GRAPH_COND_ASSIGN_DEFAULT: re-apply the default before each launch
                )
            },
            || {
                format!(
                    "creating a conditional handle on {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(handle)
    }

    /// Add a conditional node. Requires [`Feature::ConditionalNodes`].
    ///
    /// Returns the node together with a non-owning view of its body graph;
    /// populate the body through that view. The body is owned by the node.
    pub fn add_conditional_node(
        &self,
        params: &ConditionalParams,
        deps: &[GraphNode],
        caps: &DriverCapabilities,
    ) -> Result<(GraphNode, GraphTemplate)> {
        caps.ensure(Feature::ConditionalNodes)?;
        params.validate()?;
        self.check_dependencies(deps)?;
        let raw_deps = raw_handles(deps);

        let mut raw_params: cuda_sys::CUgraphNodeParams = unsafe { std::mem::zeroed() };
        raw_params.type_ = cuda_sys::CUgraphNodeType::CU_GRAPH_NODE_TYPE_CONDITIONAL;
        raw_params.__bindgen_anon_1.conditional = params.marshal();

        let mut raw: cuda_sys::CUgraphNode = std::ptr::null_mut();
        check(
            unsafe {
                cuda_sys::cuGraphAddNode(
                    &mut raw,
                    self.raw(),
                    raw_deps.as_ptr(),
                    raw_deps.len(),
                    &mut raw_params,
                )
            },
            || {
                format!(
                    "adding a conditional node to {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;

        // The driver fills phGraph_out with the body graph(s) of the new node.
        let body = unsafe {
            let out = raw_params.__bindgen_anon_1.conditional.phGraph_out;
            GraphTemplate::alias(*out)
        };
        Ok((self.wrap_new_node(raw), body))
    }

    /// Add explicit dependency edges: `to[i]` comes to depend on `from[i]`.
    pub fn add_dependencies(&self, from: &[GraphNode], to: &[GraphNode]) -> Result<()> {
        if from.len() != to.len() {
            return Err(GraphError::InvalidArgument(format!(
                "dependency endpoint counts differ: {} from, {} to",
                from.len(),
                to.len()
            )));
        }
        self.check_dependencies(from)?;
        self.check_dependencies(to)?;
        let raw_from = raw_handles(from);
        let raw_to = raw_handles(to);
        check(
            unsafe {
                cuda_sys::cuGraphAddDependencies(
                    self.raw(),
                    raw_from.as_ptr(),
                    raw_to.as_ptr(),
                    raw_from.len(),
                )
            },
            || {
                format!(
                    "adding {} dependency edges to {}",
                    from.len(),
                    identify::graph_template(self.raw())
                )
            },
        )
    }

    /// Number of nodes currently in this template.
    pub fn node_count(&self) -> Result<usize> {
        let mut count: usize = 0;
        check(
            unsafe { cuda_sys::cuGraphGetNodes(self.raw(), std::ptr::null_mut(), &mut count) },
            || {
                format!(
                    "counting the nodes of {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        Ok(count)
    }

    /// All nodes currently in this template.
    pub fn nodes(&self) -> Result<Vec<GraphNode>> {
        let mut count = self.node_count()?;
        let mut raw_nodes: Vec<cuda_sys::CUgraphNode> = vec![std::ptr::null_mut(); count];
        check(
            unsafe { cuda_sys::cuGraphGetNodes(self.raw(), raw_nodes.as_mut_ptr(), &mut count) },
            || {
                format!(
                    "listing the nodes of {}",
                    identify::graph_template(self.raw())
                )
            },
        )?;
        raw_nodes.truncate(count);
        Ok(raw_nodes
            .into_iter()
            .map(|raw| GraphNode::wrap(raw, self.raw()))
            .collect())
    }

    /// Deep-copy this template into a new owned one.
    pub fn clone_template(&self) -> Result<GraphTemplate> {
        let mut raw: cuda_sys::CUgraph = std::ptr::null_mut();
        check(
            unsafe { cuda_sys::cuGraphClone(&mut raw, self.raw()) },
            || format!("cloning {}", identify::graph_template(self.raw())),
        )?;
        Ok(GraphTemplate::adopt(raw))
    }

    /// Write this template to `path` in DOT form for inspection.
    /// Requires [`Feature::DotDump`].
    pub fn write_dot(&self, path: &Path, caps: &DriverCapabilities) -> Result<()> {
        caps.ensure(Feature::DotDump)?;
        let c_path = CString::new(path.to_string_lossy().as_bytes()).map_err(|_| {
            GraphError::InvalidArgument(format!("path {} contains a NUL byte", path.display()))
        })?;
        check(
            unsafe { cuda_sys::cuGraphDebugDotPrint(self.raw(), c_path.as_ptr(), 0) },
            || {
                format!(
                    "writing {} to {} in DOT form",
                    identify::graph_template(self.raw()),
                    path.display()
                )
            },
        )
    }

    /// Compile this template into a launchable [`GraphInstance`].
    ///
    /// Every option requested in `options` is checked against `caps` before
    /// any driver work happens; an unsupported option fails with
    /// [`GraphError::UnsupportedFeature`] and produces no instance.
    pub fn instantiate(
        &self,
        options: &InstantiateOptions,
        caps: &DriverCapabilities,
    ) -> Result<GraphInstance> {
        let flags = options.flags(caps)?;
        let mut raw: cuda_sys::CUgraphExec = std::ptr::null_mut();
        let status =
            unsafe { cuda_sys::cuGraphInstantiateWithFlags(&mut raw, self.raw(), flags) };
        if status != cuda_sys::CUresult::CUDA_SUCCESS {
            return Err(GraphError::Instantiation {
                status,
                context: identify::graph_template(self.raw()),
            });
        }
        tracing::debug!(
            template = ?self.raw(),
            instance = ?raw,
            flags,
            "instantiated graph template"
        );
        Ok(GraphInstance::new(raw, self.raw()))
    }
}

impl std::fmt::Debug for GraphTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GraphTemplate({:?})", self.handle)
    }
}

// Templates may be handed between threads; concurrent mutation is the
// caller's responsibility to serialize, as the driver does not define it.
unsafe impl Send for GraphTemplate {}
unsafe impl Sync for GraphTemplate {}

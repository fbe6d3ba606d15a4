//! Graph nodes and the node kind system.
//!
//! A [`GraphNode`] is a value: the node's driver handle plus the handle of
//! the template it was added to. The back-reference is a plain lookup key
//! used for membership checks and diagnostics — it never owns the template,
//! and the node is only meaningful while that template (or an instance built
//! from it) is alive.

pub mod params;

use cudarc::driver::sys as cuda_sys;

use crate::error::{GraphError, Result};
use crate::status::{check, identify};
use crate::template::GraphTemplate;

/// A single unit of graph work, bound to its containing template.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GraphNode {
    raw: cuda_sys::CUgraphNode,
    template: cuda_sys::CUgraph,
}

impl GraphNode {
    /// Bind a raw node handle to the template it belongs to.
    pub(crate) fn wrap(raw: cuda_sys::CUgraphNode, template: cuda_sys::CUgraph) -> Self {
        Self { raw, template }
    }

    /// The raw driver handle.
    pub fn raw(&self) -> cuda_sys::CUgraphNode {
        self.raw
    }

    /// Raw handle of the containing template.
    pub(crate) fn template_handle(&self) -> cuda_sys::CUgraph {
        self.template
    }

    /// A non-owning view of the containing template.
    pub fn containing_template(&self) -> GraphTemplate {
        GraphTemplate::alias(self.template)
    }

    /// Ask the driver what kind of work this node performs.
    pub fn kind(&self) -> Result<NodeKind> {
        let mut raw_kind = cuda_sys::CUgraphNodeType::CU_GRAPH_NODE_TYPE_EMPTY;
        check(
            unsafe { cuda_sys::cuGraphNodeGetType(self.raw, &mut raw_kind) },
            || format!("querying the kind of {self}"),
        )?;
        NodeKind::from_sys(raw_kind).ok_or_else(|| {
            GraphError::InvalidArgument(format!("unrecognized node type {raw_kind:?} on {self}"))
        })
    }

    /// The nodes this node depends on.
    pub fn dependencies(&self) -> Result<Vec<GraphNode>> {
        let mut count: usize = 0;
        check(
            unsafe {
                cuda_sys::cuGraphNodeGetDependencies(self.raw, std::ptr::null_mut(), &mut count)
            },
            || format!("counting the dependencies of {self}"),
        )?;

        let mut raw_deps: Vec<cuda_sys::CUgraphNode> = vec![std::ptr::null_mut(); count];
        check(
            unsafe {
                cuda_sys::cuGraphNodeGetDependencies(self.raw, raw_deps.as_mut_ptr(), &mut count)
            },
            || format!("listing the dependencies of {self}"),
        )?;
        raw_deps.truncate(count);

        Ok(raw_deps
            .into_iter()
            .map(|dep| GraphNode::wrap(dep, self.template))
            .collect())
    }
}

impl std::fmt::Display for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&identify::node(self.raw, self.template))
    }
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("raw", &self.raw)
            .field("template", &self.template)
            .finish()
    }
}

// Node handles are identifiers; all mutation goes through the owning
// template or instance, which the caller serializes.
unsafe impl Send for GraphNode {}
unsafe impl Sync for GraphNode {}

/// The closed set of node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Kernel launch.
    Kernel,
    /// Memory copy.
    Memcpy,
    /// Memory fill.
    Memset,
    /// Host callback.
    HostCallback,
    /// Embedded child graph.
    ChildGraph,
    /// No-op placeholder used for dependency shaping.
    Empty,
    /// Wait on an event.
    EventWait,
    /// Record an event.
    EventRecord,
    /// Signal an external semaphore.
    ExtSemaphoreSignal,
    /// Wait on an external semaphore.
    ExtSemaphoreWait,
    /// Batch of memory operations.
    BatchMemOp,
    /// Conditional sub-graph.
    Conditional,
}

impl NodeKind {
    /// Map a driver node type to a kind, if it is one this layer models.
    pub(crate) fn from_sys(raw: cuda_sys::CUgraphNodeType) -> Option<Self> {
        use cuda_sys::CUgraphNodeType as T;
        Some(match raw {
            T::CU_GRAPH_NODE_TYPE_KERNEL => NodeKind::Kernel,
            T::CU_GRAPH_NODE_TYPE_MEMCPY => NodeKind::Memcpy,
            T::CU_GRAPH_NODE_TYPE_MEMSET => NodeKind::Memset,
            T::CU_GRAPH_NODE_TYPE_HOST => NodeKind::HostCallback,
            T::CU_GRAPH_NODE_TYPE_GRAPH => NodeKind::ChildGraph,
            T::CU_GRAPH_NODE_TYPE_EMPTY => NodeKind::Empty,
            T::CU_GRAPH_NODE_TYPE_WAIT_EVENT => NodeKind::EventWait,
            T::CU_GRAPH_NODE_TYPE_EVENT_RECORD => NodeKind::EventRecord,
            T::CU_GRAPH_NODE_TYPE_EXT_SEMAS_SIGNAL => NodeKind::ExtSemaphoreSignal,
            T::CU_GRAPH_NODE_TYPE_EXT_SEMAS_WAIT => NodeKind::ExtSemaphoreWait,
            T::CU_GRAPH_NODE_TYPE_BATCH_MEM_OP => NodeKind::BatchMemOp,
            T::CU_GRAPH_NODE_TYPE_CONDITIONAL => NodeKind::Conditional,
            _ => return None,
        })
    }
}

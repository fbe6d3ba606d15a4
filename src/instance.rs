//! Instantiated, launchable graph instances.
//!
//! A [`GraphInstance`] is the device-bound compilation of a template. Its
//! topology is fixed; its parameters and per-node enabled state can still be
//! patched — in place via [`GraphInstance::update`], or node by node via the
//! enable toggles. The instance keeps only a diagnostic reference to the
//! template it came from and is unaffected if that template is dropped or
//! mutated afterwards.

use cudarc::driver::sys as cuda_sys;

use crate::capability::{DriverCapabilities, Feature};
use crate::context::scoped_override;
use crate::error::{GraphError, Result};
use crate::handle::Handle;
use crate::node::GraphNode;
use crate::status::{check, identify};
use crate::stream::Stream;
use crate::template::GraphTemplate;

/// Options applied when compiling a template into an instance.
///
/// Each option maps to a driver instantiation flag and is gated on the
/// corresponding [`Feature`]; requesting one the linked driver does not
/// provide fails the whole instantiation up front.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantiateOptions {
    /// Release graph-private memory from a prior launch before relaunching.
    pub free_previous_allocations_before_relaunch: bool,
    /// Honor per-node scheduling priorities instead of one instance-wide
    /// priority.
    pub use_per_node_priorities: bool,
    /// Stage instance resources to the device during instantiation.
    pub upload_on_instantiation: bool,
    /// Allow the instance to be launched from device-side code.
    pub make_device_launchable: bool,
}

impl InstantiateOptions {
    /// Options with every flag off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Release graph-private allocations before each relaunch.
    pub fn free_previous_allocations(mut self, enabled: bool) -> Self {
        self.free_previous_allocations_before_relaunch = enabled;
        self
    }

    /// Honor per-node priorities.
    pub fn per_node_priorities(mut self, enabled: bool) -> Self {
        self.use_per_node_priorities = enabled;
        self
    }

    /// Upload as part of instantiation.
    pub fn upload_on_instantiation(mut self, enabled: bool) -> Self {
        self.upload_on_instantiation = enabled;
        self
    }

    /// Make the instance launchable from the device.
    pub fn device_launchable(mut self, enabled: bool) -> Self {
        self.make_device_launchable = enabled;
        self
    }

    /// Translate to driver flags, gating each requested option on `caps`.
    pub(crate) fn flags(&self, caps: &DriverCapabilities) -> Result<u64> {
        use cuda_sys::CUgraphInstantiate_flags as F;

        let mut flags = 0u64;
        if self.free_previous_allocations_before_relaunch {
            caps.ensure(Feature::FreePreviousAllocations)?;
            flags |= F::CUDA_GRAPH_INSTANTIATE_FLAG_AUTO_FREE_ON_LAUNCH as u64;
        }
        if self.use_per_node_priorities {
            caps.ensure(Feature::PerNodePriorities)?;
            flags |= F::CUDA_GRAPH_INSTANTIATE_FLAG_USE_NODE_PRIORITY as u64;
        }
        if self.upload_on_instantiation {
            caps.ensure(Feature::UploadOnInstantiation)?;
            flags |= F::CUDA_GRAPH_INSTANTIATE_FLAG_UPLOAD as u64;
        }
        if self.make_device_launchable {
            caps.ensure(Feature::DeviceLaunch)?;
            flags |= F::CUDA_GRAPH_INSTANTIATE_FLAG_DEVICE_LAUNCH as u64;
        }
        Ok(flags)
    }
}

/// Driver-reported reason an in-place update was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The update failed for an unlisted reason.
    Error,
    /// The topology of the two graphs differs.
    TopologyChanged,
    /// A node changed kind between the two graphs.
    NodeTypeChanged,
    /// A kernel node changed function in a way the driver rejects.
    FunctionChanged,
    /// A node's parameters changed in a way the driver rejects.
    ParametersChanged,
    /// The change is recognized but not supported by this driver.
    NotSupported,
    /// A kernel function change is unsupported on this driver.
    UnsupportedFunctionChange,
    /// Node attributes changed in a way the driver rejects.
    AttributesChanged,
}

impl UpdateStatus {
    pub(crate) fn from_sys(raw: cuda_sys::CUgraphExecUpdateResult) -> Option<Self> {
        use cuda_sys::CUgraphExecUpdateResult as R;
        Some(match raw {
            R::CU_GRAPH_EXEC_UPDATE_SUCCESS => return None,
            R::CU_GRAPH_EXEC_UPDATE_ERROR => UpdateStatus::Error,
            R::CU_GRAPH_EXEC_UPDATE_ERROR_TOPOLOGY_CHANGED => UpdateStatus::TopologyChanged,
            R::CU_GRAPH_EXEC_UPDATE_ERROR_NODE_TYPE_CHANGED => UpdateStatus::NodeTypeChanged,
            R::CU_GRAPH_EXEC_UPDATE_ERROR_FUNCTION_CHANGED => UpdateStatus::FunctionChanged,
            R::CU_GRAPH_EXEC_UPDATE_ERROR_PARAMETERS_CHANGED => UpdateStatus::ParametersChanged,
            R::CU_GRAPH_EXEC_UPDATE_ERROR_NOT_SUPPORTED => UpdateStatus::NotSupported,
            R::CU_GRAPH_EXEC_UPDATE_ERROR_UNSUPPORTED_FUNCTION_CHANGE => {
                UpdateStatus::UnsupportedFunctionChange
            }
            R::CU_GRAPH_EXEC_UPDATE_ERROR_ATTRIBUTES_CHANGED => UpdateStatus::AttributesChanged,
            _ => UpdateStatus::Error,
        })
    }
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            UpdateStatus::Error => "the update failed for an unlisted reason",
            UpdateStatus::TopologyChanged => "the graph topology changed",
            UpdateStatus::NodeTypeChanged => "a node changed kind",
            UpdateStatus::FunctionChanged => "a kernel node changed function",
            UpdateStatus::ParametersChanged => "node parameters changed incompatibly",
            UpdateStatus::NotSupported => "the change is not supported by this driver",
            UpdateStatus::UnsupportedFunctionChange => {
                "the kernel function change is not supported"
            }
            UpdateStatus::AttributesChanged => "node attributes changed incompatibly",
        };
        f.write_str(reason)
    }
}

/// A device-bound, launchable compilation of a [`GraphTemplate`].
pub struct GraphInstance {
    handle: Handle<cuda_sys::CUgraphExec>,
    /// Template this instance was built from. Diagnostic only: the template
    /// may be long gone, and this handle is never dereferenced as an owner.
    template: cuda_sys::CUgraph,
}

impl GraphInstance {
    pub(crate) fn new(raw: cuda_sys::CUgraphExec, template: cuda_sys::CUgraph) -> Self {
        Self {
            handle: Handle::adopt(raw),
            template,
        }
    }

    /// The raw driver handle.
    pub fn raw(&self) -> cuda_sys::CUgraphExec {
        self.handle.raw()
    }

    /// Raw handle of the template this instance was built from.
    pub fn template_handle(&self) -> cuda_sys::CUgraph {
        self.template
    }

    /// Enqueue this instance for asynchronous execution on `stream`.
    ///
    /// The stream's context is made current for the duration of the call and
    /// restored afterwards, on the failure path included. Returns as soon as
    /// the work is enqueued; completion is observed through the stream's own
    /// synchronization.
    pub fn launch(&self, stream: &Stream) -> Result<()> {
        let _ctx = scoped_override(stream.context())?;
        tracing::trace!(instance = ?self.raw(), stream = ?stream.raw(), "launching graph instance");
        check(
            unsafe { cuda_sys::cuGraphLaunch(self.raw(), stream.raw()) },
            || {
                format!(
                    "launching {} on {}",
                    identify::instance(self.raw(), self.template),
                    identify::stream(stream.raw())
                )
            },
        )
    }

    /// Pre-stage this instance's resources on the device ahead of a future
    /// launch. Requires [`Feature::StagedUpload`]. Same context-scoping
    /// discipline as [`GraphInstance::launch`].
    pub fn upload(&self, stream: &Stream, caps: &DriverCapabilities) -> Result<()> {
        caps.ensure(Feature::StagedUpload)?;
        let _ctx = scoped_override(stream.context())?;
        check(
            unsafe { cuda_sys::cuGraphUpload(self.raw(), stream.raw()) },
            || {
                format!(
                    "uploading {} on {}",
                    identify::instance(self.raw(), self.template),
                    identify::stream(stream.raw())
                )
            },
        )
    }

    /// Replace this instance's executable content with `source`'s definition
    /// without re-instantiating.
    ///
    /// The two graphs must be close enough in topology for the driver to
    /// remap node-for-node; how close is the driver's decision. On rejection
    /// the error carries the source-template node the driver could not
    /// reconcile, when it can pinpoint one.
    pub fn update(&self, source: &GraphTemplate) -> Result<()> {
        let mut info: cuda_sys::CUgraphExecUpdateResultInfo = unsafe { std::mem::zeroed() };
        let status =
            unsafe { cuda_sys::cuGraphExecUpdate_v2(self.raw(), source.raw(), &mut info) };

        if status == cuda_sys::CUresult::CUDA_SUCCESS {
            tracing::debug!(
                instance = ?self.raw(),
                source = ?source.raw(),
                "updated graph instance in place"
            );
            return Ok(());
        }

        let update_status = UpdateStatus::from_sys(info.result).unwrap_or(UpdateStatus::Error);
        let offending_node = if info.errorNode.is_null() {
            None
        } else {
            Some(GraphNode::wrap(info.errorNode, source.raw()))
        };
        Err(GraphError::Update {
            status: update_status,
            offending_node,
        })
    }

    /// Whether `node` executes when this instance is launched.
    /// Requires [`Feature::NodeEnableToggle`].
    ///
    /// `node` must belong to the template this instance was built from, or
    /// to a topologically compatible successor applied via
    /// [`GraphInstance::update`]; otherwise the call fails with
    /// [`GraphError::NodeNotInInstance`].
    pub fn is_node_enabled(&self, node: &GraphNode, caps: &DriverCapabilities) -> Result<bool> {
        caps.ensure(Feature::NodeEnableToggle)?;
        let mut enabled: u32 = 0;
        let status =
            unsafe { cuda_sys::cuGraphNodeGetEnabled(self.raw(), node.raw(), &mut enabled) };
        self.translate_node_status(status, node, || {
            format!(
                "determining whether {} is enabled in {}",
                node,
                identify::instance(self.raw(), self.template)
            )
        })?;
        Ok(enabled == 1)
    }

    /// Set whether `node` executes when this instance is launched, without
    /// touching the template or re-instantiating.
    /// Requires [`Feature::NodeEnableToggle`]; same membership precondition
    /// as [`GraphInstance::is_node_enabled`].
    pub fn set_node_enabled(
        &self,
        node: &GraphNode,
        enabled: bool,
        caps: &DriverCapabilities,
    ) -> Result<()> {
        caps.ensure(Feature::NodeEnableToggle)?;
        let status = unsafe {
            cuda_sys::cuGraphNodeSetEnabled(self.raw(), node.raw(), enabled.into())
        };
        self.translate_node_status(status, node, || {
            format!(
                "{} {} in {}",
                if enabled { "enabling" } else { "disabling" },
                node,
                identify::instance(self.raw(), self.template)
            )
        })
    }

    /// The driver reports an unknown node as an invalid value; everything
    /// else translates generically.
    fn translate_node_status(
        &self,
        status: cuda_sys::CUresult,
        node: &GraphNode,
        context: impl FnOnce() -> String,
    ) -> Result<()> {
        if status == cuda_sys::CUresult::CUDA_ERROR_INVALID_VALUE {
            return Err(GraphError::NodeNotInInstance {
                node: *node,
                instance: identify::instance(self.raw(), self.template),
            });
        }
        check(status, context)
    }
}

impl std::fmt::Debug for GraphInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GraphInstance({:?}, from {})",
            self.handle,
            identify::graph_template(self.template)
        )
    }
}

// Instances may be launched from any thread holding the right context;
// concurrent update/launch on the same instance is the caller's to
// serialize, as the driver does not define it.
unsafe impl Send for GraphInstance {}
unsafe impl Sync for GraphInstance {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::DriverVersion;

    fn caps(version: i32) -> DriverCapabilities {
        DriverCapabilities::from_version(DriverVersion(version))
    }

    #[test]
    fn default_options_need_no_features() {
        let options = InstantiateOptions::new();
        assert_eq!(options.flags(&caps(10000)).unwrap(), 0);
    }

    #[test]
    fn each_option_maps_to_its_flag() {
        use cuda_sys::CUgraphInstantiate_flags as F;
        let all = caps(12030);

        let free = InstantiateOptions::new().free_previous_allocations(true);
        assert_eq!(
            free.flags(&all).unwrap(),
            F::CUDA_GRAPH_INSTANTIATE_FLAG_AUTO_FREE_ON_LAUNCH as u64
        );

        let priorities = InstantiateOptions::new().per_node_priorities(true);
        assert_eq!(
            priorities.flags(&all).unwrap(),
            F::CUDA_GRAPH_INSTANTIATE_FLAG_USE_NODE_PRIORITY as u64
        );

        let upload = InstantiateOptions::new().upload_on_instantiation(true);
        assert_eq!(
            upload.flags(&all).unwrap(),
            F::CUDA_GRAPH_INSTANTIATE_FLAG_UPLOAD as u64
        );

        let device = InstantiateOptions::new().device_launchable(true);
        assert_eq!(
            device.flags(&all).unwrap(),
            F::CUDA_GRAPH_INSTANTIATE_FLAG_DEVICE_LAUNCH as u64
        );
    }

    #[test]
    fn options_combine_into_one_flag_word() {
        use cuda_sys::CUgraphInstantiate_flags as F;
        let options = InstantiateOptions::new()
            .free_previous_allocations(true)
            .per_node_priorities(true);
        let flags = options.flags(&caps(12000)).unwrap();
        assert_eq!(
            flags,
            F::CUDA_GRAPH_INSTANTIATE_FLAG_AUTO_FREE_ON_LAUNCH as u64
                | F::CUDA_GRAPH_INSTANTIATE_FLAG_USE_NODE_PRIORITY as u64
        );
    }

    #[test]
    fn unsupported_option_refuses_the_whole_request() {
        let options = InstantiateOptions::new().device_launchable(true);
        match options.flags(&caps(11080)) {
            Err(GraphError::UnsupportedFeature { feature, required }) => {
                assert_eq!(feature, Feature::DeviceLaunch);
                assert_eq!(required, DriverVersion(12000));
            }
            other => panic!("expected UnsupportedFeature, got {other:?}"),
        }

        let old = InstantiateOptions::new().free_previous_allocations(true);
        assert!(matches!(
            old.flags(&caps(11030)),
            Err(GraphError::UnsupportedFeature {
                feature: Feature::FreePreviousAllocations,
                ..
            })
        ));
    }

    #[test]
    fn update_status_translation() {
        use cuda_sys::CUgraphExecUpdateResult as R;
        assert_eq!(UpdateStatus::from_sys(R::CU_GRAPH_EXEC_UPDATE_SUCCESS), None);
        assert_eq!(
            UpdateStatus::from_sys(R::CU_GRAPH_EXEC_UPDATE_ERROR_TOPOLOGY_CHANGED),
            Some(UpdateStatus::TopologyChanged)
        );
        assert_eq!(
            UpdateStatus::from_sys(R::CU_GRAPH_EXEC_UPDATE_ERROR_NODE_TYPE_CHANGED),
            Some(UpdateStatus::NodeTypeChanged)
        );
        assert_eq!(
            UpdateStatus::from_sys(R::CU_GRAPH_EXEC_UPDATE_ERROR_PARAMETERS_CHANGED),
            Some(UpdateStatus::ParametersChanged)
        );
    }

    #[test]
    fn update_status_messages_are_specific() {
        assert!(UpdateStatus::TopologyChanged.to_string().contains("topology"));
        assert!(UpdateStatus::NodeTypeChanged.to_string().contains("kind"));
        assert!(UpdateStatus::NotSupported.to_string().contains("driver"));
    }
}

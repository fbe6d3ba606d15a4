//! Error types for graph construction, instantiation, update, and launch.

use cudarc::driver::sys as cuda_sys;

use crate::capability::{DriverVersion, Feature};
use crate::instance::UpdateStatus;
use crate::node::GraphNode;

/// Result type for all graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors produced by the graph subsystem.
///
/// Every failure is reported to the immediate caller; nothing in this crate
/// retries a driver call. Graph construction and launch are not safe to
/// retry blindly, since the caller may hold partial state (nodes already
/// added, an instance already half-updated).
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A driver call returned a failing status code.
    ///
    /// The context string is built lazily, only once the call has actually
    /// failed; the success path performs no formatting work.
    #[error("{context}: driver call failed with {status:?}")]
    DriverCall {
        /// Raw status code returned by the driver.
        status: cuda_sys::CUresult,
        /// Human-readable description of what was being attempted.
        context: String,
    },

    /// An in-place instance update could not be applied.
    ///
    /// Carries the node of the source template the driver could not
    /// reconcile, when the driver is able to pinpoint one.
    #[error("{}", update_failure_message(.status, .offending_node))]
    Update {
        /// Driver-reported reason the update was rejected.
        status: UpdateStatus,
        /// The unreconcilable node in the source template, if located.
        offending_node: Option<GraphNode>,
    },

    /// A requested capability is unavailable under the linked driver.
    #[error("{feature} requires driver version {required}")]
    UnsupportedFeature {
        /// The feature that was requested.
        feature: Feature,
        /// Minimum driver version that provides it.
        required: DriverVersion,
    },

    /// A parameter combination is invalid before any driver call is made.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A dependency node belongs to a different template.
    #[error("{node} cannot be used as a dependency in {template}")]
    CrossTemplateReference {
        /// The foreign node.
        node: GraphNode,
        /// Identification of the template the operation was issued on.
        template: String,
    },

    /// A node does not belong to the template an instance was built from.
    #[error("{node} is not part of {instance}")]
    NodeNotInInstance {
        /// The node that was queried or toggled.
        node: GraphNode,
        /// Identification of the instance.
        instance: String,
    },

    /// Stream capture was misused or invalidated.
    #[error("stream capture failed: {0}")]
    Capture(String),

    /// The driver could not compile a template into an instance.
    #[error("{context}: instantiation failed with {status:?}")]
    Instantiation {
        /// Raw status code returned by the driver.
        status: cuda_sys::CUresult,
        /// Identification of the template being instantiated.
        context: String,
    },
}

fn update_failure_message(status: &UpdateStatus, offending_node: &Option<GraphNode>) -> String {
    match offending_node {
        Some(node) => format!("graph instance update failed: {status}, at {node}"),
        None => format!("graph instance update failed: {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_call_display_carries_context_and_code() {
        let err = GraphError::DriverCall {
            status: cuda_sys::CUresult::CUDA_ERROR_INVALID_VALUE,
            context: "launching graph instance 0x1 on stream 0x2".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("launching graph instance 0x1 on stream 0x2"));
        assert!(rendered.contains("CUDA_ERROR_INVALID_VALUE"));
    }

    #[test]
    fn unsupported_feature_display_names_required_level() {
        let err = GraphError::UnsupportedFeature {
            feature: Feature::DeviceLaunch,
            required: Feature::DeviceLaunch.required_version(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("12.0"));
    }

    #[test]
    fn update_failure_display_with_and_without_node() {
        let without = GraphError::Update {
            status: UpdateStatus::TopologyChanged,
            offending_node: None,
        };
        assert!(!without.to_string().contains(" at node"));

        let node = GraphNode::wrap(0x10 as _, 0x20 as _);
        let with = GraphError::Update {
            status: UpdateStatus::NodeTypeChanged,
            offending_node: Some(node),
        };
        let rendered = with.to_string();
        assert!(rendered.contains("at node 0x10"));
        assert!(rendered.contains("0x20"));
    }
}

//! Runtime driver capability detection.
//!
//! Graph features have arrived in the driver incrementally; which of them the
//! linked driver actually understands is a runtime property, probed once and
//! consulted before any gated call is issued. A gated operation on a driver
//! that predates it fails with [`GraphError::UnsupportedFeature`] instead of
//! handing the driver parameters it does not recognize.

use std::sync::OnceLock;

use cudarc::driver::sys as cuda_sys;

use crate::error::{GraphError, Result};
use crate::status::check;

/// A driver version in the driver's own encoding (`major * 1000 + minor * 10`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DriverVersion(pub i32);

impl DriverVersion {
    /// Major version component.
    pub fn major(self) -> i32 {
        self.0 / 1000
    }

    /// Minor version component.
    pub fn minor(self) -> i32 {
        (self.0 % 1000) / 10
    }
}

impl std::fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

/// Graph-related driver features that are gated by driver version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Pre-staging instance resources on the device (`upload`).
    StagedUpload,
    /// Writing a template out in DOT form for inspection.
    DotDump,
    /// Releasing graph-private allocations before each relaunch.
    FreePreviousAllocations,
    /// Toggling per-node execution on an instance without re-instantiating.
    NodeEnableToggle,
    /// Batch memory-operation nodes.
    BatchMemOps,
    /// Per-node scheduling priorities within an instance.
    PerNodePriorities,
    /// Staging resources to the device as part of instantiation itself.
    UploadOnInstantiation,
    /// Instances launchable from device-side code.
    DeviceLaunch,
    /// Conditional sub-graph nodes.
    ConditionalNodes,
}

impl Feature {
    /// Minimum driver version that provides this feature.
    pub fn required_version(self) -> DriverVersion {
        let raw = match self {
            Feature::StagedUpload => 11010,
            Feature::DotDump => 11030,
            Feature::FreePreviousAllocations => 11040,
            Feature::NodeEnableToggle => 11060,
            Feature::BatchMemOps => 11070,
            Feature::PerNodePriorities => 11700,
            Feature::UploadOnInstantiation => 12000,
            Feature::DeviceLaunch => 12000,
            Feature::ConditionalNodes => 12030,
        };
        DriverVersion(raw)
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Feature::StagedUpload => "staged instance upload",
            Feature::DotDump => "DOT dump of graph templates",
            Feature::FreePreviousAllocations => "freeing prior allocations on relaunch",
            Feature::NodeEnableToggle => "per-node enable toggling",
            Feature::BatchMemOps => "batch memory-operation nodes",
            Feature::PerNodePriorities => "per-node priorities",
            Feature::UploadOnInstantiation => "upload during instantiation",
            Feature::DeviceLaunch => "device-side launchable instances",
            Feature::ConditionalNodes => "conditional nodes",
        };
        f.write_str(name)
    }
}

/// The effective feature level of the linked driver.
///
/// Obtained once per process via [`DriverCapabilities::query`], or pinned to
/// an arbitrary level with [`DriverCapabilities::from_version`] (tests, or
/// callers that want to restrict themselves to an older baseline).
#[derive(Debug, Clone, Copy)]
pub struct DriverCapabilities {
    version: DriverVersion,
}

static QUERIED_VERSION: OnceLock<DriverVersion> = OnceLock::new();

impl DriverCapabilities {
    /// Probe the linked driver's version. The probe runs once per process;
    /// later calls return the cached answer.
    pub fn query() -> Result<Self> {
        if let Some(&version) = QUERIED_VERSION.get() {
            return Ok(Self { version });
        }
        let mut raw: i32 = 0;
        check(unsafe { cuda_sys::cuDriverGetVersion(&mut raw) }, || {
            "querying driver version".to_string()
        })?;
        let version = *QUERIED_VERSION.get_or_init(|| DriverVersion(raw));
        Ok(Self { version })
    }

    /// Capabilities of a specific driver version, without probing.
    pub fn from_version(version: DriverVersion) -> Self {
        Self { version }
    }

    /// The driver version these capabilities describe.
    pub fn version(&self) -> DriverVersion {
        self.version
    }

    /// Whether the driver provides `feature`.
    pub fn supports(&self, feature: Feature) -> bool {
        self.version >= feature.required_version()
    }

    /// Fail with [`GraphError::UnsupportedFeature`] unless `feature` is available.
    pub fn ensure(&self, feature: Feature) -> Result<()> {
        if self.supports(feature) {
            return Ok(());
        }
        Err(GraphError::UnsupportedFeature {
            feature,
            required: feature.required_version(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_components() {
        let version = DriverVersion(12040);
        assert_eq!(version.major(), 12);
        assert_eq!(version.minor(), 4);
        assert_eq!(version.to_string(), "12.4");
    }

    #[test]
    fn feature_gating_tracks_required_versions() {
        let caps = DriverCapabilities::from_version(DriverVersion(11050));
        assert!(caps.supports(Feature::StagedUpload));
        assert!(caps.supports(Feature::FreePreviousAllocations));
        assert!(!caps.supports(Feature::NodeEnableToggle));
        assert!(!caps.supports(Feature::PerNodePriorities));
        assert!(!caps.supports(Feature::DeviceLaunch));
        assert!(!caps.supports(Feature::ConditionalNodes));
    }

    #[test]
    fn exact_required_version_is_sufficient() {
        for feature in [
            Feature::StagedUpload,
            Feature::DotDump,
            Feature::FreePreviousAllocations,
            Feature::NodeEnableToggle,
            Feature::BatchMemOps,
            Feature::PerNodePriorities,
            Feature::UploadOnInstantiation,
            Feature::DeviceLaunch,
            Feature::ConditionalNodes,
        ] {
            let at = DriverCapabilities::from_version(feature.required_version());
            assert!(at.supports(feature), "{feature} at its own level");

            let below = DriverCapabilities::from_version(DriverVersion(
                feature.required_version().0 - 10,
            ));
            assert!(!below.supports(feature), "{feature} below its level");
        }
    }

    #[test]
    fn ensure_reports_feature_and_level() {
        let caps = DriverCapabilities::from_version(DriverVersion(11000));
        match caps.ensure(Feature::ConditionalNodes) {
            Err(GraphError::UnsupportedFeature { feature, required }) => {
                assert_eq!(feature, Feature::ConditionalNodes);
                assert_eq!(required, DriverVersion(12030));
            }
            other => panic!("expected UnsupportedFeature, got {other:?}"),
        }
    }
}

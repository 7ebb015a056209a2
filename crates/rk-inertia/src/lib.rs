//! Mass properties of CAD assemblies, aggregated per URDF link
//!
//! This crate turns per-solid CAD moments into link masses, centres of mass
//! and inertia tensors:
//! - Material rules: a density or a fixed mass per part name
//! - Link maps: which parts of the assembly form which link
//! - Aggregation: exact parallel-axis composition of subtrees
//! - URDF output and density calibration

pub mod calibrate;
pub mod config;
pub mod engine;
pub mod error;
pub mod inertia;
pub mod links;
pub mod material;
pub mod report;
pub mod tree;
pub mod urdf;

pub use calibrate::{Calibration, CalibrationComponent, effective_density};
pub use config::{ConfigError, DEFAULT_DENSITY, DocumentFormat};
pub use engine::{Aggregator, GeometryError, SubtreeMass, aggregate};
pub use error::{InertiaError, InertiaResult};
pub use inertia::{InertiaMatrix, Inertial, MassProperties, ZeroMassError};
pub use links::{LinkEntry, LinkMap, LinkPlan, resolve};
pub use material::{MassPolicy, MaterialClassifier, MaterialMap, MaterialRule};
pub use report::{LinkReport, MassReport, PartReport};
pub use tree::{AssemblyNode, AssemblyTree, Geometry, NodePath, PathSegment, SolidMoments};
pub use urdf::{LinkFrames, UrdfError};

/// Aggregate a whole assembly: per link when a map is given, otherwise per
/// top-level part
pub fn analyze(
    tree: &AssemblyTree,
    map: Option<&LinkMap>,
    classifier: &MaterialClassifier,
) -> InertiaResult<MassReport> {
    let report = match map {
        Some(map) => {
            let plan = resolve(tree, map, classifier)?;
            MassReport::from_plan(tree, &plan, classifier)?
        }
        None => MassReport::per_part(tree, classifier)?,
    };
    tracing::info!(
        "Aggregated {} links, {:.4} kg total",
        report.links.len(),
        report.grand_total.mass
    );
    Ok(report)
}

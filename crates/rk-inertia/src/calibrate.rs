//! Effective-density calibration from datasheet masses
//!
//! Each component names a subtree and its real mass. Dividing by the CAD
//! volume of the subtree gives the density a `density` rule would need, or
//! confirms that a `mass_g` rule is the better fit.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, load_document};
use crate::inertia::MM3_TO_M3;
use crate::links::PATH_SEPARATOR;
use crate::tree::{AssemblyTree, LocateError, PathSegment};

/// A component with a known mass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationComponent {
    /// Lookup path; the first element is a top-level part
    pub path: Vec<String>,
    pub mass_g: f64,
    /// Grouping label, e.g. a motor model
    #[serde(alias = "type")]
    pub kind: String,
}

impl CalibrationComponent {
    pub fn new(path: &[&str], mass_g: f64, kind: impl Into<String>) -> Self {
        Self {
            path: path.iter().map(|s| s.to_string()).collect(),
            mass_g,
            kind: kind.into(),
        }
    }

    pub fn label(&self) -> String {
        self.path.join(&format!(" {} ", PATH_SEPARATOR))
    }
}

/// Load a calibration list (`.ron` or JSON)
pub fn load_components(path: impl AsRef<Path>) -> Result<Vec<CalibrationComponent>, ConfigError> {
    let components: Vec<CalibrationComponent> = load_document(path.as_ref())?;
    tracing::info!(
        "Loaded {} calibration components from {:?}",
        components.len(),
        path.as_ref()
    );
    Ok(components)
}

/// Density in kg/m³ that gives `mass_g` over `volume_mm3`, if the volume is
/// positive
pub fn effective_density(mass_g: f64, volume_mm3: f64) -> Option<f64> {
    (volume_mm3 > 0.0).then(|| (mass_g / 1000.0) / (volume_mm3 * MM3_TO_M3))
}

/// One located component
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub label: String,
    pub kind: String,
    pub solid_count: usize,
    pub volume_mm3: f64,
    pub mass_g: f64,
    pub density: Option<f64>,
}

/// Averages over all measurements of one kind
#[derive(Debug, Clone, PartialEq)]
pub struct KindSummary {
    pub kind: String,
    pub count: usize,
    pub mean_volume_mm3: f64,
    /// Datasheet mass of the first measurement
    pub mass_g: f64,
    /// Mean over measurements with a positive volume
    pub mean_density: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    pub measurements: Vec<Measurement>,
    /// Labels of components that could not be located
    pub missing: Vec<String>,
    /// Labels of components whose path matched several nodes
    pub ambiguous: Vec<String>,
}

impl Calibration {
    pub fn run(tree: &AssemblyTree, components: &[CalibrationComponent]) -> Self {
        let mut calibration = Self::default();

        for component in components {
            let label = component.label();
            let Some(segments) = component
                .path
                .iter()
                .map(|s| PathSegment::parse(s))
                .collect::<Option<Vec<_>>>()
            else {
                tracing::warn!("Calibration component '{}' has an empty path segment", label);
                calibration.missing.push(label);
                continue;
            };

            let node = match tree.locate(&segments) {
                Ok((_, node)) => node,
                Err(LocateError::NotFound { .. }) => {
                    tracing::warn!("Calibration component '{}' not found", label);
                    calibration.missing.push(label);
                    continue;
                }
                Err(LocateError::Ambiguous { segment, count, .. }) => {
                    tracing::warn!(
                        "Calibration component '{}': '{}' matches {} parts",
                        label,
                        segment,
                        count
                    );
                    calibration.ambiguous.push(label);
                    continue;
                }
            };

            let volume_mm3 = node.leaf_volume_mm3();
            let density = effective_density(component.mass_g, volume_mm3);
            tracing::debug!("{}: {:.1} mm³ -> {:?} kg/m³", label, volume_mm3, density);

            calibration.measurements.push(Measurement {
                label,
                kind: component.kind.clone(),
                solid_count: node.solid_count(),
                volume_mm3,
                mass_g: component.mass_g,
                density,
            });
        }

        calibration
    }

    /// Per-kind averages in order of first appearance
    pub fn by_kind(&self) -> Vec<KindSummary> {
        let mut kinds: Vec<&str> = Vec::new();
        for m in &self.measurements {
            if !kinds.contains(&m.kind.as_str()) {
                kinds.push(&m.kind);
            }
        }

        kinds
            .into_iter()
            .map(|kind| {
                let group: Vec<&Measurement> =
                    self.measurements.iter().filter(|m| m.kind == kind).collect();
                let densities: Vec<f64> = group.iter().filter_map(|m| m.density).collect();
                KindSummary {
                    kind: kind.to_string(),
                    count: group.len(),
                    mean_volume_mm3: group.iter().map(|m| m.volume_mm3).sum::<f64>()
                        / group.len() as f64,
                    mass_g: group[0].mass_g,
                    mean_density: (!densities.is_empty())
                        .then(|| densities.iter().sum::<f64>() / densities.len() as f64),
                }
            })
            .collect()
    }
}

fn density_cell(density: Option<f64>) -> String {
    density.map_or_else(|| "-".to_string(), |d| format!("{:.0} kg/m³", d))
}

impl fmt::Display for Calibration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<40} | {:<20} | {:>6} | {:>14} | {:>10} | {:>8} | {:>14}",
            "Component", "Type", "Solids", "Vol (mm³)", "Vol (cm³)", "Mass (g)", "Eff. Density"
        )?;
        writeln!(f, "{}", "-".repeat(125))?;
        for m in &self.measurements {
            writeln!(
                f,
                "  {:<38} | {:<20} | {:>6} | {:>14.1} | {:>10.2} | {:>8} | {:>14}",
                m.label,
                m.kind,
                m.solid_count,
                m.volume_mm3,
                m.volume_mm3 / 1000.0,
                m.mass_g,
                density_cell(m.density)
            )?;
        }
        for label in &self.missing {
            writeln!(f, "  WARNING: {} not found", label)?;
        }
        for label in &self.ambiguous {
            writeln!(f, "  WARNING: {} is ambiguous, select one with Name[n]", label)?;
        }

        writeln!(f, "\nSummary by component type:")?;
        writeln!(
            f,
            "{:<22} | {:>14} | {:>8} | {:>14}",
            "Type", "Avg Vol (cm³)", "Mass (g)", "Eff. Density"
        )?;
        writeln!(f, "{}", "-".repeat(74))?;
        for s in self.by_kind() {
            writeln!(
                f,
                "  {:<20} | {:>14.2} | {:>8} | {:>14}",
                s.kind,
                s.mean_volume_mm3 / 1000.0,
                s.mass_g,
                density_cell(s.mean_density)
            )?;
        }
        Ok(())
    }
}

//! Per-link mass reports

use std::fmt;

use crate::engine::{Aggregator, GeometryError, MaterialUse, SubtreeMass};
use crate::inertia::{Inertial, MassProperties, ZeroMassError};
use crate::links::{LinkPlan, MissingPart, Subtree};
use crate::material::{MassPolicy, MaterialClassifier};
use crate::tree::{AssemblyTree, NodePath};

const RULE_WIDTH: usize = 110;

/// One contributing part (or unmapped top-level part)
#[derive(Debug, Clone, PartialEq)]
pub struct PartReport {
    pub label: String,
    pub mass: SubtreeMass,
}

/// Totals of one link
#[derive(Debug, Clone, PartialEq)]
pub struct LinkReport {
    pub name: String,
    pub parts: Vec<PartReport>,
    pub total: MassProperties,
    /// Finalized properties, or the reason the link has none
    pub inertial: Result<Inertial, ZeroMassError>,
}

impl LinkReport {
    fn new(name: String, parts: Vec<PartReport>) -> Self {
        let total: MassProperties = parts.iter().map(|p| p.mass.props).sum();
        let inertial = total.finalize();
        if let Err(err) = &inertial {
            tracing::warn!("Link '{}': {}", name, err);
        } else {
            tracing::debug!("Link '{}': {:.4} kg", name, total.mass);
        }
        Self {
            name,
            parts,
            total,
            inertial,
        }
    }
}

/// Result of one analysis run
#[derive(Debug, Clone, PartialEq)]
pub struct MassReport {
    pub links: Vec<LinkReport>,
    /// Top-level parts outside every link, minus their override subtrees
    pub unmapped: Vec<PartReport>,
    pub missing: Vec<MissingPart>,
    /// Every top-level part folded independently, ignoring the mapping
    pub grand_total: MassProperties,
}

fn fold_sources(
    aggregator: &Aggregator<'_>,
    sources: &[Subtree<'_>],
) -> Result<Vec<PartReport>, GeometryError> {
    sources
        .iter()
        .map(|s| -> Result<PartReport, GeometryError> {
            Ok(PartReport {
                label: s.label.clone(),
                mass: aggregator.aggregate(s.node, &s.path)?,
            })
        })
        .collect()
}

fn grand_total(
    tree: &AssemblyTree,
    classifier: &MaterialClassifier,
) -> Result<MassProperties, GeometryError> {
    let aggregator = Aggregator::new(classifier);
    tree.depth1()
        .iter()
        .enumerate()
        .map(|(i, node)| {
            aggregator
                .aggregate(node, &NodePath::root().child(i))
                .map(|m| m.props)
        })
        .sum()
}

impl MassReport {
    /// Aggregate every planned link and the unmapped remainder
    pub fn from_plan(
        tree: &AssemblyTree,
        plan: &LinkPlan<'_>,
        classifier: &MaterialClassifier,
    ) -> Result<Self, GeometryError> {
        let aggregator = Aggregator::new(classifier).with_exclusions(plan.exclusions());

        let links = plan
            .links
            .iter()
            .map(|link| -> Result<LinkReport, GeometryError> {
                Ok(LinkReport::new(
                    link.name.clone(),
                    fold_sources(&aggregator, &link.sources)?,
                ))
            })
            .collect::<Result<Vec<_>, GeometryError>>()?;

        Ok(Self {
            links,
            unmapped: fold_sources(&aggregator, &plan.unmapped)?,
            missing: plan.missing.clone(),
            grand_total: grand_total(tree, classifier)?,
        })
    }

    /// Every top-level part as its own entry, no link map
    pub fn per_part(
        tree: &AssemblyTree,
        classifier: &MaterialClassifier,
    ) -> Result<Self, GeometryError> {
        let aggregator = Aggregator::new(classifier);
        let links = tree
            .depth1()
            .iter()
            .enumerate()
            .map(|(i, node)| -> Result<LinkReport, GeometryError> {
                let part = PartReport {
                    label: node.key().to_string(),
                    mass: aggregator.aggregate(node, &NodePath::root().child(i))?,
                };
                Ok(LinkReport::new(node.key().to_string(), vec![part]))
            })
            .collect::<Result<Vec<_>, GeometryError>>()?;

        let grand_total = links.iter().map(|l| l.total).sum();
        Ok(Self {
            links,
            unmapped: Vec::new(),
            missing: Vec::new(),
            grand_total,
        })
    }

    pub fn link(&self, name: &str) -> Option<&LinkReport> {
        self.links.iter().find(|l| l.name == name)
    }

    pub fn mapped_mass(&self) -> f64 {
        self.links.iter().map(|l| l.total.mass).sum()
    }

    pub fn unmapped_mass(&self) -> f64 {
        self.unmapped.iter().map(|p| p.mass.props.mass).sum()
    }

    /// Links whose total mass is zero
    pub fn zero_mass_links(&self) -> impl Iterator<Item = (&str, &ZeroMassError)> {
        self.links
            .iter()
            .filter_map(|l| l.inertial.as_ref().err().map(|e| (l.name.as_str(), e)))
    }

    /// Compact one-line-per-link table
    pub fn summary_table(&self) -> String {
        let mut out = format!(
            "{:<15} | {:>6} | {:>10} | {:>12} | {:>12} | {:>12}\n",
            "Link", "Solids", "Mass (g)", "CoM X (m)", "CoM Y (m)", "CoM Z (m)"
        );
        out.push_str(&"-".repeat(85));
        out.push('\n');
        for link in &self.links {
            if let Ok(inertial) = &link.inertial {
                out.push_str(&format!(
                    "  {:<13} | {:>6} | {:>10.1} | {:>12.6} | {:>12.6} | {:>12.6}\n",
                    link.name,
                    link.total.solid_count,
                    inertial.mass * 1000.0,
                    inertial.com.x,
                    inertial.com.y,
                    inertial.com.z
                ));
            }
        }
        out
    }
}

struct Materials<'a>(&'a [MaterialUse]);

impl fmt::Display for Materials<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|m| m.material == "default") {
            return Ok(());
        }
        let labels: Vec<String> = self
            .0
            .iter()
            .map(|m| match m.policy {
                MassPolicy::Density { kg_per_m3 } => {
                    format!("{}: {} kg/m³", m.material, kg_per_m3)
                }
                MassPolicy::FixedMass { grams } => format!("{}: {} g", m.material, grams),
            })
            .collect();
        write!(f, " [{}]", labels.join(", "))
    }
}

fn write_inertial(f: &mut fmt::Formatter<'_>, total: &MassProperties, i: &Inertial) -> fmt::Result {
    writeln!(
        f,
        "  Volume:  {:.1} mm³  ({:.2} cm³)",
        total.volume_mm3,
        total.volume_mm3 / 1000.0
    )?;
    writeln!(f, "  Mass:    {:.4} kg  ({:.1} g)", i.mass, i.mass * 1000.0)?;
    writeln!(f, "  CoM (m): ({:.6}, {:.6}, {:.6})", i.com.x, i.com.y, i.com.z)?;
    writeln!(f, "  Inertia (kg·m²) at CoM:")?;
    writeln!(
        f,
        "    Ixx={:.5e}  Iyy={:.5e}  Izz={:.5e}",
        i.inertia.ixx, i.inertia.iyy, i.inertia.izz
    )?;
    writeln!(
        f,
        "    Ixy={:.5e}  Ixz={:.5e}  Iyz={:.5e}",
        i.inertia.ixy, i.inertia.ixz, i.inertia.iyz
    )
}

impl fmt::Display for MassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(RULE_WIDTH);
        writeln!(f, "{}", rule)?;

        for link in &self.links {
            writeln!(f)?;
            match &link.inertial {
                Ok(inertial) => {
                    writeln!(
                        f,
                        "{} ({} solids from {} parts):",
                        link.name,
                        link.total.solid_count,
                        link.parts.len()
                    )?;
                    for part in &link.parts {
                        writeln!(
                            f,
                            "    {} ({} solids){}",
                            part.label,
                            part.mass.props.solid_count,
                            Materials(&part.mass.materials)
                        )?;
                    }
                    write_inertial(f, &link.total, inertial)?;
                }
                Err(err) => writeln!(f, "{}: no valid solids ({})", link.name, err)?,
            }
        }

        if !self.unmapped.is_empty() {
            writeln!(f, "\n{}", rule)?;
            writeln!(f, "Unmapped parts ({}):", self.unmapped.len())?;
            for part in &self.unmapped {
                writeln!(
                    f,
                    "  {:<60} ({} solids, {:.1} g)",
                    part.label,
                    part.mass.props.solid_count,
                    part.mass.props.mass * 1000.0
                )?;
            }
            let unmapped = self.unmapped_mass();
            writeln!(f, "  Unmapped mass: {:.4} kg ({:.1} g)", unmapped, unmapped * 1000.0)?;
        }

        if !self.missing.is_empty() {
            writeln!(f, "\nMapped parts not found in the assembly:")?;
            for missing in &self.missing {
                writeln!(f, "  {} -> {}", missing.entry, missing.link)?;
            }
        }

        let mapped = self.mapped_mass();
        writeln!(f, "\n{}", rule)?;
        writeln!(f, "Total mapped mass:   {:.4} kg ({:.1} g)", mapped, mapped * 1000.0)?;
        writeln!(
            f,
            "Total assembly mass: {:.4} kg ({:.1} g)",
            self.grand_total.mass,
            self.grand_total.mass * 1000.0
        )?;
        writeln!(f)?;
        f.write_str(&self.summary_table())
    }
}

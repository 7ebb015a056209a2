//! Inertia tensors and additive mass properties
//!
//! All quantities in this module are SI: kg, m, kg·m². CAD geometry in
//! millimetres is converted exactly once, in [`MassProperties::from_solid`].

use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

use crate::tree::SolidMoments;

/// Millimetres to metres
pub const MM_TO_M: f64 = 1e-3;
/// Cubic millimetres to cubic metres
pub const MM3_TO_M3: f64 = 1e-9;
/// Volume-weighted inertia (mm⁵) to metres⁵
pub const MM5_TO_M5: f64 = 1e-15;

/// Below this total mass (kg) a centre of mass is considered undefined
pub const MIN_MASS_KG: f64 = 1e-12;

/// Symmetric inertia tensor stored as its six independent components.
///
/// Off-diagonal entries are tensor elements (`ixy = -∫xy dm`), the same
/// convention URDF uses for `<inertia ixy=...>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InertiaMatrix {
    pub ixx: f64,
    #[serde(default)]
    pub ixy: f64,
    #[serde(default)]
    pub ixz: f64,
    pub iyy: f64,
    #[serde(default)]
    pub iyz: f64,
    pub izz: f64,
}

impl InertiaMatrix {
    pub const ZERO: Self = Self {
        ixx: 0.0,
        ixy: 0.0,
        ixz: 0.0,
        iyy: 0.0,
        iyz: 0.0,
        izz: 0.0,
    };

    /// Diagonal tensor (principal axes aligned with the frame)
    pub fn diagonal(ixx: f64, iyy: f64, izz: f64) -> Self {
        Self {
            ixx,
            iyy,
            izz,
            ..Self::ZERO
        }
    }

    /// Parallel-axis term `m·(|d|²E − d⊗d)` for a point mass at `d`
    pub fn point_mass(mass: f64, d: DVec3) -> Self {
        let d2 = d.length_squared();
        Self {
            ixx: mass * (d2 - d.x * d.x),
            iyy: mass * (d2 - d.y * d.y),
            izz: mass * (d2 - d.z * d.z),
            ixy: -mass * d.x * d.y,
            ixz: -mass * d.x * d.z,
            iyz: -mass * d.y * d.z,
        }
    }

    /// Move a centroidal tensor to a reference point displaced by `d` from
    /// the centroid.
    pub fn shifted(&self, mass: f64, d: DVec3) -> Self {
        *self + Self::point_mass(mass, d)
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            ixx: self.ixx * factor,
            ixy: self.ixy * factor,
            ixz: self.ixz * factor,
            iyy: self.iyy * factor,
            iyz: self.iyz * factor,
            izz: self.izz * factor,
        }
    }

    /// Full 3x3 matrix form
    pub fn to_mat3(&self) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(self.ixx, self.ixy, self.ixz),
            DVec3::new(self.ixy, self.iyy, self.iyz),
            DVec3::new(self.ixz, self.iyz, self.izz),
        )
    }

    /// Build from a 3x3 matrix, averaging the off-diagonal pairs
    pub fn from_mat3(m: DMat3) -> Self {
        Self {
            ixx: m.x_axis.x,
            iyy: m.y_axis.y,
            izz: m.z_axis.z,
            ixy: 0.5 * (m.y_axis.x + m.x_axis.y),
            ixz: 0.5 * (m.z_axis.x + m.x_axis.z),
            iyz: 0.5 * (m.z_axis.y + m.y_axis.z),
        }
    }

    /// Re-express the tensor in a rotated basis: `R · I · Rᵀ`
    pub fn rotated(&self, rotation: DMat3) -> Self {
        Self::from_mat3(rotation * self.to_mat3() * rotation.transpose())
    }

    pub fn trace(&self) -> f64 {
        self.ixx + self.iyy + self.izz
    }

    pub fn is_finite(&self) -> bool {
        [self.ixx, self.ixy, self.ixz, self.iyy, self.iyz, self.izz]
            .iter()
            .all(|v| v.is_finite())
    }
}

impl Add for InertiaMatrix {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            ixx: self.ixx + rhs.ixx,
            ixy: self.ixy + rhs.ixy,
            ixz: self.ixz + rhs.ixz,
            iyy: self.iyy + rhs.iyy,
            iyz: self.iyz + rhs.iyz,
            izz: self.izz + rhs.izz,
        }
    }
}

impl Sub for InertiaMatrix {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self + rhs.scaled(-1.0)
    }
}

impl AddAssign for InertiaMatrix {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Additive mass properties referenced to the global origin.
///
/// Summing two values is exact composition: masses add, first moments add,
/// and origin-referenced tensors add.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MassProperties {
    /// Mass in kg
    pub mass: f64,
    /// Σ mᵢ·cᵢ in kg·m
    pub first_moment: DVec3,
    /// Inertia tensor about the global origin, kg·m²
    pub inertia: InertiaMatrix,
    /// CAD volume that produced this mass, mm³
    pub volume_mm3: f64,
    /// Number of CAD solids folded in
    pub solid_count: usize,
}

impl MassProperties {
    /// A rigid body with `mass` at `com` (m) and centroidal tensor `inertia_com`
    pub fn from_body(
        mass: f64,
        com: DVec3,
        inertia_com: InertiaMatrix,
        volume_mm3: f64,
        solid_count: usize,
    ) -> Self {
        Self {
            mass,
            first_moment: com * mass,
            inertia: inertia_com.shifted(mass, com),
            volume_mm3,
            solid_count,
        }
    }

    /// Convert one CAD solid (mm units) at the given density (kg/m³)
    pub fn from_solid(solid: &SolidMoments, kg_per_m3: f64) -> Self {
        let mass = solid.volume_mm3 * MM3_TO_M3 * kg_per_m3;
        let com = solid.centroid_mm * MM_TO_M;
        let inertia = solid.inertia_mm5.scaled(kg_per_m3 * MM5_TO_M5);
        Self::from_body(mass, com, inertia, solid.volume_mm3, 1)
    }

    /// Centre of mass and CoM-referenced tensor.
    ///
    /// The parallel-axis correction for the total centroid is removed once
    /// here, never per contribution.
    pub fn finalize(&self) -> Result<Inertial, ZeroMassError> {
        if !(self.mass >= MIN_MASS_KG) {
            return Err(ZeroMassError { mass: self.mass });
        }
        let com = self.first_moment / self.mass;
        Ok(Inertial {
            mass: self.mass,
            com,
            inertia: self.inertia - InertiaMatrix::point_mass(self.mass, com),
            inertia_origin: self.inertia,
        })
    }
}

impl Add for MassProperties {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            mass: self.mass + rhs.mass,
            first_moment: self.first_moment + rhs.first_moment,
            inertia: self.inertia + rhs.inertia,
            volume_mm3: self.volume_mm3 + rhs.volume_mm3,
            solid_count: self.solid_count + rhs.solid_count,
        }
    }
}

impl AddAssign for MassProperties {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for MassProperties {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl<'a> Sum<&'a MassProperties> for MassProperties {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Finalized inertial properties of one body, global CAD frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inertial {
    /// kg
    pub mass: f64,
    /// Centre of mass, m
    pub com: DVec3,
    /// Tensor about the centre of mass, axes parallel to the global frame
    pub inertia: InertiaMatrix,
    /// Tensor about the global origin
    pub inertia_origin: InertiaMatrix,
}

/// A body whose accumulated mass is zero has no centre of mass
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("total mass is zero ({mass:e} kg); centre of mass is undefined")]
pub struct ZeroMassError {
    pub mass: f64,
}

//! Geometry feature snapshot consumed by the recommendation engine
//!
//! The processing pipeline measures the mesh; this crate only reads the
//! resulting numbers. Missing fields in the analyzer's JSON fall back to
//! neutral defaults.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FabError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceFinish {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tolerance {
    Loose,
    #[default]
    Standard,
    Tight,
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tolerance::Loose => write!(f, "loose"),
            Tolerance::Standard => write!(f, "standard"),
            Tolerance::Tight => write!(f, "tight"),
        }
    }
}

fn default_min_wall_thickness() -> f64 {
    2.0
}

fn default_complexity_score() -> f64 {
    0.5
}

/// Measured geometry of one part. Lengths in mm, volume in mm³, area in mm².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryFeatureSet {
    #[serde(default)]
    pub bounding_box: [f64; 3],
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub surface_area: f64,

    #[serde(default)]
    pub has_overhangs: bool,
    #[serde(default)]
    pub max_overhang_angle: f64,
    #[serde(default)]
    pub has_thin_walls: bool,
    #[serde(default = "default_min_wall_thickness")]
    pub min_wall_thickness: f64,
    #[serde(default)]
    pub has_complex_geometry: bool,
    #[serde(default = "default_complexity_score")]
    pub complexity_score: f64,

    #[serde(default)]
    pub has_internal_cavities: bool,
    #[serde(default)]
    pub has_internal_channels: bool,
    #[serde(default)]
    pub requires_supports: bool,

    #[serde(default, alias = "surface_roughness_requirement")]
    pub surface_roughness: SurfaceFinish,
    #[serde(default, alias = "dimensional_tolerance")]
    pub tolerance: Tolerance,
}

impl Default for GeometryFeatureSet {
    fn default() -> Self {
        Self {
            bounding_box: [0.0; 3],
            volume: 0.0,
            surface_area: 0.0,
            has_overhangs: false,
            max_overhang_angle: 0.0,
            has_thin_walls: false,
            min_wall_thickness: default_min_wall_thickness(),
            has_complex_geometry: false,
            complexity_score: default_complexity_score(),
            has_internal_cavities: false,
            has_internal_channels: false,
            requires_supports: false,
            surface_roughness: SurfaceFinish::default(),
            tolerance: Tolerance::default(),
        }
    }
}

impl GeometryFeatureSet {
    pub fn volume_cm3(&self) -> f64 {
        self.volume / 1000.0
    }

    /// True when every axis of the bounding box is within `envelope`.
    pub fn fits_within(&self, envelope: [f64; 3]) -> bool {
        self.bounding_box
            .iter()
            .zip(envelope.iter())
            .all(|(part, limit)| part <= limit)
    }

    pub fn has_internal_features(&self) -> bool {
        self.has_internal_cavities || self.has_internal_channels
    }

    /// Reject values no real measurement can produce.
    pub fn validate(&self) -> Result<(), FabError> {
        for (axis, value) in ["x", "y", "z"].iter().zip(self.bounding_box.iter()) {
            check_non_negative(&format!("bounding_box.{axis}"), *value)?;
        }
        check_non_negative("volume", self.volume)?;
        check_non_negative("surface_area", self.surface_area)?;
        check_non_negative("min_wall_thickness", self.min_wall_thickness)?;

        if !self.max_overhang_angle.is_finite() || !(0.0..=180.0).contains(&self.max_overhang_angle)
        {
            return Err(FabError::Validation(format!(
                "max_overhang_angle must be within [0, 180] degrees, got {}",
                self.max_overhang_angle
            )));
        }
        if !self.complexity_score.is_finite() || !(0.0..=1.0).contains(&self.complexity_score) {
            return Err(FabError::Validation(format!(
                "complexity_score must be within [0, 1], got {}",
                self.complexity_score
            )));
        }
        Ok(())
    }
}

fn check_non_negative(field: &str, value: f64) -> Result<(), FabError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FabError::Validation(format!(
            "{field} must be a finite, non-negative number, got {value}"
        )))
    }
}

//! Severity dimensions and the clamped 13-value severity vector.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::{CoreError, Result};

/// Number of independently scored defect dimensions.
pub const NUM_DIMENSIONS: usize = 13;

/// Lowest severity a defect can be scored.
pub const MIN_SEVERITY: f32 = 0.0;

/// Highest severity a defect can be scored.
pub const MAX_SEVERITY: f32 = 6.0;

/// One of the 13 named defect categories.
///
/// The declaration order is the order of the regression head outputs, of the
/// training label columns and of every displayed score list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeverityDimension {
    /// Oil leakage.
    OilLeakage,
    /// Corrosion.
    Corrosion,
    /// Rust.
    Rust,
    /// Paint fading.
    PaintFading,
    /// Bushing cracks.
    BushingCracks,
    /// Broken connectors.
    BrokenConnectors,
    /// Insulator contamination.
    InsulatorContamination,
    /// Burnt marks or overheating.
    BurntMarks,
    /// Deformed tank or bent fins.
    DeformedTank,
    /// Loose or unsafe wiring.
    LooseWiring,
    /// Dust accumulation.
    DustAccumulation,
    /// Gasket leakage.
    GasketLeakage,
    /// Damaged or bent pole structure.
    DamagedPole,
}

impl SeverityDimension {
    /// All dimensions in output order.
    pub const ALL: [SeverityDimension; NUM_DIMENSIONS] = [
        Self::OilLeakage,
        Self::Corrosion,
        Self::Rust,
        Self::PaintFading,
        Self::BushingCracks,
        Self::BrokenConnectors,
        Self::InsulatorContamination,
        Self::BurntMarks,
        Self::DeformedTank,
        Self::LooseWiring,
        Self::DustAccumulation,
        Self::GasketLeakage,
        Self::DamagedPole,
    ];

    /// Position of this dimension in the output vector.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Dimension at `index`, if in range.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Stable snake_case key used in serialized results.
    pub fn key(self) -> &'static str {
        match self {
            Self::OilLeakage => "oil_leakage",
            Self::Corrosion => "corrosion",
            Self::Rust => "rust",
            Self::PaintFading => "paint_fading",
            Self::BushingCracks => "bushing_cracks",
            Self::BrokenConnectors => "broken_connectors",
            Self::InsulatorContamination => "insulator_contamination",
            Self::BurntMarks => "burnt_marks_overheating",
            Self::DeformedTank => "deformed_tank_bent_fins",
            Self::LooseWiring => "loose_or_unsafe_wiring",
            Self::DustAccumulation => "dust_accumulation",
            Self::GasketLeakage => "gasket_leakage",
            Self::DamagedPole => "damaged_or_bent_pole_structure",
        }
    }

    /// Human readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::OilLeakage => "Oil leakage",
            Self::Corrosion => "Corrosion",
            Self::Rust => "Rust",
            Self::PaintFading => "Paint fading",
            Self::BushingCracks => "Bushing cracks",
            Self::BrokenConnectors => "Broken connectors",
            Self::InsulatorContamination => "Insulator contamination",
            Self::BurntMarks => "Burnt marks / overheating",
            Self::DeformedTank => "Deformed tank / bent fins",
            Self::LooseWiring => "Loose or unsafe wiring",
            Self::DustAccumulation => "Dust accumulation",
            Self::GasketLeakage => "Gasket leakage",
            Self::DamagedPole => "Damaged or bent pole structure",
        }
    }

    /// Label column name used by the annotated training data.
    pub fn column(self) -> &'static str {
        match self {
            Self::OilLeakage => "Oil_leakage_score",
            Self::Corrosion => "Corrosion_score",
            Self::Rust => "Rust_score",
            Self::PaintFading => "Paint_fading_score",
            Self::BushingCracks => "Bushing_cracks_score",
            Self::BrokenConnectors => "Broken_connectors_score",
            Self::InsulatorContamination => "Insulator_contamination_score",
            Self::BurntMarks => "Burnt_marks_/_overheating_score",
            Self::DeformedTank => "Deformed_tank_/_bent_fins_score",
            Self::LooseWiring => "Loose_or_unsafe_wiring_score",
            Self::DustAccumulation => "Dust_accumulation_score",
            Self::GasketLeakage => "Gasket_leakage_score",
            Self::DamagedPole => "Damaged_or_bent_pole_structure_score",
        }
    }
}

impl fmt::Display for SeverityDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SeverityDimension {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.key() == s || d.column() == s)
            .ok_or_else(|| CoreError::UnknownDimension(s.to_string()))
    }
}

impl Serialize for SeverityDimension {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.key())
    }
}

/// Clamp one raw model output into the valid severity range.
///
/// NaN maps to [`MIN_SEVERITY`].
pub fn clamp_severity(value: f32) -> f32 {
    if value.is_nan() {
        MIN_SEVERITY
    } else {
        value.clamp(MIN_SEVERITY, MAX_SEVERITY)
    }
}

/// Index of the largest finite value, first one on ties.
///
/// Returns `None` when `values` is empty or holds no comparable value.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Thirteen clamped severity scores in [`SeverityDimension::ALL`] order.
///
/// Every element lies in `[0, 6]`. The overall sum is always recomputed from
/// the elements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityVector {
    values: [f32; NUM_DIMENSIONS],
}

impl SeverityVector {
    /// Build from raw model outputs, clamping each element.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LengthMismatch`] unless exactly 13 values are given.
    pub fn from_raw(raw: &[f32]) -> Result<Self> {
        if raw.len() != NUM_DIMENSIONS {
            return Err(CoreError::LengthMismatch {
                expected: NUM_DIMENSIONS,
                got: raw.len(),
            });
        }
        let mut values = [0.0f32; NUM_DIMENSIONS];
        for (dst, &src) in values.iter_mut().zip(raw) {
            *dst = clamp_severity(src);
        }
        Ok(Self { values })
    }

    /// All-zero vector.
    pub fn zeros() -> Self {
        Self {
            values: [0.0; NUM_DIMENSIONS],
        }
    }

    /// Element-wise mean of `vectors`, `None` when empty.
    pub fn mean<'a>(vectors: impl IntoIterator<Item = &'a SeverityVector>) -> Option<Self> {
        let mut sums = [0.0f64; NUM_DIMENSIONS];
        let mut count = 0usize;
        for v in vectors {
            for (acc, &x) in sums.iter_mut().zip(v.values.iter()) {
                *acc += f64::from(x);
            }
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let mut values = [0.0f32; NUM_DIMENSIONS];
        for (dst, acc) in values.iter_mut().zip(sums) {
            *dst = (acc / count as f64) as f32;
        }
        Some(Self { values })
    }

    /// Score for one dimension.
    pub fn get(&self, dimension: SeverityDimension) -> f32 {
        self.values[dimension.index()]
    }

    /// Scores in output order.
    pub fn values(&self) -> &[f32; NUM_DIMENSIONS] {
        &self.values
    }

    /// `(dimension, score)` pairs in output order.
    pub fn iter(&self) -> impl Iterator<Item = (SeverityDimension, f32)> + '_ {
        SeverityDimension::ALL
            .iter()
            .copied()
            .zip(self.values.iter().copied())
    }

    /// Sum of the 13 clamped scores.
    pub fn overall(&self) -> f32 {
        self.values.iter().sum()
    }

    /// Dimension with the highest clamped score.
    pub fn worst(&self) -> SeverityDimension {
        argmax(&self.values)
            .and_then(SeverityDimension::from_index)
            .unwrap_or(SeverityDimension::OilLeakage)
    }
}

impl Serialize for SeverityVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_DIMENSIONS))?;
        for (dimension, value) in self.iter() {
            map.serialize_entry(dimension.key(), &value)?;
        }
        map.end()
    }
}

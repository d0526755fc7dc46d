#![deny(missing_docs)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

//! This crate implements an HTTP service that takes 2D/3D source artifacts,
//! converts them into printable meshes, runs an external slicer over them,
//! and returns a downloadable print artifact together with a cost estimate.

pub mod admission;
pub mod archive;
pub mod config;
pub mod convert;
pub mod errlog;
pub mod error;
pub mod estimator;
pub mod gcode;
pub mod pipeline;
pub mod pricing;
pub mod runner;
pub mod server;
pub mod slicer;


use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tolerance used when comparing layer heights for equality.
pub const LAYER_HEIGHT_EPSILON: f64 = 1e-9;

/// Specific additive process used to manufacture a part. The technology is
/// always taken from the request path, never inferred from the body.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Technology {
    /// Fused Deposition Modeling, layers of melted filament.
    FDM,

    /// Stereolithography, liquid resin cured via masked UV exposure.
    SLA,
}

impl Technology {
    /// Canonical uppercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FDM => "FDM",
            Self::SLA => "SLA",
        }
    }

    /// Parse a path segment, canonicalizing case. Anything other than
    /// FDM/SLA is rejected.
    pub fn parse(segment: &str) -> Option<Self> {
        match segment.to_uppercase().as_str() {
            "FDM" => Some(Self::FDM),
            "SLA" => Some(Self::SLA),
            _ => None,
        }
    }

    /// Layer heights this technology accepts, paired with the canonical
    /// label used in slicer profile filenames.
    pub fn allowed_layer_heights(&self) -> &'static [LayerHeight] {
        match self {
            Self::FDM => &[
                LayerHeight { mm: 0.1, label: "0.1" },
                LayerHeight { mm: 0.2, label: "0.2" },
                LayerHeight { mm: 0.3, label: "0.3" },
            ],
            Self::SLA => &[
                LayerHeight { mm: 0.025, label: "0.025" },
                LayerHeight { mm: 0.05, label: "0.05" },
            ],
        }
    }

    /// Resolve a request-supplied layer height against the allowed set,
    /// comparing within [LAYER_HEIGHT_EPSILON].
    pub fn resolve_layer_height(&self, mm: f64) -> Option<LayerHeight> {
        self.allowed_layer_heights()
            .iter()
            .find(|candidate| (candidate.mm - mm).abs() < LAYER_HEIGHT_EPSILON)
            .copied()
    }

    /// Maximum printable extent of the machine along each axis.
    pub fn build_volume(&self) -> Volume {
        match self {
            Self::FDM => Volume {
                x: 250.0,
                y: 210.0,
                z: 210.0,
            },
            Self::SLA => Volume {
                x: 120.0,
                y: 120.0,
                z: 150.0,
            },
        }
    }

    /// File extension of the artifact the slicer produces for this
    /// technology.
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            Self::FDM => "gcode",
            Self::SLA => "sl1",
        }
    }
}

impl std::fmt::Display for Technology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A layer height from a technology's allowed set. Carries both the numeric
/// value and the canonical label used to key slicer profile files, so
/// `0.050` and `0.05` select the same profile.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LayerHeight {
    /// Vertical resolution of one printed slice, in millimeters.
    pub mm: f64,

    /// Canonical spelling, as it appears in `<TECH>_<label>mm.ini`.
    pub label: &'static str,
}

/// Extent of a 3D volume along each axis, in millimeters.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Volume {
    /// Extent along the X axis ("left and right"), in millimeters.
    pub x: f64,

    /// Extent along the Y axis ("front to back"), in millimeters.
    pub y: f64,

    /// Extent along the Z axis ("up and down"), in millimeters.
    pub z: f64,
}

impl Volume {
    /// True if any axis of `self` exceeds the corresponding axis of
    /// `limit`.
    pub fn exceeds(&self, limit: &Volume) -> bool {
        self.x > limit.x || self.y > limit.y || self.z > limit.z
    }
}

impl std::fmt::Display for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

/// Normalized statistics for a sliced model, as returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PrintStats {
    /// Total print time, in seconds.
    pub print_time_seconds: u64,

    /// Human readable print time, `"{h}h {m}m "`; SLA estimates carry an
    /// `(Est.)` suffix. Empty when the print time is zero.
    pub print_time_readable: String,

    /// Filament consumed, in meters. Zero for SLA.
    pub material_used_m: f64,

    /// Height of the model as measured by the slicer, in millimeters.
    pub object_height_mm: f64,

    /// Estimated price in HUF, snapped up to the nearest 10.
    pub estimated_price_huf: u64,
}

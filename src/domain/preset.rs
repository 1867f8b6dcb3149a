//! Enhancement presets and the provider algorithm parameters they map to.
//!
//! The table is fixed: every preset keeps the recitation intact and only
//! varies how much cleanup and room character the provider applies.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named bundle of audio-processing toggles applied by the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnhancementPreset {
    /// Noise reduction and rumble filter only
    Clean,

    /// Full cleanup with gate and compression
    Studio,

    /// Studio plus a small-room reverb
    MosqueLight,

    /// Studio plus a large-hall reverb
    MosqueDeep,

    /// Any name we don't know; falls back to the base algorithms
    Unrecognized(String),
}

impl EnhancementPreset {
    /// Parse a preset name. Unknown names are kept, not rejected.
    pub fn parse(name: &str) -> Self {
        match name {
            "clean" => Self::Clean,
            "studio" => Self::Studio,
            "mosque_light" => Self::MosqueLight,
            "mosque_deep" => Self::MosqueDeep,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Wire name of the preset
    pub fn as_str(&self) -> &str {
        match self {
            Self::Clean => "clean",
            Self::Studio => "studio",
            Self::MosqueLight => "mosque_light",
            Self::MosqueDeep => "mosque_deep",
            Self::Unrecognized(name) => name,
        }
    }

    /// All presets with a dedicated row in the table
    pub fn known() -> [EnhancementPreset; 4] {
        [Self::Clean, Self::Studio, Self::MosqueLight, Self::MosqueDeep]
    }

    /// Map this preset to the provider's algorithm parameters
    pub fn algorithm_params(&self) -> AlgorithmParams {
        let base = AlgorithmParams {
            denoise: true,
            hipfilter: true,
            leveler: true,
            normloudness: true,
            ..Default::default()
        };

        match self {
            Self::Clean => AlgorithmParams {
                denoise: true,
                hipfilter: true,
                ..Default::default()
            },
            Self::Studio => AlgorithmParams {
                gate: true,
                compressor: true,
                ..base
            },
            Self::MosqueLight => AlgorithmParams {
                gate: true,
                compressor: true,
                reverb: Some(ReverbParams::new(0.3, 0.5, 0.15)),
                ..base
            },
            Self::MosqueDeep => AlgorithmParams {
                gate: true,
                compressor: true,
                reverb: Some(ReverbParams::new(0.8, 0.3, 0.35)),
                ..base
            },
            Self::Unrecognized(_) => base,
        }
    }
}

impl Default for EnhancementPreset {
    fn default() -> Self {
        Self::Studio
    }
}

impl fmt::Display for EnhancementPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EnhancementPreset {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<EnhancementPreset> for String {
    fn from(preset: EnhancementPreset) -> Self {
        preset.as_str().to_string()
    }
}

/// Algorithm toggles sent to the provider.
///
/// Disabled flags are omitted from the request body; the provider treats a
/// missing flag as off.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmParams {
    #[serde(default, skip_serializing_if = "is_off")]
    pub denoise: bool,

    #[serde(default, skip_serializing_if = "is_off")]
    pub hipfilter: bool,

    #[serde(default, skip_serializing_if = "is_off")]
    pub leveler: bool,

    #[serde(default, skip_serializing_if = "is_off")]
    pub normloudness: bool,

    #[serde(default, skip_serializing_if = "is_off")]
    pub gate: bool,

    #[serde(default, skip_serializing_if = "is_off")]
    pub compressor: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverb: Option<ReverbParams>,
}

fn is_off(flag: &bool) -> bool {
    !*flag
}

/// Room reverb settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReverbParams {
    pub enabled: bool,
    pub room_size: f64,
    pub damping: f64,
    pub wet_level: f64,
}

impl ReverbParams {
    pub fn new(room_size: f64, damping: f64, wet_level: f64) -> Self {
        Self {
            enabled: true,
            room_size,
            damping,
            wet_level,
        }
    }
}

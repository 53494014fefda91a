//! Aperio SVS metadata.
//!
//! SVS files are pyramidal TIFFs whose first ImageDescription carries the
//! scanner's metadata:
//!
//! ```text
//! Aperio Image Library v12.0.15
//! 46920x33600 [0,100 46000x32914] (256x256) JPEG/RGB Q=70|AppMag = 20|MPP = 0.499
//! ```
//!
//! The text before the first `|` is a free-form header; every later part is a
//! `key = value` pair.

use std::collections::BTreeMap;

const APERIO_MARKER: &str = "Aperio";

/// Whether an ImageDescription was written by Aperio software.
pub fn is_aperio(description: &str) -> bool {
    description.contains(APERIO_MARKER)
}

/// Key/value metadata from an SVS ImageDescription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SvsMetadata {
    /// Microns per pixel at level 0
    pub mpp: Option<f64>,
    /// Objective magnification (`AppMag`)
    pub objective_power: Option<f64>,
    /// Free-form text before the first `|`
    pub header: String,
    /// Every `key = value` pair, keys as written
    pub properties: BTreeMap<String, String>,
}

impl SvsMetadata {
    pub fn parse(description: &str) -> Self {
        let mut parts = description.split('|');
        let mut metadata = SvsMetadata {
            header: parts.next().unwrap_or_default().trim().to_string(),
            ..Default::default()
        };

        for part in parts {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                continue;
            }

            match key {
                "MPP" => metadata.mpp = value.parse().ok().filter(|v: &f64| *v > 0.0),
                "AppMag" => metadata.objective_power = value.parse().ok(),
                _ => {}
            }
            metadata.properties.insert(key.to_string(), value.to_string());
        }

        metadata
    }
}

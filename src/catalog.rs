//! The beacon asset catalog.
//!
//! Each beacon style is a [`BeaconDescriptor`]: an ordered list of clips with
//! the maximum off-axis angle at which each clip plays, plus a tempo hint.
//! The table is built once and shared read-only by every beacon of that
//! style; the engine selects a style by integer index.

use std::sync::LazyLock;

/// One clip of a beacon style and the largest absolute off-axis angle (in
/// degrees) at which it is the active clip.
#[derive(Debug, Clone)]
pub struct BeaconAsset {
    pub filename: &'static str,
    pub max_angle: f64,
}

impl BeaconAsset {
    const fn new(filename: &'static str, max_angle: f64) -> Self {
        Self {
            filename,
            max_angle,
        }
    }

    pub fn is_active(&self, degrees_off_axis: f64) -> bool {
        degrees_off_axis.abs() <= self.max_angle
    }
}

/// A named beacon style: clips sorted ascending by `max_angle`.
#[derive(Debug, Clone)]
pub struct BeaconDescriptor {
    pub name: &'static str,
    /// Tempo hint: beats in one phrase of the looped clip.
    pub beats_in_phrase: u32,
    pub assets: Vec<BeaconAsset>,
}

impl BeaconDescriptor {
    /// Index of the clip to play for the given off-axis angle: the first
    /// (smallest-angle) entry whose `max_angle` covers it, falling back to
    /// the first entry when none does.
    pub fn select_clip(&self, degrees_off_axis: f64) -> usize {
        self.assets
            .iter()
            .position(|asset| asset.is_active(degrees_off_axis))
            .unwrap_or(0)
    }
}

/// Asset played once when a beacon starts.
pub const INTRO_ASSET: &str = "Route/Route_Start.wav";
/// Asset played once when a beacon is wound down.
pub const OUTRO_ASSET: &str = "Route/Route_End.wav";

/// All selectable beacon styles, in host-facing index order.
pub static BEACON_DESCRIPTORS: LazyLock<Vec<BeaconDescriptor>> = LazyLock::new(|| {
    vec![
        BeaconDescriptor {
            name: "Original",
            beats_in_phrase: 2,
            assets: vec![
                BeaconAsset::new("Classic/Classic_OnAxis.wav", 22.5),
                BeaconAsset::new("Classic/Classic_OffAxis.wav", 180.0),
            ],
        },
        BeaconDescriptor {
            name: "Current",
            beats_in_phrase: 6,
            assets: vec![
                BeaconAsset::new("New/Current_A+.wav", 15.0),
                BeaconAsset::new("New/Current_A.wav", 55.0),
                BeaconAsset::new("New/Current_B.wav", 125.0),
                BeaconAsset::new("New/Current_Behind.wav", 180.0),
            ],
        },
        BeaconDescriptor {
            name: "Tactile",
            beats_in_phrase: 6,
            assets: vec![
                BeaconAsset::new("Tactile/Tactile_OnAxis.wav", 15.0),
                BeaconAsset::new("Tactile/Tactile_OffAxis.wav", 125.0),
                BeaconAsset::new("Tactile/Tactile_Behind.wav", 180.0),
            ],
        },
        BeaconDescriptor {
            name: "Flare",
            beats_in_phrase: 6,
            assets: vec![
                BeaconAsset::new("Flare/Flare_A+.wav", 15.0),
                BeaconAsset::new("Flare/Flare_A.wav", 55.0),
                BeaconAsset::new("Flare/Flare_B.wav", 125.0),
                BeaconAsset::new("Flare/Flare_Behind.wav", 180.0),
            ],
        },
        BeaconDescriptor {
            name: "Shimmer",
            beats_in_phrase: 6,
            assets: vec![
                BeaconAsset::new("Shimmer/Shimmer_A+.wav", 15.0),
                BeaconAsset::new("Shimmer/Shimmer_A.wav", 55.0),
                BeaconAsset::new("Shimmer/Shimmer_B.wav", 125.0),
                BeaconAsset::new("Shimmer/Shimmer_Behind.wav", 180.0),
            ],
        },
        BeaconDescriptor {
            name: "Ping",
            beats_in_phrase: 6,
            assets: vec![
                BeaconAsset::new("Ping/Ping_A+.wav", 15.0),
                BeaconAsset::new("Ping/Ping_A.wav", 55.0),
                BeaconAsset::new("Ping/Ping_B.wav", 125.0),
                BeaconAsset::new("Tactile/Tactile_Behind.wav", 180.0),
            ],
        },
        BeaconDescriptor {
            name: "Drop",
            beats_in_phrase: 6,
            assets: vec![
                BeaconAsset::new("Drop/Drop_A+.wav", 15.0),
                BeaconAsset::new("Drop/Drop_A.wav", 55.0),
                BeaconAsset::new("Drop/Drop_Behind.wav", 180.0),
            ],
        },
        BeaconDescriptor {
            name: "Signal",
            beats_in_phrase: 6,
            assets: vec![
                BeaconAsset::new("Signal/Signal_A+.wav", 15.0),
                BeaconAsset::new("Signal/Signal_A.wav", 55.0),
                BeaconAsset::new("Drop/Drop_Behind.wav", 180.0),
            ],
        },
        BeaconDescriptor {
            name: "Signal Slow",
            beats_in_phrase: 12,
            assets: vec![
                BeaconAsset::new("Signal Slow/Signal_Slow_A+.wav", 15.0),
                BeaconAsset::new("Signal Slow/Signal_Slow_A.wav", 55.0),
                BeaconAsset::new("Signal Slow/Signal_Slow_Behind.wav", 180.0),
            ],
        },
        BeaconDescriptor {
            name: "Signal Very Slow",
            beats_in_phrase: 18,
            assets: vec![
                BeaconAsset::new("Signal Very Slow/Signal_Very_Slow_A+.wav", 15.0),
                BeaconAsset::new("Signal Very Slow/Signal_Very_Slow_A.wav", 55.0),
                BeaconAsset::new("Signal Very Slow/Signal_Very_Slow_Behind.wav", 180.0),
            ],
        },
        BeaconDescriptor {
            name: "Mallet",
            beats_in_phrase: 6,
            assets: vec![
                BeaconAsset::new("Mallet/Mallet_A+.wav", 15.0),
                BeaconAsset::new("Mallet/Mallet_A.wav", 55.0),
                BeaconAsset::new("Mallet/Mallet_Behind.wav", 180.0),
            ],
        },
        BeaconDescriptor {
            name: "Mallet Slow",
            beats_in_phrase: 12,
            assets: vec![
                BeaconAsset::new("Mallet Slow/Mallet_Slow_A+.wav", 15.0),
                BeaconAsset::new("Mallet Slow/Mallet_Slow_A.wav", 55.0),
                BeaconAsset::new("Mallet Slow/Mallet_Slow_Behind.wav", 180.0),
            ],
        },
        BeaconDescriptor {
            name: "Mallet Very Slow",
            beats_in_phrase: 18,
            assets: vec![
                BeaconAsset::new("Mallet Very Slow/Mallet_Very_Slow_A+.wav", 15.0),
                BeaconAsset::new("Mallet Very Slow/Mallet_Very_Slow_A.wav", 55.0),
                BeaconAsset::new("Mallet Very Slow/Mallet_Very_Slow_Behind.wav", 180.0),
            ],
        },
    ]
});

/// The reserved style for distance beacons: entry 0 is the "near" clip,
/// entry 1 the "far" clip. Never selected by index from the host.
pub static PROXIMITY_DESCRIPTOR: LazyLock<BeaconDescriptor> = LazyLock::new(|| BeaconDescriptor {
    name: "Proximity",
    beats_in_phrase: 6,
    assets: vec![
        BeaconAsset::new("Proximity/Proximity_Close.wav", 180.0),
        BeaconAsset::new("Proximity/Proximity_Far.wav", 180.0),
    ],
});

/// Look up a descriptor index by its host-facing name.
pub fn descriptor_index_by_name(name: &str) -> Option<usize> {
    BEACON_DESCRIPTORS.iter().position(|d| d.name == name)
}

/// Names of all selectable beacon styles, in index order.
pub fn list_beacon_names() -> Vec<&'static str> {
    BEACON_DESCRIPTORS.iter().map(|d| d.name).collect()
}

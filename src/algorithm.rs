// algorithm.rs - Rendering algorithm selector.
//
// The selector is a plain tag stored on the renderer and read at render
// time. `strategy::Strategy::for_algorithm` turns it into something
// executable; the `Invalid` sentinel never gets that far.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which rendering algorithm the renderer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// One kernel launch over the whole workload. Point cloud and field
    /// must both fit in device memory.
    #[default]
    SinglePass,
    /// Workload split into chunks sent to the device one after another.
    MultiPass,
    /// Multi-pass with the kernel flavor tuned for CPU devices.
    MultiPassCpu,
    /// Multi-pass with the native (range-reduced) math kernel flavor.
    MultiPassNative,
    /// Multi-pass with chunk buffers aligned to the device's storage
    /// offset alignment.
    MultiPassAligned,
    /// Marker for an unknown algorithm. Never executable.
    Invalid,
}

impl Algorithm {
    /// Every executable algorithm, in declaration order.
    pub const ALL: [Algorithm; 5] = [
        Algorithm::SinglePass,
        Algorithm::MultiPass,
        Algorithm::MultiPassCpu,
        Algorithm::MultiPassNative,
        Algorithm::MultiPassAligned,
    ];

    /// Fixed human-readable description, for logs and diagnostics only.
    pub fn description(self) -> &'static str {
        match self {
            Algorithm::SinglePass => "single pass algorithm",
            Algorithm::MultiPass => "multi pass algorithm",
            Algorithm::MultiPassCpu => "CPU based multi pass algorithm",
            Algorithm::MultiPassNative => "multi pass algorithm with native instructions",
            Algorithm::MultiPassAligned => "multi pass algorithm with aligned memory",
            Algorithm::Invalid => "invalid algorithm",
        }
    }

    /// Short identifier, the same spelling serde uses.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::SinglePass => "single_pass",
            Algorithm::MultiPass => "multi_pass",
            Algorithm::MultiPassCpu => "multi_pass_cpu",
            Algorithm::MultiPassNative => "multi_pass_native",
            Algorithm::MultiPassAligned => "multi_pass_aligned",
            Algorithm::Invalid => "invalid",
        }
    }

    pub fn is_multi_pass(self) -> bool {
        matches!(
            self,
            Algorithm::MultiPass
                | Algorithm::MultiPassCpu
                | Algorithm::MultiPassNative
                | Algorithm::MultiPassAligned
        )
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Unknown names parse to `Invalid` rather than failing, so a bad value in
/// a front end's settings is caught at render time with a proper error.
impl FromStr for Algorithm {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let alg = Algorithm::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s.trim()))
            .unwrap_or(Algorithm::Invalid);
        Ok(alg)
    }
}

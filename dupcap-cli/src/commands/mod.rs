//! CLI command implementations

mod capture;
mod config;
mod outputs;
mod probe;

pub use capture::{capture, CaptureArgs};
pub use config::{config, ConfigArgs};
pub use outputs::{outputs, OutputsArgs};
pub use probe::{probe, ProbeArgs};

use std::str::FromStr;

/// Size of a synthetic output, parsed from `WIDTHxHEIGHT`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticSize {
    pub width: u32,
    pub height: u32,
}

impl FromStr for SyntheticSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("Invalid size '{}'. Use WIDTHxHEIGHT, e.g. 1280x720", s))?;
        let width: u32 = width
            .trim()
            .parse()
            .map_err(|_| format!("Invalid width in '{}'", s))?;
        let height: u32 = height
            .trim()
            .parse()
            .map_err(|_| format!("Invalid height in '{}'", s))?;
        if width == 0 || height == 0 {
            return Err(format!("Size '{}' must be non-zero", s));
        }
        Ok(Self { width, height })
    }
}

/// Error for platforms without the desktop duplication service
#[cfg(not(windows))]
pub(crate) fn no_native_backend() -> anyhow::Error {
    anyhow::anyhow!(
        "Desktop duplication is only available on Windows. Use --synthetic WIDTHxHEIGHT to run against a generated desktop."
    )
}

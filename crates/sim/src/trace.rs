//! Wave trace capture.
//!
//! Converts a [`MockDma`](crate::MockDma)'s recorded waves into a
//! serialisable trace for offline analysis and CI golden-file comparison.

use crate::MockDma;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// One pulse as `(on_mask, off_mask, delay_us)`.
pub type TracePulse = (u32, u32, u32);

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WaveTraceEntry {
    pub wave: u32,
    pub pulses: Vec<TracePulse>,
}

/// A complete recording of the waves a run submitted, in dispatch order.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct WaveTrace {
    pub waves: Vec<WaveTraceEntry>,
}

impl WaveTrace {
    /// Snapshots the waves a mock engine has seen so far.
    pub fn capture(engine: &MockDma) -> WaveTrace {
        WaveTrace {
            waves: engine
                .submitted_waves()
                .into_iter()
                .map(|(wave, pulses)| WaveTraceEntry {
                    wave,
                    pulses: pulses
                        .iter()
                        .map(|p| (p.gpio_on, p.gpio_off, p.delay_us))
                        .collect(),
                })
                .collect(),
        }
    }

    /// Total duration of all recorded waves, in microseconds.
    pub fn total_micros(&self) -> u64 {
        self.waves
            .iter()
            .flat_map(|w| &w.pulses)
            .map(|(_, _, delay)| *delay as u64)
            .sum()
    }

    /// Dumps the trace as pretty JSON.
    pub fn dump(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "dumping wave trace");
        let mut file = File::create(path)?;
        let json = serde_json::to_string_pretty(self)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

//! # In-Process Simulation Harness
//!
//! A deterministic stand-in for the pigpio daemon, for testing the stepping
//! engine without hardware. [`MockDma`] implements the same [`DmaEngine`]
//! capability the real daemon client provides, records every pin write and
//! submitted waveform, and models wave completion so the group scheduler's
//! pipeline can be exercised end to end in CI.
//!
//! [`DmaEngine`]: pigpiod_client::DmaEngine

pub mod mock_dma;
pub mod trace;

pub use mock_dma::MockDma;
pub use trace::{WaveTrace, WaveTraceEntry};

//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated field devices speaking the actor protocol."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::f64::consts::PI;

use chrono::{NaiveTime, Timelike};
use rand::prelude::*;
use rand_distr::Normal;

/// Period of the synthetic site load sinusoid, in seconds.
pub const LOAD_PERIOD_S: f64 = 300.0;

/// Hour of day the solar curve starts producing.
pub const SOLAR_DAWN_H: f64 = 6.0;

/// Hour of day the solar curve stops producing.
pub const SOLAR_DUSK_H: f64 = 20.0;

/// Deterministic per-device seed derived from the configured base seed.
///
/// Stochastic models in the same fleet must not share a stream, or their
/// noise would be correlated sample for sample.
pub fn device_seed(base: u64, uid: &str) -> u64 {
    uid.bytes()
        .fold(base, |seed, byte| seed.wrapping_mul(31).wrapping_add(u64::from(byte)))
}

/// Synthetic site load: a slow sinusoid around a base with gaussian noise.
#[derive(Debug)]
pub struct LoadProfile {
    base_kw: f64,
    swing_kw: f64,
    rng: StdRng,
    noise: Normal<f64>,
}

impl LoadProfile {
    /// Build a profile; the same seed reproduces the same load trace.
    pub fn new(base_kw: f64, swing_kw: f64, noise_sigma: f64, seed: u64) -> Self {
        Self {
            base_kw,
            swing_kw,
            rng: StdRng::seed_from_u64(seed),
            noise: Normal::new(0.0, noise_sigma.max(0.0)).expect("sigma must be non-negative"),
        }
    }

    /// Load at `t` seconds into the run, in kW. Never negative.
    pub fn sample(&mut self, t: f64) -> f64 {
        let load = self.base_kw
            + self.swing_kw * (2.0 * PI * t / LOAD_PERIOD_S).sin()
            + self.noise.sample(&mut self.rng);
        load.max(0.0)
    }
}

/// Solar production at `now`: zero outside dawn..dusk, a sine bell inside.
pub fn solar_curve(now: NaiveTime, peak_kw: f64) -> f64 {
    let hour = f64::from(now.num_seconds_from_midnight()) / 3600.0;
    if hour <= SOLAR_DAWN_H || hour >= SOLAR_DUSK_H {
        return 0.0;
    }
    let frac = (hour - SOLAR_DAWN_H) / (SOLAR_DUSK_H - SOLAR_DAWN_H);
    peak_kw * (PI * frac).sin().powi(2)
}

//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Dispatch arbitration and startup sequencing for the site battery."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

use std::collections::HashMap;

use chrono::NaiveTime;
use r_bess_fleet::{
    AcGeneratorBlock, AcMeterBlock, AcSolarBlock, BatteryBlock, DigitalIoBlock, InverterBlock,
    FleetSnapshot, ModuleData, ModuleKind,
};

use crate::settings::DispatchSettings;

/// Cycles a heartbeat may sit unchanged before the device is declared stale.
pub const STALE_CYCLE_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy)]
struct BeatState {
    last: u16,
    unchanged: u32,
}

/// Tracks per-device heartbeat movement across scan cycles.
///
/// A device whose heartbeat has not advanced for [`STALE_CYCLE_LIMIT`]
/// consecutive cycles is treated exactly like a missing device: the policies
/// that depend on it go inactive rather than acting on a frozen reading.
#[derive(Debug, Default)]
pub struct StaleTracker {
    beats: HashMap<String, BeatState>,
}

impl StaleTracker {
    /// Folds one snapshot into the tracker. Call once per cycle, before the
    /// policies read anything.
    pub fn observe(&mut self, snapshot: &FleetSnapshot) {
        for (uid, heartbeat) in snapshot.heartbeats() {
            match self.beats.get_mut(uid) {
                Some(state) if state.last == heartbeat => {
                    state.unchanged = state.unchanged.saturating_add(1);
                }
                Some(state) => {
                    state.last = heartbeat;
                    state.unchanged = 0;
                }
                None => {
                    self.beats.insert(
                        uid.to_owned(),
                        BeatState {
                            last: heartbeat,
                            unchanged: 0,
                        },
                    );
                }
            }
        }
    }

    /// Whether `uid` has been flat for the full staleness window.
    pub fn is_stale(&self, uid: &str) -> bool {
        self.beats
            .get(uid)
            .map(|state| state.unchanged >= STALE_CYCLE_LIMIT)
            .unwrap_or(false)
    }
}

/// Borrowed, staleness-filtered view of one cycle's inputs.
///
/// Every accessor returns `None` when no device of the kind is fitted,
/// enabled, and fresh. Policies treat `None` as "inactive this cycle".
pub struct DispatchInputs<'a> {
    /// The snapshot delivered with `SET_INPUTS`.
    pub snapshot: &'a FleetSnapshot,
    /// Settings parsed at the top of the cycle.
    pub settings: &'a DispatchSettings,
    /// Site-local time used for window evaluation.
    pub now: NaiveTime,
    stale: &'a StaleTracker,
}

impl<'a> DispatchInputs<'a> {
    /// Assembles the view for one cycle.
    pub fn new(
        snapshot: &'a FleetSnapshot,
        settings: &'a DispatchSettings,
        now: NaiveTime,
        stale: &'a StaleTracker,
    ) -> Self {
        Self {
            snapshot,
            settings,
            now,
            stale,
        }
    }

    fn fresh(&self, kind: ModuleKind) -> Option<&'a ModuleData> {
        self.snapshot
            .of_kind(kind)
            .iter()
            .find(|record| record.enabled && !self.stale.is_stale(&record.uid))
            .map(|record| &record.data)
    }

    /// First live battery bank.
    pub fn battery(&self) -> Option<&'a BatteryBlock> {
        match self.fresh(ModuleKind::Battery)? {
            ModuleData::Battery(block) => Some(block),
            _ => None,
        }
    }

    /// First live inverter.
    pub fn inverter(&self) -> Option<&'a InverterBlock> {
        match self.fresh(ModuleKind::Inverter)? {
            ModuleData::Inverter(block) => Some(block),
            _ => None,
        }
    }

    /// First live backup generator.
    pub fn generator(&self) -> Option<&'a AcGeneratorBlock> {
        match self.fresh(ModuleKind::AcGenerator)? {
            ModuleData::AcGenerator(block) => Some(block),
            _ => None,
        }
    }

    /// First live grid meter.
    pub fn ac_meter(&self) -> Option<&'a AcMeterBlock> {
        match self.fresh(ModuleKind::AcMeter)? {
            ModuleData::AcMeter(block) => Some(block),
            _ => None,
        }
    }

    /// First live AC solar inverter.
    pub fn ac_solar(&self) -> Option<&'a AcSolarBlock> {
        match self.fresh(ModuleKind::AcSolar)? {
            ModuleData::AcSolar(block) => Some(block),
            _ => None,
        }
    }

    /// First live digital IO block.
    pub fn digital_io(&self) -> Option<&'a DigitalIoBlock> {
        match self.fresh(ModuleKind::DigitalIo)? {
            ModuleData::DigitalIo(block) => Some(block),
            _ => None,
        }
    }

    /// Grid power with NaN screened out. Import is positive.
    pub fn grid_power_kw(&self) -> Option<f64> {
        let power = self.ac_meter()?.power_kw;
        power.is_finite().then_some(power)
    }
}

//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Typed device records and fleet snapshot model."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::{
    AcGeneratorBlock, AcMeterBlock, AcSolarBlock, BatteryBlock, ClientBlock, DigitalIoBlock,
    InverterBlock, ModuleData, ModuleKind,
};

/// One device as seen by the dispatch layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable device identifier from the site configuration.
    pub uid: String,
    /// Whether the device participates in dispatch this cycle.
    pub enabled: bool,
    /// Typed payload for the device's module kind.
    pub data: ModuleData,
}

impl DeviceRecord {
    /// Construct an enabled record around a payload.
    pub fn new(uid: impl Into<String>, data: ModuleData) -> Self {
        Self {
            uid: uid.into(),
            enabled: true,
            data,
        }
    }

    /// Module kind of this record.
    pub fn kind(&self) -> ModuleKind {
        self.data.kind()
    }
}

/// Value snapshot of the whole fleet, passed between actors by value.
///
/// Records are bucketed by module kind in declaration order; within a kind the
/// configured order is preserved so "first enabled" is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    /// Device records grouped by module kind.
    pub devices: IndexMap<ModuleKind, Vec<DeviceRecord>>,
    /// Wall-clock time the snapshot was assembled.
    pub captured_at: DateTime<Utc>,
}

impl Default for FleetSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetSnapshot {
    /// Empty snapshot stamped with the current time.
    pub fn new() -> Self {
        Self {
            devices: IndexMap::new(),
            captured_at: Utc::now(),
        }
    }

    /// Re-stamp the snapshot; the scan loop does this once per assembly.
    pub fn stamp(&mut self) {
        self.captured_at = Utc::now();
    }

    /// Add a record to its kind bucket.
    pub fn insert(&mut self, record: DeviceRecord) {
        self.devices.entry(record.kind()).or_default().push(record);
    }

    /// All records of one kind, empty when none are present.
    pub fn of_kind(&self, kind: ModuleKind) -> &[DeviceRecord] {
        self.devices.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First enabled record of a kind; policies treat `None` as "not fitted".
    pub fn first_enabled(&self, kind: ModuleKind) -> Option<&DeviceRecord> {
        self.of_kind(kind).iter().find(|record| record.enabled)
    }

    fn first_enabled_mut(&mut self, kind: ModuleKind) -> Option<&mut DeviceRecord> {
        self.devices
            .get_mut(&kind)?
            .iter_mut()
            .find(|record| record.enabled)
    }

    /// Look up a record by uid across all kinds.
    pub fn record(&self, uid: &str) -> Option<&DeviceRecord> {
        self.devices
            .values()
            .flat_map(|records| records.iter())
            .find(|record| record.uid == uid)
    }

    /// Mutable lookup by uid across all kinds.
    pub fn record_mut(&mut self, uid: &str) -> Option<&mut DeviceRecord> {
        self.devices
            .values_mut()
            .flat_map(|records| records.iter_mut())
            .find(|record| record.uid == uid)
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.devices.values().map(Vec::len).sum()
    }

    /// Whether the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate `(uid, heartbeat)` for staleness tracking.
    pub fn heartbeats(&self) -> impl Iterator<Item = (&str, u16)> {
        self.devices
            .values()
            .flat_map(|records| records.iter())
            .map(|record| (record.uid.as_str(), record.data.heartbeat()))
    }

    /// First enabled battery bank.
    pub fn battery(&self) -> Option<&BatteryBlock> {
        match &self.first_enabled(ModuleKind::Battery)?.data {
            ModuleData::Battery(block) => Some(block),
            _ => None,
        }
    }

    /// Mutable view of the first enabled battery bank.
    pub fn battery_mut(&mut self) -> Option<&mut BatteryBlock> {
        match &mut self.first_enabled_mut(ModuleKind::Battery)?.data {
            ModuleData::Battery(block) => Some(block),
            _ => None,
        }
    }

    /// First enabled inverter.
    pub fn inverter(&self) -> Option<&InverterBlock> {
        match &self.first_enabled(ModuleKind::Inverter)?.data {
            ModuleData::Inverter(block) => Some(block),
            _ => None,
        }
    }

    /// Mutable view of the first enabled inverter.
    pub fn inverter_mut(&mut self) -> Option<&mut InverterBlock> {
        match &mut self.first_enabled_mut(ModuleKind::Inverter)?.data {
            ModuleData::Inverter(block) => Some(block),
            _ => None,
        }
    }

    /// First enabled backup generator.
    pub fn generator(&self) -> Option<&AcGeneratorBlock> {
        match &self.first_enabled(ModuleKind::AcGenerator)?.data {
            ModuleData::AcGenerator(block) => Some(block),
            _ => None,
        }
    }

    /// Mutable view of the first enabled backup generator.
    pub fn generator_mut(&mut self) -> Option<&mut AcGeneratorBlock> {
        match &mut self.first_enabled_mut(ModuleKind::AcGenerator)?.data {
            ModuleData::AcGenerator(block) => Some(block),
            _ => None,
        }
    }

    /// First enabled grid meter.
    pub fn ac_meter(&self) -> Option<&AcMeterBlock> {
        match &self.first_enabled(ModuleKind::AcMeter)?.data {
            ModuleData::AcMeter(block) => Some(block),
            _ => None,
        }
    }

    /// First enabled AC solar inverter.
    pub fn ac_solar(&self) -> Option<&AcSolarBlock> {
        match &self.first_enabled(ModuleKind::AcSolar)?.data {
            ModuleData::AcSolar(block) => Some(block),
            _ => None,
        }
    }

    /// First enabled digital IO block.
    pub fn digital_io(&self) -> Option<&DigitalIoBlock> {
        match &self.first_enabled(ModuleKind::DigitalIo)?.data {
            ModuleData::DigitalIo(block) => Some(block),
            _ => None,
        }
    }

    /// Mutable view of the first enabled digital IO block.
    pub fn digital_io_mut(&mut self) -> Option<&mut DigitalIoBlock> {
        match &mut self.first_enabled_mut(ModuleKind::DigitalIo)?.data {
            ModuleData::DigitalIo(block) => Some(block),
            _ => None,
        }
    }

    /// The dispatch client's own telemetry block.
    pub fn client_block(&self) -> Option<&ClientBlock> {
        match &self.first_enabled(ModuleKind::Client)?.data {
            ModuleData::Client(block) => Some(block),
            _ => None,
        }
    }

    /// Mutable view of the client telemetry block.
    pub fn client_block_mut(&mut self) -> Option<&mut ClientBlock> {
        match &mut self.first_enabled_mut(ModuleKind::Client)?.data {
            ModuleData::Client(block) => Some(block),
            _ => None,
        }
    }
}

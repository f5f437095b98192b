//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated field devices speaking the actor protocol."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_bess_common::{FieldPage, FieldValue};
use r_bess_fleet::{
    BatteryBlock, DeviceRecord, FleetSnapshot, ModuleData, ModuleKind, RMSC_RELAY_BIT,
};
use r_bess_proto::{ActionLog, ActorInfo, ActorStatus, DeviceActor, UserAction};

/// Usable pack capacity, in kWh.
pub const PACK_CAPACITY_KWH: f64 = 215.0;

/// Pack power rating used for the BMS limit taper, in kW.
pub const PACK_RATED_KW: f64 = 100.0;

const BUS_BASE_V: f64 = 640.0;
const BUS_SPAN_V: f64 = 160.0;

/// Simulated battery rack bank, including its safety contactor chain.
///
/// SoC integrates the inverter's measured power over the scan interval. The
/// rack supply follows the RMSC relay in the digital IO block one cycle
/// behind the command, like the real contactor chain. The page keys
/// `force_faults` and `force_estop` inject faults for tests.
#[derive(Debug)]
pub struct SimBattery {
    uid: String,
    dt_s: f64,
    state: BatteryBlock,
    last: FleetSnapshot,
    page: FieldPage,
    actions: ActionLog,
}

impl SimBattery {
    /// New bank at 50% SoC; `dt_s` is the scan interval in seconds.
    pub fn new(uid: impl Into<String>, dt_s: f64) -> Self {
        let state = BatteryBlock {
            soc_pct: 50.0,
            soh_pct: 98.0,
            bus_voltage_v: BUS_BASE_V + 0.5 * BUS_SPAN_V,
            charge_limit_kw: PACK_RATED_KW,
            discharge_limit_kw: PACK_RATED_KW,
            ..BatteryBlock::default()
        };
        Self {
            uid: uid.into(),
            dt_s,
            state,
            last: FleetSnapshot::new(),
            page: FieldPage::new(),
            actions: ActionLog::default(),
        }
    }

    /// Preset the starting state of charge.
    pub fn with_soc(mut self, soc_pct: f64) -> Self {
        self.state.soc_pct = soc_pct.clamp(0.0, 100.0);
        self.state.bus_voltage_v = BUS_BASE_V + self.state.soc_pct / 100.0 * BUS_SPAN_V;
        self
    }

    fn commanded_enable(&self) -> bool {
        match self.last.record(&self.uid).map(|record| &record.data) {
            Some(ModuleData::Battery(block)) => block.enable_cmd,
            _ => false,
        }
    }
}

/// BMS power limit taper: full rating down to zero over the last ten points.
fn limit_taper(headroom_pct: f64) -> f64 {
    PACK_RATED_KW * (headroom_pct / 10.0).clamp(0.0, 1.0)
}

impl DeviceActor for SimBattery {
    fn info(&self) -> ActorInfo {
        ActorInfo {
            uid: self.uid.clone(),
            kind: ModuleKind::Battery,
            manufacturer: "Renra Energy".to_owned(),
            model: "simulated battery rack".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    fn status(&self) -> ActorStatus {
        ActorStatus {
            heartbeat: self.state.heartbeat,
            warnings: self.state.warnings,
            alarms: self.state.alarms,
            faults: self.state.faults,
            state_text: format!("soc {:.1}%", self.state.soc_pct),
            recent_actions: self.actions.snapshot(),
        }
    }

    fn set_inputs(&mut self, snapshot: FleetSnapshot, page: FieldPage) {
        self.last = snapshot;
        self.page = page;
    }

    fn sync(&mut self) {
        let supply = self
            .last
            .digital_io()
            .map(|io| io.output_closed(RMSC_RELAY_BIT))
            .unwrap_or(true);
        let enable_cmd = self.commanded_enable();
        let inverter_kw = self
            .last
            .inverter()
            .map(|inverter| inverter.active_power_kw)
            .unwrap_or(0.0);
        let forced_faults = self
            .page
            .get("force_faults")
            .and_then(FieldValue::as_i64)
            .unwrap_or(0) as u16;
        let forced_estop = self
            .page
            .get("force_estop")
            .and_then(FieldValue::as_bool)
            .unwrap_or(false);

        self.state.faults = forced_faults;
        self.state.estop_active = forced_estop;
        self.state.rmsc_power_on = supply;
        self.state.enable_cmd = enable_cmd;
        self.state.enabled =
            supply && enable_cmd && !self.state.estop_active && self.state.faults == 0;

        if self.state.enabled {
            let delta_pct = inverter_kw * self.dt_s / 3600.0 / PACK_CAPACITY_KWH * 100.0;
            self.state.soc_pct = (self.state.soc_pct - delta_pct).clamp(0.0, 100.0);
            self.state.bus_power_kw = inverter_kw;
        } else {
            self.state.bus_power_kw = 0.0;
        }

        self.state.bus_voltage_v = BUS_BASE_V + self.state.soc_pct / 100.0 * BUS_SPAN_V;
        self.state.bus_current_a = self.state.bus_power_kw * 1000.0 / self.state.bus_voltage_v;
        self.state.charge_limit_kw = limit_taper(100.0 - self.state.soc_pct);
        self.state.discharge_limit_kw = limit_taper(self.state.soc_pct);
        self.state.heartbeat = self.state.heartbeat.wrapping_add(1);
    }

    fn outputs(&self) -> FleetSnapshot {
        let mut snapshot = FleetSnapshot::new();
        snapshot.insert(DeviceRecord::new(
            self.uid.clone(),
            ModuleData::Battery(self.state.clone()),
        ));
        snapshot
    }

    fn page(&self) -> FieldPage {
        self.page.clone()
    }

    fn set_page(&mut self, fields: FieldPage) {
        let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        self.actions
            .record(UserAction::now("set_page", keys.join(", ")));
        for (key, value) in fields {
            self.page.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_bess_fleet::{DigitalIoBlock, InverterBlock};

    fn world(relay_closed: bool, enable_cmd: bool, inverter_kw: f64) -> FleetSnapshot {
        let mut snapshot = FleetSnapshot::new();
        snapshot.insert(DeviceRecord::new(
            "bat1",
            ModuleData::Battery(BatteryBlock {
                enable_cmd,
                ..BatteryBlock::default()
            }),
        ));
        let mut io = DigitalIoBlock::default();
        io.command_output(RMSC_RELAY_BIT, relay_closed);
        io.outputs = io.output_cmd;
        snapshot.insert(DeviceRecord::new("io1", ModuleData::DigitalIo(io)));
        snapshot.insert(DeviceRecord::new(
            "inv1",
            ModuleData::Inverter(InverterBlock {
                active_power_kw: inverter_kw,
                ..InverterBlock::default()
            }),
        ));
        snapshot
    }

    #[test]
    fn contactors_need_the_rack_supply() {
        let mut battery = SimBattery::new("bat1", 1.0);
        battery.set_inputs(world(false, true, 0.0), FieldPage::new());
        battery.sync();
        assert!(!battery.state.rmsc_power_on);
        assert!(!battery.state.enabled);

        battery.set_inputs(world(true, true, 0.0), FieldPage::new());
        battery.sync();
        assert!(battery.state.rmsc_power_on);
        assert!(battery.state.enabled);
    }

    #[test]
    fn charging_raises_soc_and_discharging_drains_it() {
        // One-hour steps keep the arithmetic visible: 21.5 kWh is 10 points.
        let mut battery = SimBattery::new("bat1", 3600.0);
        battery.set_inputs(world(true, true, -21.5), FieldPage::new());
        battery.sync();
        assert!((battery.state.soc_pct - 60.0).abs() < 1e-9);
        assert_eq!(battery.state.bus_power_kw, -21.5);
        assert!(battery.state.bus_current_a < 0.0);

        battery.set_inputs(world(true, true, 43.0), FieldPage::new());
        battery.sync();
        assert!((battery.state.soc_pct - 40.0).abs() < 1e-9);
    }

    #[test]
    fn soc_saturates_and_the_charge_limit_tapers_out() {
        let mut battery = SimBattery::new("bat1", 3600.0).with_soc(99.0);
        for _ in 0..5 {
            battery.set_inputs(world(true, true, -100.0), FieldPage::new());
            battery.sync();
        }
        assert_eq!(battery.state.soc_pct, 100.0);
        assert_eq!(battery.state.charge_limit_kw, 0.0);
        assert_eq!(battery.state.discharge_limit_kw, PACK_RATED_KW);
    }

    #[test]
    fn forced_faults_open_the_contactors() {
        let mut battery = SimBattery::new("bat1", 1.0);
        let mut page = FieldPage::new();
        page.insert("force_faults".to_owned(), FieldValue::from(0x0004i64));
        battery.set_inputs(world(true, true, 0.0), page);
        battery.sync();
        assert_eq!(battery.state.faults, 0x0004);
        assert!(!battery.state.enabled);
        assert_eq!(battery.status().faults, 0x0004);
    }

    #[test]
    fn outputs_carry_only_the_bank_record() {
        let mut battery = SimBattery::new("bat1", 1.0);
        battery.set_inputs(world(true, true, 0.0), FieldPage::new());
        battery.sync();
        let outputs = battery.outputs();
        assert_eq!(outputs.len(), 1);
        assert!(outputs.record("bat1").is_some());
        assert_eq!(outputs.battery().map(|block| block.heartbeat), Some(1));
    }
}

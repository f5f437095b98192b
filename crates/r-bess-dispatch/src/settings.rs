//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Dispatch arbitration and startup sequencing for the site battery."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//!
//! Settings arrive as a loosely typed [`FieldPage`] and are re-parsed at the
//! top of every scan cycle, so mid-run edits take effect on the next tick.
//! A missing or malformed key never aborts the cycle: the policy that needed
//! it simply reads as inactive for that cycle.

use chrono::NaiveTime;
use r_bess_common::{FieldPage, FieldValue};
use r_bess_fleet::BatteryBlock;

use crate::command::CommandBounds;
use crate::window::{DispatchWindow, WindowFamily};

/// Which battery measurement the charge and discharge thresholds compare
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChargeMode {
    /// Thresholds are state-of-charge percentages.
    #[default]
    Soc,
    /// Thresholds are DC bus voltages.
    Voltage,
}

impl ChargeMode {
    fn parse(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "voltage" => ChargeMode::Voltage,
            _ => ChargeMode::Soc,
        }
    }
}

/// Generator coordination settings, grouped off the main page.
#[derive(Debug, Clone, Default)]
pub struct GeneratorSettings {
    /// Master enable for generator-backed charging.
    pub enabled: bool,
    /// Daytime coordination window.
    pub day: Option<(NaiveTime, NaiveTime)>,
    /// Night coordination window; its floor is the emergency floor.
    pub night: Option<(NaiveTime, NaiveTime)>,
    /// Daytime start floor, state-of-charge percent.
    pub floor_soc: Option<f64>,
    /// Daytime start floor, bus volts.
    pub floor_voltage: Option<f64>,
    /// Night (emergency) start floor, state-of-charge percent.
    pub night_floor_soc: Option<f64>,
    /// Night (emergency) start floor, bus volts.
    pub night_floor_voltage: Option<f64>,
    /// Charge ceiling, state-of-charge percent.
    pub ceiling_soc: Option<f64>,
    /// Charge ceiling, bus volts.
    pub ceiling_voltage: Option<f64>,
    /// Max-load ramp step per cycle, percent.
    pub load_ramp_pct: f64,
}

/// A start floor resolved for the current time of day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorFloor {
    /// Threshold in the unit selected by [`ChargeMode`].
    pub threshold: f64,
    /// True when the night (emergency) floor applies.
    pub emergency: bool,
}

impl GeneratorSettings {
    fn in_window(window: Option<(NaiveTime, NaiveTime)>, now: NaiveTime) -> bool {
        let Some((start, end)) = window else {
            return false;
        };
        if start == end {
            return false;
        }
        if start < end {
            now >= start && now < end
        } else {
            now >= start || now < end
        }
    }

    /// The start floor in force at `now`, if any window covers it.
    pub fn floor_at(&self, now: NaiveTime, mode: ChargeMode) -> Option<GeneratorFloor> {
        if Self::in_window(self.day, now) {
            let threshold = match mode {
                ChargeMode::Soc => self.floor_soc?,
                ChargeMode::Voltage => self.floor_voltage?,
            };
            return Some(GeneratorFloor {
                threshold,
                emergency: false,
            });
        }
        if Self::in_window(self.night, now) {
            let threshold = match mode {
                ChargeMode::Soc => self.night_floor_soc?,
                ChargeMode::Voltage => self.night_floor_voltage?,
            };
            return Some(GeneratorFloor {
                threshold,
                emergency: true,
            });
        }
        None
    }

    /// The charge ceiling for the selected mode.
    pub fn ceiling(&self, mode: ChargeMode) -> Option<f64> {
        match mode {
            ChargeMode::Soc => self.ceiling_soc,
            ChargeMode::Voltage => self.ceiling_voltage,
        }
    }
}

/// Everything the dispatch cycle reads from the settings page, parsed once
/// per cycle.
#[derive(Debug, Clone, Default)]
pub struct DispatchSettings {
    /// Operator request to run the system.
    pub system_enable: bool,
    /// Ramp quantum for the power command, kW per cycle.
    pub ramp_rate_kw: f64,
    /// Battery charge power bound, kW.
    pub max_charge_kw: f64,
    /// Battery discharge power bound, kW.
    pub max_discharge_kw: f64,
    /// Optional grid import restriction, kW.
    pub import_limit_kw: Option<f64>,
    /// Optional grid export restriction, kW.
    pub export_limit_kw: Option<f64>,
    /// Unit the battery thresholds are expressed in.
    pub charge_mode: ChargeMode,
    /// Charge-complete threshold, percent.
    pub max_charge_soc: Option<f64>,
    /// Charge-complete threshold, volts.
    pub max_charge_voltage: Option<f64>,
    /// Discharge floor, percent.
    pub min_discharge_soc: Option<f64>,
    /// Discharge floor, volts.
    pub min_discharge_voltage: Option<f64>,
    /// Time-of-use charge windows.
    pub tou: WindowFamily,
    /// Peak-shave windows.
    pub peak: WindowFamily,
    /// Solar-surplus charge window.
    pub solar: Option<DispatchWindow>,
    /// Generator coordination group.
    pub generator: GeneratorSettings,
    /// Selected site policy, if any.
    pub site_id: Option<String>,
    /// Source-selection relay mask for multi-source sites.
    pub source_select_mask: u16,
    /// PV optimizer endpoint for multi-source sites.
    pub optimizer_url: Option<String>,
}

fn get_f64(page: &FieldPage, key: &str) -> Option<f64> {
    page.get(key).and_then(FieldValue::as_f64)
}

fn get_bool(page: &FieldPage, key: &str) -> Option<bool> {
    page.get(key).and_then(FieldValue::as_bool)
}

fn get_time(page: &FieldPage, key: &str) -> Option<NaiveTime> {
    page.get(key).and_then(FieldValue::as_time)
}

fn get_text(page: &FieldPage, key: &str) -> Option<String> {
    page.get(key)
        .and_then(FieldValue::as_text)
        .map(str::to_owned)
}

/// Parses one `<prefix>{n}_*` window group. The window exists only when the
/// limit and both times parse; the enable key defaults to off.
fn window_group(page: &FieldPage, prefix: &str) -> Option<DispatchWindow> {
    let limit_kw = get_f64(page, &format!("{prefix}_limit_kw"))?;
    let start = get_time(page, &format!("{prefix}_start"))?;
    let end = get_time(page, &format!("{prefix}_end"))?;
    let enabled = get_bool(page, &format!("{prefix}_enable")).unwrap_or(false);
    Some(DispatchWindow {
        enabled,
        limit_kw,
        start,
        end,
    })
}

fn window_family(page: &FieldPage, prefix: &str, count: usize) -> WindowFamily {
    let windows = (1..=count)
        .filter_map(|n| window_group(page, &format!("{prefix}{n}")))
        .collect();
    WindowFamily::new(windows)
}

impl DispatchSettings {
    /// Number of numbered windows per family on the settings page.
    pub const WINDOWS_PER_FAMILY: usize = 3;

    /// Parses the settings page. Never fails; absent keys fall back to the
    /// inert defaults documented on each field.
    pub fn from_page(page: &FieldPage) -> Self {
        let generator = GeneratorSettings {
            enabled: get_bool(page, "gen_enable").unwrap_or(false),
            day: get_time(page, "gen_day_start").zip(get_time(page, "gen_day_end")),
            night: get_time(page, "gen_night_start").zip(get_time(page, "gen_night_end")),
            floor_soc: get_f64(page, "gen_floor_soc"),
            floor_voltage: get_f64(page, "gen_floor_voltage"),
            night_floor_soc: get_f64(page, "gen_night_floor_soc"),
            night_floor_voltage: get_f64(page, "gen_night_floor_voltage"),
            ceiling_soc: get_f64(page, "gen_ceiling_soc"),
            ceiling_voltage: get_f64(page, "gen_ceiling_voltage"),
            load_ramp_pct: get_f64(page, "gen_load_ramp_pct").unwrap_or(1.0),
        };

        Self {
            system_enable: get_bool(page, "system_enable").unwrap_or(false),
            ramp_rate_kw: get_f64(page, "ramp_rate_kw").unwrap_or(1.0),
            max_charge_kw: get_f64(page, "max_charge_kw").unwrap_or(0.0),
            max_discharge_kw: get_f64(page, "max_discharge_kw").unwrap_or(0.0),
            import_limit_kw: get_f64(page, "import_limit_kw"),
            export_limit_kw: get_f64(page, "export_limit_kw"),
            charge_mode: get_text(page, "charge_mode")
                .map(|t| ChargeMode::parse(&t))
                .unwrap_or_default(),
            max_charge_soc: get_f64(page, "max_charge_soc"),
            max_charge_voltage: get_f64(page, "max_charge_voltage"),
            min_discharge_soc: get_f64(page, "min_discharge_soc"),
            min_discharge_voltage: get_f64(page, "min_discharge_voltage"),
            tou: window_family(page, "tou", Self::WINDOWS_PER_FAMILY),
            peak: window_family(page, "peak", Self::WINDOWS_PER_FAMILY),
            solar: window_group(page, "solar"),
            generator,
            site_id: get_text(page, "site_id"),
            source_select_mask: page
                .get("source_select_mask")
                .and_then(FieldValue::as_i64)
                .map(|v| v as u16)
                .unwrap_or(0),
            optimizer_url: get_text(page, "optimizer_url"),
        }
    }

    /// Command bounds derived from the page.
    pub fn bounds(&self) -> CommandBounds {
        CommandBounds {
            ramp_rate_kw: self.ramp_rate_kw,
            max_charge_kw: self.max_charge_kw,
            max_discharge_kw: self.max_discharge_kw,
            import_limit_kw: self.import_limit_kw,
            export_limit_kw: self.export_limit_kw,
        }
    }

    /// Whether the battery has reached the charge-complete threshold.
    ///
    /// `None` when the threshold for the selected mode is not configured,
    /// which renders the charge policies inactive.
    pub fn charge_target_met(&self, battery: &BatteryBlock) -> Option<bool> {
        match self.charge_mode {
            ChargeMode::Soc => self.max_charge_soc.map(|th| battery.soc_pct >= th),
            ChargeMode::Voltage => self
                .max_charge_voltage
                .map(|th| battery.bus_voltage_v >= th),
        }
    }

    /// Whether the battery sits below the discharge floor.
    ///
    /// The floor itself still counts as dischargeable; only readings
    /// strictly below it suppress discharge.
    pub fn below_min_discharge(&self, battery: &BatteryBlock) -> Option<bool> {
        match self.charge_mode {
            ChargeMode::Soc => self.min_discharge_soc.map(|th| battery.soc_pct < th),
            ChargeMode::Voltage => self
                .min_discharge_voltage
                .map(|th| battery.bus_voltage_v < th),
        }
    }
}

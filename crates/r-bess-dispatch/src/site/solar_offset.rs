//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Dispatch arbitration and startup sequencing for the site battery."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

use crate::command::{CommandBounds, PowerCommand};
use crate::inputs::DispatchInputs;
use crate::site::SitePolicy;
use crate::Result;

/// Solar readings closer than this to the last acted-on value are treated
/// as unchanged, in kW.
const REACT_EPSILON_KW: f64 = 0.05;

/// Remaining distance inside this band counts as on-target, in kW.
const DEADBAND_KW: f64 = 0.5;

/// Charges at the rate a bridged solar reading reports, so the battery
/// absorbs site generation the grid meter never sees.
///
/// Same react-on-change shape as [`super::AmbientLoadFollow`]; the bridged
/// reading arrives over a slow building-automation link.
#[derive(Debug, Default)]
pub struct SolarOffsetFollow {
    last_solar_kw: Option<f64>,
}

impl SitePolicy for SolarOffsetFollow {
    fn id(&self) -> &'static str {
        "solar_offset"
    }

    fn evaluate(
        &mut self,
        inputs: &DispatchInputs<'_>,
        command: &mut PowerCommand,
        bounds: &CommandBounds,
        claimed: bool,
    ) -> Result<Option<f64>> {
        if claimed {
            return Ok(None);
        }
        let Some(solar) = inputs.ac_solar() else {
            self.last_solar_kw = None;
            return Ok(None);
        };
        if !solar.power_kw.is_finite() {
            return Err(crate::DispatchError::NonFinite {
                context: "bridged solar reading",
            });
        }
        let solar_kw = solar.power_kw.max(0.0);
        let changed = self
            .last_solar_kw
            .map_or(true, |last| (last - solar_kw).abs() > REACT_EPSILON_KW);
        if !changed {
            return Ok(Some(command.kw()));
        }
        self.last_solar_kw = Some(solar_kw);
        let target = -solar_kw;
        if (command.kw() - target).abs() <= DEADBAND_KW {
            return Ok(Some(command.kw()));
        }
        command.ramp_toward(target, bounds);
        Ok(Some(target))
    }
}

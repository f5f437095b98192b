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
//! Sites with switchable grid, PV, and battery feeds select sources through
//! a relay mask and steer an external PV optimizer over HTTP. The policy
//! overrides priority: it runs every cycle for its side effects but never
//! touches the power command, so the one-mutation rule holds.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::command::{CommandBounds, PowerCommand};
use crate::inputs::DispatchInputs;
use crate::site::SitePolicy;
use crate::Result;

/// Digital output bit feeding the grid source relay.
pub const SOURCE_GRID_BIT: u16 = 1;
/// Digital output bit feeding the PV source relay.
pub const SOURCE_PV_BIT: u16 = 2;
/// Digital output bit feeding the battery source relay.
pub const SOURCE_BATTERY_BIT: u16 = 3;

/// Optimizer requests time out after this long.
const OPTIMIZER_TIMEOUT: Duration = Duration::from_secs(2);

/// Target-current changes below this are not worth a request, in amps.
const CURRENT_DEADBAND_A: f64 = 0.5;

/// Charge power to PV string current, measured on the reference site.
/// Linear interpolation between points, clamped at the ends.
const POWER_TO_CURRENT_A: [(f64, f64); 6] = [
    (0.0, 0.0),
    (5.0, 8.0),
    (10.0, 16.0),
    (20.0, 31.0),
    (40.0, 60.0),
    (80.0, 115.0),
];

pub(crate) fn current_for_power(power_kw: f64) -> f64 {
    let table = &POWER_TO_CURRENT_A;
    let power = power_kw.max(0.0);
    if power <= table[0].0 {
        return table[0].1;
    }
    for pair in table.windows(2) {
        let (p0, c0) = pair[0];
        let (p1, c1) = pair[1];
        if power <= p1 {
            let frac = (power - p0) / (p1 - p0);
            return c0 + frac * (c1 - c0);
        }
    }
    table[table.len() - 1].1
}

/// Bridges source selection and the external PV optimizer.
pub struct MultiSourceBridge {
    http: Option<reqwest::Client>,
    pending_relays: Vec<(u16, bool)>,
    last_sent_a: Option<f64>,
    in_flight: Option<oneshot::Receiver<std::result::Result<(), String>>>,
}

impl MultiSourceBridge {
    /// Builds the bridge with its dedicated short-timeout HTTP client.
    pub fn new() -> Self {
        let http = match reqwest::Client::builder().timeout(OPTIMIZER_TIMEOUT).build() {
            Ok(client) => Some(client),
            Err(err) => {
                warn!(error = %err, "optimizer http client unavailable");
                None
            }
        };
        Self {
            http,
            pending_relays: Vec::new(),
            last_sent_a: None,
            in_flight: None,
        }
    }

    fn poll_in_flight(&mut self) {
        let Some(mut rx) = self.in_flight.take() else {
            return;
        };
        match rx.try_recv() {
            Ok(Ok(())) => debug!("optimizer target applied"),
            Ok(Err(err)) => {
                // Keep whatever the optimizer last applied; clearing the
                // sent value retries on the next cycle.
                warn!(error = %err, "optimizer request failed, holding last target");
                self.last_sent_a = None;
            }
            Err(oneshot::error::TryRecvError::Empty) => {
                self.in_flight = Some(rx);
            }
            Err(oneshot::error::TryRecvError::Closed) => {
                warn!("optimizer request task dropped");
                self.last_sent_a = None;
            }
        }
    }

    fn push_target(&mut self, url: &str, target_a: f64) {
        let Some(http) = self.http.clone() else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        self.in_flight = Some(rx);
        self.last_sent_a = Some(target_a);
        let url = url.to_owned();
        tokio::spawn(async move {
            let outcome = http
                .post(&url)
                .json(&serde_json::json!({ "target_current_a": target_a }))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map(|_| ())
                .map_err(|err| err.to_string());
            let _ = tx.send(outcome);
        });
        debug!(target_a, "optimizer target sent");
    }
}

impl Default for MultiSourceBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SitePolicy for MultiSourceBridge {
    fn id(&self) -> &'static str {
        "multi_source"
    }

    fn overrides_priority(&self) -> bool {
        true
    }

    fn evaluate(
        &mut self,
        inputs: &DispatchInputs<'_>,
        command: &mut PowerCommand,
        _bounds: &CommandBounds,
        _claimed: bool,
    ) -> Result<Option<f64>> {
        let mask = inputs.settings.source_select_mask;
        self.pending_relays = vec![
            (SOURCE_GRID_BIT, mask & 0b001 != 0),
            (SOURCE_PV_BIT, mask & 0b010 != 0),
            (SOURCE_BATTERY_BIT, mask & 0b100 != 0),
        ];

        self.poll_in_flight();
        if let Some(url) = inputs.settings.optimizer_url.as_deref() {
            let charge_kw = (-command.kw()).max(0.0);
            let target_a = current_for_power(charge_kw);
            let resend = self
                .last_sent_a
                .map_or(true, |sent| (sent - target_a).abs() > CURRENT_DEADBAND_A);
            if resend && self.in_flight.is_none() {
                self.push_target(url, target_a);
            }
        }
        Ok(None)
    }

    fn relay_requests(&mut self) -> Vec<(u16, bool)> {
        std::mem::take(&mut self.pending_relays)
    }
}

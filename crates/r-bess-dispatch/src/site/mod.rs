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
//! Sites with bespoke behavior select one policy by id on the settings
//! page. The selected policy runs on the lowest rung of the arbitration
//! ladder unless it overrides priority, in which case it is evaluated every
//! cycle for its side effects and only claims the command on otherwise idle
//! cycles.

mod load_follow;
mod multi_source;
mod solar_offset;

pub use load_follow::AmbientLoadFollow;
pub use multi_source::{MultiSourceBridge, SOURCE_BATTERY_BIT, SOURCE_GRID_BIT, SOURCE_PV_BIT};
pub use solar_offset::SolarOffsetFollow;

use indexmap::IndexMap;
use tracing::debug;

use crate::command::{CommandBounds, PowerCommand};
use crate::inputs::DispatchInputs;
use crate::Result;

/// A site-specific dispatch behavior.
pub trait SitePolicy: Send {
    /// Stable id the settings page selects this policy by.
    fn id(&self) -> &'static str;

    /// Whether the policy runs every cycle, even when a higher rung already
    /// claimed the command.
    fn overrides_priority(&self) -> bool {
        false
    }

    /// Runs one cycle. `claimed` is true when a higher rung already mutated
    /// the command; a policy must not move the command in that case and
    /// should return `Ok(None)`.
    fn evaluate(
        &mut self,
        inputs: &DispatchInputs<'_>,
        command: &mut PowerCommand,
        bounds: &CommandBounds,
        claimed: bool,
    ) -> Result<Option<f64>>;

    /// Relay commands the policy wants applied this cycle, as
    /// `(output bit, closed)` pairs. Drained by the client after
    /// arbitration.
    fn relay_requests(&mut self) -> Vec<(u16, bool)> {
        Vec::new()
    }
}

/// Registered site policies, looked up by id each cycle.
pub struct SiteRegistry {
    policies: IndexMap<&'static str, Box<dyn SitePolicy>>,
}

impl SiteRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            policies: IndexMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in site policies.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(AmbientLoadFollow::default()));
        registry.register(Box::new(SolarOffsetFollow::default()));
        registry.register(Box::new(MultiSourceBridge::new()));
        registry
    }

    /// Adds or replaces a policy under its own id.
    pub fn register(&mut self, policy: Box<dyn SitePolicy>) {
        self.policies.insert(policy.id(), policy);
    }

    /// Registered policy ids, in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.policies.keys().copied()
    }

    /// Evaluates the policy selected on the settings page, if any.
    ///
    /// An unselected or unknown id disables the layer for the cycle. A
    /// non-override policy is skipped entirely when the cycle is already
    /// claimed.
    pub fn evaluate(
        &mut self,
        inputs: &DispatchInputs<'_>,
        command: &mut PowerCommand,
        bounds: &CommandBounds,
        claimed: bool,
    ) -> Result<Option<f64>> {
        let Some(site_id) = inputs.settings.site_id.as_deref() else {
            return Ok(None);
        };
        let Some(policy) = self.policies.get_mut(site_id) else {
            debug!(site_id, "no site policy registered under id, layer disabled");
            return Ok(None);
        };
        if claimed && !policy.overrides_priority() {
            return Ok(None);
        }
        policy.evaluate(inputs, command, bounds, claimed)
    }

    /// Drains pending relay requests from the selected policy.
    pub fn relay_requests(&mut self, site_id: Option<&str>) -> Vec<(u16, bool)> {
        site_id
            .and_then(|id| self.policies.get_mut(id))
            .map(|policy| policy.relay_requests())
            .unwrap_or_default()
    }
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

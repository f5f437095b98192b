//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Dispatch arbitration and startup sequencing for the site battery."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

use chrono::NaiveTime;

/// One configured dispatch window with an associated power limit.
///
/// Windows are half-open `[start, end)`. A window whose end is at or before
/// its start wraps past midnight; a zero-length window never matches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchWindow {
    /// Operator enable for this window.
    pub enabled: bool,
    /// Power limit the policy applies while the window is active, in kW.
    pub limit_kw: f64,
    /// Start of day time, site-local.
    pub start: NaiveTime,
    /// End of day time, site-local.
    pub end: NaiveTime,
}

impl DispatchWindow {
    /// Whether `now` falls inside the window.
    ///
    /// Pure function of the clock and the stored bounds; callers re-derive
    /// this every cycle rather than latching it.
    pub fn is_active(&self, now: NaiveTime) -> bool {
        if !self.enabled || self.start == self.end {
            return false;
        }
        if self.start < self.end {
            now >= self.start && now < self.end
        } else {
            // Overnight wrap, e.g. 22:00 -> 06:00.
            now >= self.start || now < self.end
        }
    }
}

/// An ordered family of windows serving one policy (TOU charge, peak shave).
#[derive(Debug, Clone, Default)]
pub struct WindowFamily {
    windows: Vec<DispatchWindow>,
}

impl WindowFamily {
    /// Builds a family from the windows that parsed as well-formed.
    pub fn new(windows: Vec<DispatchWindow>) -> Self {
        Self { windows }
    }

    /// All configured windows, in page order.
    pub fn windows(&self) -> &[DispatchWindow] {
        &self.windows
    }

    /// The limit in force at `now`, if any window is active.
    ///
    /// Overlapping windows resolve to the most restrictive (lowest) limit.
    pub fn effective_limit(&self, now: NaiveTime) -> Option<f64> {
        self.windows
            .iter()
            .filter(|w| w.is_active(now))
            .map(|w| w.limit_kw)
            .fold(None, |acc, limit| match acc {
                Some(best) if best <= limit => Some(best),
                _ => Some(limit),
            })
    }

    /// Whether any window in the family is active at `now`.
    pub fn any_active(&self, now: NaiveTime) -> bool {
        self.windows.iter().any(|w| w.is_active(now))
    }
}

//! Connection configuration (spec §6, §11.3). Builder-style, matching the
//! teacher's `RuntimeConfig`/`WorkOrderBuilder` construction idiom.

use std::time::Duration;

/// Tunables for a single connection's worker cadence and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Fallback refresh/publish period when no monitor specifies one.
    /// Spec §6 default: 0.1s.
    pub default_update: Duration,
    /// How often INPUT polls the transport. Spec §6 default: 2s.
    pub incoming_update_period: Duration,
    /// How often OUTPUT drains and publishes, absent a narrower monitor
    /// period. `None` means "derive from `min(monitor periods)`, else
    /// `default_update`" at connection start.
    pub outgoing_update_period: Option<Duration>,
    /// Print `READY` on the first successful outgoing tick.
    pub indicate_start: bool,
    /// 0 = silent, higher numbers enable progressively more `debug!` spans.
    pub verbosity: u8,
    /// ACCOUNTING warns (never kills) when a submitted callable runs past
    /// this threshold without completing.
    pub long_task_warn_after: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            default_update: Duration::from_millis(100),
            incoming_update_period: Duration::from_secs(2),
            outgoing_update_period: None,
            indicate_start: false,
            verbosity: 0,
            long_task_warn_after: Duration::from_secs(5),
        }
    }
}

impl ConnectionConfig {
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Resolves the effective outgoing period given the currently active
    /// monitors' update periods (spec §6: "default = min of monitor
    /// periods, else `default_update`").
    pub fn effective_outgoing_period(&self, monitor_periods: impl Iterator<Item = Duration>) -> Duration {
        if let Some(fixed) = self.outgoing_update_period {
            return fixed;
        }
        monitor_periods.min().unwrap_or(self.default_update)
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn default_update(mut self, period: Duration) -> Self {
        self.config.default_update = period;
        self
    }

    pub fn incoming_update_period(mut self, period: Duration) -> Self {
        self.config.incoming_update_period = period;
        self
    }

    pub fn outgoing_update_period(mut self, period: Duration) -> Self {
        self.config.outgoing_update_period = Some(period);
        self
    }

    pub fn indicate_start(mut self, on: bool) -> Self {
        self.config.indicate_start = on;
        self
    }

    pub fn verbosity(mut self, level: u8) -> Self {
        self.config.verbosity = level;
        self
    }

    pub fn long_task_warn_after(mut self, threshold: Duration) -> Self {
        self.config.long_task_warn_after = threshold;
        self
    }

    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_section_6() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.incoming_update_period, Duration::from_secs(2));
        assert_eq!(cfg.default_update, Duration::from_millis(100));
        assert_eq!(cfg.outgoing_update_period, None);
    }

    #[test]
    fn effective_outgoing_period_prefers_explicit_override() {
        let cfg = ConnectionConfig::builder().outgoing_update_period(Duration::from_secs(9)).build();
        let periods = vec![Duration::from_millis(50)].into_iter();
        assert_eq!(cfg.effective_outgoing_period(periods), Duration::from_secs(9));
    }

    #[test]
    fn effective_outgoing_period_takes_min_of_monitors() {
        let cfg = ConnectionConfig::default();
        let periods = vec![Duration::from_millis(500), Duration::from_millis(50)].into_iter();
        assert_eq!(cfg.effective_outgoing_period(periods), Duration::from_millis(50));
    }

    #[test]
    fn effective_outgoing_period_falls_back_to_default_update() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.effective_outgoing_period(std::iter::empty()), Duration::from_millis(100));
    }
}

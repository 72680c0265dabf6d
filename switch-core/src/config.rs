// Copyright 2024 Oxide Computer Company

/// Declarative construction parameters for a [`crate::switch::Switch`].
/// Gathers what would otherwise be scattered constructor arguments so hosts
/// and tests can assemble a switch from a single value.
#[derive(Debug, Clone)]
pub struct SwitchConfig {
    /// Highest valid port number, inclusive. Ports are `u16`; `511` is
    /// reserved as the drop sentinel and is never a valid port.
    pub max_port: u16,
    /// Number of egress worker threads. Must be at least 1.
    pub nb_egress_threads: usize,
    /// Default per-(port, priority) queue depth, applied the first time a
    /// port is observed.
    pub default_queue_depth: usize,
    /// Default per-port rate in packets per second; `0` means unlimited.
    pub default_queue_rate_pps: u32,
    /// Compile-time toggle for strict-priority egress queueing.
    pub priority_queueing_enabled: bool,
    /// Number of strict priority levels when priority queueing is enabled.
    pub nb_queues: usize,
    /// PHV field read at enqueue time to determine priority. Only consulted
    /// when `priority_queueing_enabled` is set.
    pub priority_source_field: String,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            max_port: 511,
            nb_egress_threads: 1,
            default_queue_depth: 1024,
            default_queue_rate_pps: 0,
            priority_queueing_enabled: false,
            nb_queues: 8,
            priority_source_field: "standard_metadata.priority".to_string(),
        }
    }
}

impl SwitchConfig {
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        if self.nb_egress_threads == 0 {
            return Err(crate::error::ConfigError::NoEgressThreads);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SwitchConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_egress_threads_rejected() {
        let cfg = SwitchConfig {
            nb_egress_threads: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}

use std::{default::Default, time::Duration};

use crate::constants::{DEFAULT_MTU, DEFAULT_PHYSICAL_MTU, RELAY_MAX_HOPS};

#[derive(Clone, Debug)]
/// Configuration options to tune the switching core.
pub struct Config {
    /// Number of slots in the fragment reassembly ring.
    pub reassembly_slots: usize,
    /// Age after which an incomplete reassembly is abandoned.
    pub reassembly_timeout: Duration,
    /// Minimum spacing between two WHOIS requests for the same address.
    pub whois_retry_delay: Duration,
    /// WHOIS retries before an unresolved address is abandoned.
    pub whois_max_retries: u32,
    /// Max actions parked per unresolved address (0 = unlimited).
    pub whois_max_deferred: usize,
    /// Minimum time between two rendezvous hints for the same pair of peers.
    pub unite_cooldown: Duration,
    /// Hops after which relayed packets are dropped. The wire counter holds
    /// at most 7, so larger values act as 7.
    pub relay_max_hops: u8,
    /// CoDel target sojourn time.
    pub codel_target: Duration,
    /// CoDel interval: how long sojourn must stay above target before dropping.
    pub codel_interval: Duration,
    /// Byte credit granted to a flow per scheduling round.
    pub aqm_quantum: usize,
    /// Backlog (bytes) at or below which a flow is never considered congested.
    pub aqm_min_backlog: usize,
    /// Max packets enqueued per network before the largest flow is trimmed.
    pub aqm_max_enqueued_packets: usize,
    /// Max bytes transmitted per network per dequeue pass (0 = unlimited).
    pub aqm_pass_byte_budget: usize,
    /// How long an empty flow is kept before its queue is reclaimed.
    pub aqm_flow_idle_timeout: Duration,
    /// Largest datagram handed to the transport; bigger packets are fragmented.
    pub physical_mtu: usize,
    /// Expected member keep-alive (auto-configuration) interval.
    /// A member is online if seen within twice this delay.
    pub network_autoconf_delay: Duration,
    /// Shortest delay the maintenance loop will suggest.
    pub maintenance_min_delay: Duration,
    /// Delay suggested by the maintenance loop when nothing is pending.
    pub maintenance_idle_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reassembly_slots: 32,
            reassembly_timeout: Duration::from_millis(2500), // five WHOIS retry delays
            whois_retry_delay: Duration::from_millis(500),
            whois_max_retries: 4,
            whois_max_deferred: 256,
            unite_cooldown: Duration::from_secs(30),
            relay_max_hops: RELAY_MAX_HOPS,
            codel_target: Duration::from_millis(5),
            codel_interval: Duration::from_millis(100),
            aqm_quantum: 3000,
            aqm_min_backlog: DEFAULT_MTU,
            aqm_max_enqueued_packets: 1024,
            aqm_pass_byte_budget: 0, // Unlimited: every pass drains the scheduler
            aqm_flow_idle_timeout: Duration::from_secs(5),
            physical_mtu: DEFAULT_PHYSICAL_MTU,
            network_autoconf_delay: Duration::from_secs(60),
            maintenance_min_delay: Duration::from_millis(10),
            maintenance_idle_delay: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Window within which a member counts as online.
    pub fn member_online_window(&self) -> Duration {
        self.network_autoconf_delay * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_windows() {
        let config = Config::default();
        assert_eq!(config.member_online_window(), Duration::from_secs(120));
        assert_eq!(config.whois_retry_delay * (config.whois_max_retries + 1), config.reassembly_timeout);
    }
}

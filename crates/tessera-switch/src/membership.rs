//! Member liveness and authorization notifications.
//!
//! Members of a network periodically request its configuration. A member
//! whose last request is within the online window counts as online. Status
//! changes are announced as [`SwitchEvent`]s so the node can push fresh
//! configuration or credentials.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tessera_core::{Address, NetworkId};
use tracing::{debug, error};

use crate::event_types::SwitchEvent;

/// Member counts of one network.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkSummary {
    /// Members seen at least once.
    pub total_member_count: usize,
    /// Members seen within the online window.
    pub active_member_count: usize,
    /// Most recent request from any member.
    pub most_recent_request: Option<Instant>,
}

/// Tracks when members last asked for their network configuration.
#[derive(Debug)]
pub struct MembershipTracker {
    last_request: Mutex<HashMap<(NetworkId, Address), Instant>>,
    online_window: Duration,
    events: Sender<SwitchEvent>,
}

impl MembershipTracker {
    /// Creates a tracker announcing changes on `events`.
    pub fn new(online_window: Duration, events: Sender<SwitchEvent>) -> Self {
        Self { last_request: Mutex::new(HashMap::new()), online_window, events }
    }

    /// Records a configuration request from `member`.
    ///
    /// Returns true, and emits [`SwitchEvent::MemberUpdated`], when the
    /// member was not online before this request.
    pub fn record_request(&self, network: NetworkId, member: Address, now: Instant) -> bool {
        let previous = self.last_request.lock().insert((network, member), now);
        let came_online = previous.map_or(true, |last| !self.within_window(last, now));
        if came_online {
            debug!("Member {} of network {} is online", member, network);
            self.emit(SwitchEvent::MemberUpdated { network, member });
        }
        came_online
    }

    /// True if `member` requested its configuration within the online window.
    pub fn is_online(&self, network: NetworkId, member: Address, now: Instant) -> bool {
        self.last_request.lock().get(&(network, member)).map_or(false, |last| self.within_window(*last, now))
    }

    /// Counts the members of `network`.
    pub fn summary(&self, network: NetworkId, now: Instant) -> NetworkSummary {
        let last_request = self.last_request.lock();
        let mut summary = NetworkSummary::default();
        for ((nwid, _), last) in last_request.iter() {
            if *nwid != network {
                continue;
            }
            summary.total_member_count += 1;
            if self.within_window(*last, now) {
                summary.active_member_count += 1;
            }
            summary.most_recent_request = Some(summary.most_recent_request.map_or(*last, |t| t.max(*last)));
        }
        summary
    }

    /// Forgets `member` and emits [`SwitchEvent::MemberDeauthorized`].
    pub fn deauthorize(&self, network: NetworkId, member: Address) {
        self.last_request.lock().remove(&(network, member));
        self.emit(SwitchEvent::MemberDeauthorized { network, member });
    }

    /// Emits [`SwitchEvent::NetworkUpdated`].
    pub fn network_updated(&self, network: NetworkId) {
        self.emit(SwitchEvent::NetworkUpdated(network));
    }

    /// Forgets every member of `network`.
    pub fn forget_network(&self, network: NetworkId) -> usize {
        let mut last_request = self.last_request.lock();
        let before = last_request.len();
        last_request.retain(|(nwid, _), _| *nwid != network);
        before - last_request.len()
    }

    fn within_window(&self, last: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last) < self.online_window
    }

    fn emit(&self, event: SwitchEvent) {
        if let Err(err) = self.events.send(event) {
            error!("Event receiver dropped: {}", err);
        }
    }
}

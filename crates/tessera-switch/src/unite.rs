//! Rate limiting of rendezvous hints.
//!
//! When this node relays between two peers it may suggest they try a direct
//! path. Hints for a pair are spaced at least one cooldown apart, whichever
//! direction the relayed traffic flowed.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tessera_core::Address;

/// Last rendezvous hint time per unordered pair of peers.
#[derive(Debug)]
pub struct UniteTable {
    last_unite: Mutex<HashMap<(Address, Address), Instant>>,
    cooldown: Duration,
}

impl UniteTable {
    /// Creates an empty table.
    pub fn new(cooldown: Duration) -> Self {
        Self { last_unite: Mutex::new(HashMap::new()), cooldown }
    }

    /// Returns true, and records `now`, if a hint for `{a, b}` is allowed.
    pub fn should_unite(&self, now: Instant, a: Address, b: Address) -> bool {
        let mut last_unite = self.last_unite.lock();
        let key = pair_key(a, b);
        if let Some(last) = last_unite.get(&key) {
            if now.saturating_duration_since(*last) < self.cooldown {
                return false;
            }
        }
        last_unite.insert(key, now);
        true
    }

    /// Forgets pairs whose cooldown has passed.
    pub fn expire(&self, now: Instant) -> usize {
        let mut last_unite = self.last_unite.lock();
        let before = last_unite.len();
        last_unite.retain(|_, last| now.saturating_duration_since(*last) < self.cooldown);
        before - last_unite.len()
    }

    /// Number of pairs currently cooling down.
    pub fn len(&self) -> usize {
        self.last_unite.lock().len()
    }

    /// True if no pair is cooling down.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn pair_key(a: Address, b: Address) -> (Address, Address) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

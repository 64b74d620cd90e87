//! Per-network deficit round-robin over flow queues.
//!
//! Every flow (destination, QoS class) of a network owns a [`ManagedQueue`]
//! that sits on exactly one of three lists. Queues that just became active go
//! on `new` and are served ahead of `old`, so sparse flows see low latency. A
//! queue that overspends its byte credit is topped up by one quantum and sent
//! to the back of `old`. A queue found empty moves from `new` to `old`, and
//! from `old` to `inactive`, where it waits for reuse or reclamation.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use tessera_core::Address;

use super::queue::{CoDelParams, ManagedQueue, OutboundEntry, QueueList, Verdict};

/// Identifies a flow within a network.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    /// Destination peer.
    pub destination: Address,
    /// QoS class.
    pub qos_class: u8,
}

/// Scheduling knobs shared by every block.
#[derive(Copy, Clone, Debug)]
pub struct SchedulerParams {
    /// CoDel tuning.
    pub codel: CoDelParams,
    /// Credit granted per round.
    pub quantum: usize,
    /// Enqueue ceiling per network.
    pub max_enqueued: usize,
    /// Bytes sent per network per pass, 0 for unlimited.
    pub pass_byte_budget: usize,
    /// How long an empty queue is kept.
    pub idle_timeout: Duration,
}

impl SchedulerParams {
    /// Credit granted per round, never zero so indebted queues recover.
    pub fn effective_quantum(&self) -> isize {
        self.quantum.max(1) as isize
    }
}

/// Totals from one pass over a block.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Entries handed back for transmission.
    pub sent: usize,
    /// Entries dropped by CoDel.
    pub dropped: usize,
}

/// Result of serving one queue.
#[derive(Debug)]
pub enum Serviced {
    /// The head entry is to be transmitted.
    Sent(OutboundEntry),
    /// The head entry was dropped by CoDel.
    Dropped,
    /// The queue changed lists without dequeuing.
    Moved,
    /// The list was empty.
    Exhausted,
}

/// One network's flows and scheduling lists.
#[derive(Debug, Default)]
pub struct NetworkQosBlock {
    queues: HashMap<FlowKey, ManagedQueue>,
    new_flows: VecDeque<FlowKey>,
    old_flows: VecDeque<FlowKey>,
    inactive_flows: VecDeque<FlowKey>,
    enqueued: usize,
}

impl NetworkQosBlock {
    /// Creates an empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries queued across all flows.
    pub fn enqueued(&self) -> usize {
        self.enqueued
    }

    /// Number of queues on any list.
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// True once the block holds no queues.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Returns the list `key` sits on.
    pub fn list_of(&self, key: &FlowKey) -> Option<QueueList> {
        self.queues.get(key).map(|queue| queue.list)
    }

    /// Returns a flow's queue.
    pub fn queue(&self, key: &FlowKey) -> Option<&ManagedQueue> {
        self.queues.get(key)
    }

    /// Appends an entry to its flow.
    ///
    /// A flow without a queue gets one on `new`; an inactive queue is moved
    /// back to `new`. If the block then exceeds the enqueue ceiling, the head
    /// of the largest queue is dropped and returned.
    pub fn enqueue(&mut self, key: FlowKey, entry: OutboundEntry, params: &SchedulerParams) -> Option<OutboundEntry> {
        match self.queues.get_mut(&key) {
            Some(queue) => {
                if queue.list == QueueList::Inactive {
                    queue.list = QueueList::New;
                    queue.idle_since = None;
                    remove_key(&mut self.inactive_flows, &key);
                    self.new_flows.push_back(key);
                }
                queue.push(entry);
            }
            None => {
                let mut queue = ManagedQueue::new(params.effective_quantum() as usize);
                queue.push(entry);
                self.queues.insert(key, queue);
                self.new_flows.push_back(key);
            }
        }
        self.enqueued += 1;

        if self.enqueued > params.max_enqueued {
            return self.drop_from_largest();
        }
        None
    }

    fn drop_from_largest(&mut self) -> Option<OutboundEntry> {
        let mut largest: Option<(FlowKey, usize)> = None;
        for key in self.new_flows.iter().chain(self.old_flows.iter()) {
            let length = self.queues.get(key).map_or(0, ManagedQueue::byte_length);
            if largest.map_or(true, |(_, max)| length > max) {
                largest = Some((*key, length));
            }
        }

        let (key, _) = largest?;
        let victim = self.queues.get_mut(&key)?.pop_front()?;
        self.enqueued -= 1;
        Some(victim)
    }

    /// Serves the queue at the front of `list` once.
    ///
    /// A queue out of credit is granted one quantum and rotated to the back
    /// of `old`. A queue found empty moves from `new` to `old`, or from `old`
    /// to `inactive`. Otherwise its head goes through CoDel and the queue
    /// stays in place for further service.
    pub fn service_queue(&mut self, list: QueueList, now: Instant, params: &SchedulerParams) -> Serviced {
        let front = match list {
            QueueList::New => self.new_flows.front(),
            QueueList::Old => self.old_flows.front(),
            QueueList::Inactive => None,
        };
        let Some(&key) = front else {
            return Serviced::Exhausted;
        };
        let Some(queue) = self.queues.get_mut(&key) else {
            self.pop_list(list);
            return Serviced::Moved;
        };

        if queue.byte_credit < 0 {
            queue.byte_credit += params.effective_quantum();
            queue.list = QueueList::Old;
            self.pop_list(list);
            self.old_flows.push_back(key);
            return Serviced::Moved;
        }

        match queue.dequeue(now, &params.codel) {
            Some(Verdict::Send(entry)) => {
                queue.byte_credit -= entry.size() as isize;
                self.enqueued -= 1;
                Serviced::Sent(entry)
            }
            Some(Verdict::Drop(_)) => {
                self.enqueued -= 1;
                Serviced::Dropped
            }
            None if list == QueueList::New => {
                queue.list = QueueList::Old;
                self.pop_list(list);
                self.old_flows.push_back(key);
                Serviced::Moved
            }
            None => {
                queue.list = QueueList::Inactive;
                queue.idle_since = Some(now);
                self.pop_list(list);
                self.inactive_flows.push_back(key);
                Serviced::Moved
            }
        }
    }

    /// Runs one deficit round-robin pass: `new` first, then `old`.
    ///
    /// Sent entries are appended to `out`. The pass ends when both lists are
    /// exhausted or the byte budget is spent.
    pub fn run_pass(&mut self, now: Instant, params: &SchedulerParams, out: &mut Vec<OutboundEntry>) -> PassOutcome {
        let mut outcome = PassOutcome::default();
        let mut sent_bytes = 0usize;

        for list in [QueueList::New, QueueList::Old] {
            loop {
                if params.pass_byte_budget > 0 && sent_bytes >= params.pass_byte_budget {
                    return outcome;
                }
                match self.service_queue(list, now, params) {
                    Serviced::Sent(entry) => {
                        sent_bytes += entry.size();
                        outcome.sent += 1;
                        out.push(entry);
                    }
                    Serviced::Dropped => outcome.dropped += 1,
                    Serviced::Moved => {}
                    Serviced::Exhausted => break,
                }
            }
        }

        outcome
    }

    /// Frees inactive queues idle for at least `idle_timeout`.
    pub fn reclaim_idle(&mut self, now: Instant, idle_timeout: Duration) -> usize {
        let queues = &mut self.queues;
        let before = self.inactive_flows.len();
        self.inactive_flows.retain(|key| {
            let idle = queues
                .get(key)
                .and_then(|queue| queue.idle_since)
                .map_or(true, |since| now.saturating_duration_since(since) >= idle_timeout);
            if idle {
                queues.remove(key);
            }
            !idle
        });
        before - self.inactive_flows.len()
    }

    /// Discards the queues of every flow towards `destination`.
    pub fn purge_destination(&mut self, destination: Address) -> usize {
        let keys: Vec<FlowKey> = self.queues.keys().filter(|key| key.destination == destination).copied().collect();
        let mut discarded = 0;
        for key in keys {
            if let Some(mut queue) = self.queues.remove(&key) {
                discarded += queue.clear();
            }
            remove_key(&mut self.new_flows, &key);
            remove_key(&mut self.old_flows, &key);
            remove_key(&mut self.inactive_flows, &key);
        }
        self.enqueued -= discarded;
        discarded
    }

    fn pop_list(&mut self, list: QueueList) {
        match list {
            QueueList::New => self.new_flows.pop_front(),
            QueueList::Old => self.old_flows.pop_front(),
            QueueList::Inactive => self.inactive_flows.pop_front(),
        };
    }
}

fn remove_key(list: &mut VecDeque<FlowKey>, key: &FlowKey) {
    if let Some(position) = list.iter().position(|k| k == key) {
        list.remove(position);
    }
}

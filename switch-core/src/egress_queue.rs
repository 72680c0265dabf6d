// Copyright 2024 Oxide Computer Company

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use quanta::Clock;

use crate::error::Disposition;
use crate::packet::Packet;
use crate::rate_limiter::TokenBucket;

/// Poll interval used while a popper is blocked waiting on a port's token
/// bucket to refill. The bucket refills continuously, so there is no single
/// event to wait on; a short poll keeps worst-case latency bounded without
/// busy-spinning.
const REFILL_POLL: Duration = Duration::from_micros(200);

struct PortState {
    /// Indexed by queue level; level 0 is drained first. With priority
    /// queueing disabled this has exactly one level.
    levels: Vec<VecDeque<Packet>>,
    capacity: usize,
    bucket: TokenBucket,
}

impl PortState {
    fn depth(&self) -> usize {
        self.levels.iter().map(VecDeque::len).sum()
    }
}

struct Shared {
    ports: HashMap<u16, PortState>,
    shutdown: bool,
}

/// Maps `port → priority → FIFO<Packet>`, one token bucket per port. Workers
/// are assigned a disjoint subset of ports by `port % nb_egress_threads`.
pub struct PerPortMultiQueue {
    clock: Clock,
    nb_egress_threads: usize,
    nb_queues: usize,
    priority_enabled: bool,
    default_capacity: usize,
    default_rate_pps: u32,
    state: Mutex<Shared>,
    cond: Condvar,
}

impl PerPortMultiQueue {
    pub fn new(
        nb_egress_threads: usize,
        priority_enabled: bool,
        nb_queues: usize,
        default_capacity: usize,
        default_rate_pps: u32,
    ) -> Self {
        Self {
            clock: Clock::new(),
            nb_egress_threads,
            nb_queues: if priority_enabled { nb_queues.max(1) } else { 1 },
            priority_enabled,
            default_capacity,
            default_rate_pps,
            state: Mutex::new(Shared {
                ports: HashMap::new(),
                shutdown: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// The egress worker that owns `port`, a stable function of the port
    /// number alone.
    pub fn worker_for_port(&self, port: u16) -> usize {
        port as usize % self.nb_egress_threads
    }

    fn port_state<'a>(&self, shared: &'a mut Shared, port: u16) -> &'a mut PortState {
        shared.ports.entry(port).or_insert_with(|| PortState {
            levels: (0..self.nb_queues).map(|_| VecDeque::new()).collect(),
            capacity: self.default_capacity,
            bucket: TokenBucket::new(self.clock.clone(), self.default_rate_pps),
        })
    }

    /// Aggregate depth across priority levels for `port`.
    pub fn size(&self, port: u16) -> usize {
        let mut shared = self.state.lock().unwrap();
        self.port_state(&mut shared, port).depth()
    }

    pub fn set_capacity(&self, port: u16, n: usize) {
        let mut shared = self.state.lock().unwrap();
        self.port_state(&mut shared, port).capacity = n;
        self.cond.notify_all();
    }

    /// Sets the capacity on every port observed so far. Ports that have not
    /// yet been touched still pick up `default_capacity` when first
    /// created.
    pub fn set_all_capacities(&self, n: usize) {
        let mut shared = self.state.lock().unwrap();
        for p in shared.ports.values_mut() {
            p.capacity = n;
        }
        self.cond.notify_all();
    }

    pub fn set_rate(&self, port: u16, pps: u32) {
        let mut shared = self.state.lock().unwrap();
        self.port_state(&mut shared, port).bucket.set_rate(pps);
        self.cond.notify_all();
    }

    /// Sets the rate on every port observed so far. Ports that have not yet
    /// been touched still pick up `default_rate_pps` when first created.
    pub fn set_all_rates(&self, pps: u32) {
        let mut shared = self.state.lock().unwrap();
        for p in shared.ports.values_mut() {
            p.bucket.set_rate(pps);
        }
        self.cond.notify_all();
    }

    /// Converts a PHV-level priority into the inverted queue level. Returns
    /// `None` when priority queueing is disabled or the level is out of
    /// range, in which case the caller drops the packet with a warning.
    fn queue_level(&self, priority: u32) -> Option<usize> {
        if !self.priority_enabled {
            return Some(0);
        }
        if priority as usize >= self.nb_queues {
            return None;
        }
        Some(self.nb_queues - 1 - priority as usize)
    }

    /// Enqueues `packet` at `port`/`priority`, blocking while the target
    /// queue level is at capacity. Returns `false` (and drops the packet)
    /// when `priority` is out of range for the compiled number of levels.
    pub fn push(&self, port: u16, priority: u32, packet: Packet) -> bool {
        let Some(level) = self.queue_level(priority) else {
            tracing::warn!(
                disposition = %Disposition::PriorityOutOfRange {
                    packet_id: packet.id,
                    priority,
                    nb_queues: self.nb_queues as u32,
                },
            );
            return false;
        };

        let mut shared = self.state.lock().unwrap();
        loop {
            {
                let ps = self.port_state(&mut shared, port);
                if ps.levels[level].len() < ps.capacity {
                    ps.levels[level].push_back(packet);
                    self.cond.notify_all();
                    return true;
                }
            }
            shared = self.cond.wait_timeout(shared, REFILL_POLL).unwrap().0;
            if shared.shutdown {
                return false;
            }
        }
    }

    /// Blocks until a packet is ready for `worker_id`: the owning port has a
    /// non-empty, token-admitted queue. Returns `None` once shutdown and no
    /// further packets remain for this worker.
    pub fn pop(&self, worker_id: usize) -> Option<(u16, u32, Packet)> {
        let mut shared = self.state.lock().unwrap();
        loop {
            let ports: Vec<u16> = shared
                .ports
                .keys()
                .copied()
                .filter(|p| self.worker_for_port(*p) == worker_id)
                .collect();

            for port in &ports {
                let ps = shared.ports.get_mut(port).unwrap();
                let Some(level) = ps.levels.iter().position(|q| !q.is_empty()) else {
                    continue;
                };
                if !ps.bucket.try_take() {
                    continue;
                }
                if let Some(packet) = ps.levels[level].pop_front() {
                    let priority = if self.priority_enabled {
                        (self.nb_queues - 1 - level) as u32
                    } else {
                        0
                    };
                    self.cond.notify_all();
                    return Some((*port, priority, packet));
                }
            }

            if shared.shutdown {
                return None;
            }
            shared = self.cond.wait_timeout(shared, REFILL_POLL).unwrap().0;
        }
    }

    pub fn shutdown(&self) {
        let mut shared = self.state.lock().unwrap();
        shared.shutdown = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phv::FieldCatalog;
    use std::sync::Arc;
    use std::thread;

    fn catalog() -> Arc<FieldCatalog> {
        FieldCatalog::builder().with_standard_metadata().build()
    }

    fn pkt(id: u64) -> Packet {
        Packet::new(id, 0, &[1, 2, 3], catalog())
    }

    #[test]
    fn fifo_within_a_single_priority_level() {
        let q = PerPortMultiQueue::new(1, false, 1, 16, 0);
        q.push(1, 0, pkt(1));
        q.push(1, 0, pkt(2));
        let (_, _, first) = q.pop(0).unwrap();
        assert_eq!(first.id, 1);
        let (_, _, second) = q.pop(0).unwrap();
        assert_eq!(second.id, 2);
    }

    #[test]
    fn strict_priority_drains_higher_first() {
        let q = PerPortMultiQueue::new(1, true, 4, 16, 0);
        q.push(1, 0, pkt(1)); // lowest priority
        q.push(1, 3, pkt(2)); // highest priority
        let (_, prio, first) = q.pop(0).unwrap();
        assert_eq!(first.id, 2);
        assert_eq!(prio, 3);
        let (_, _, second) = q.pop(0).unwrap();
        assert_eq!(second.id, 1);
    }

    #[test]
    fn priority_out_of_range_is_dropped() {
        let q = PerPortMultiQueue::new(1, true, 4, 16, 0);
        assert!(!q.push(1, 10, pkt(1)));
    }

    #[test]
    fn worker_assignment_is_stable_modulo_thread_count() {
        let q = PerPortMultiQueue::new(3, false, 1, 16, 0);
        assert_eq!(q.worker_for_port(0), 0);
        assert_eq!(q.worker_for_port(1), 1);
        assert_eq!(q.worker_for_port(4), 1);
    }

    #[test]
    fn shutdown_releases_blocked_popper() {
        let q = Arc::new(PerPortMultiQueue::new(1, false, 1, 16, 0));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop(0));
        thread::sleep(Duration::from_millis(5));
        q.shutdown();
        assert!(handle.join().unwrap().is_none());
    }
}

// Copyright 2024 Oxide Computer Company

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use arc_swap::ArcSwap;

use crate::clock::SwitchClock;
use crate::config::SwitchConfig;
use crate::egress_queue::PerPortMultiQueue;
use crate::error::ConfigError;
use crate::packet::Packet;
use crate::program::ForwardingProgram;
use crate::queue::BlockingQueue;
use crate::worker::{egress, ingress, transmit};

/// Signature of the host-provided transmit callback. Invoked by the
/// transmit worker; never called after that worker observes shutdown.
pub type TransmitFn = dyn Fn(u16, &[u8]) + Send + Sync;

/// State shared by every worker thread. Workers hold an `Arc<Shared>`; none
/// of it is ever torn down while a worker is still running against it.
pub(crate) struct Shared {
    pub program: ArcSwap<ForwardingProgram>,
    pub input_queue: BlockingQueue<Packet>,
    pub egress_queue: PerPortMultiQueue,
    pub output_queue: BlockingQueue<(u16, Vec<u8>)>,
    pub clock: SwitchClock,
    pub config: SwitchConfig,
    pub transmit_fn: ArcSwap<Box<TransmitFn>>,
    next_packet_id: AtomicU64,
}

impl Shared {
    pub fn next_packet_id(&self) -> u64 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// The packet lifecycle orchestration core. Construct with [`Switch::new`],
/// spawn workers with [`Switch::start_and_return`], feed packets in with
/// [`Switch::receive`]. Dropping the switch shuts every worker down in
/// order and joins them.
pub struct Switch {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Switch {
    pub fn new(
        config: SwitchConfig,
        program: ForwardingProgram,
        transmit_fn: impl Fn(u16, &[u8]) + Send + Sync + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        for field in crate::phv::STANDARD_METADATA_FIELDS {
            if !program.catalog.has_field(field.0) {
                return Err(ConfigError::MissingRequiredField(field.0));
            }
        }

        let egress_queue = PerPortMultiQueue::new(
            config.nb_egress_threads,
            config.priority_queueing_enabled,
            config.nb_queues,
            config.default_queue_depth,
            config.default_queue_rate_pps,
        );

        let shared = Arc::new(Shared {
            program: ArcSwap::from_pointee(program),
            input_queue: BlockingQueue::unbounded(),
            egress_queue,
            output_queue: BlockingQueue::unbounded(),
            clock: SwitchClock::new(),
            config,
            transmit_fn: ArcSwap::from_pointee(Box::new(transmit_fn) as Box<TransmitFn>),
            next_packet_id: AtomicU64::new(1),
        });

        Ok(Self {
            shared,
            workers: Vec::new(),
        })
    }

    /// Spawns one ingress thread, `nb_egress_threads` egress threads, and
    /// one transmit thread. Consumes and returns `self` so the caller holds
    /// the handle that owns shutdown-on-drop.
    pub fn start_and_return(mut self) -> Self {
        let shared = self.shared.clone();
        self.workers
            .push(std::thread::spawn(move || ingress::run(shared)));

        for worker_id in 0..self.shared.config.nb_egress_threads {
            let shared = self.shared.clone();
            self.workers
                .push(std::thread::spawn(move || egress::run(shared, worker_id)));
        }

        let shared = self.shared.clone();
        self.workers
            .push(std::thread::spawn(move || transmit::run(shared)));

        self
    }

    /// Accepts a packet from the host's network I/O path. Blocks if the
    /// input queue is full.
    pub fn receive(&self, ingress_port: u16, buffer: &[u8]) {
        let program = self.shared.program.load();
        let id = self.shared.next_packet_id();
        let packet = Packet::new(id, ingress_port, buffer, program.catalog.clone());
        self.shared.input_queue.push(packet);
    }

    /// Hot-swaps the compiled forwarding program. Workers observe the swap
    /// at most one packet late, never mid-pipeline.
    pub fn swap_program(&self, program: ForwardingProgram) {
        self.shared.program.store(Arc::new(program));
    }

    pub fn set_transmit_fn(&self, f: impl Fn(u16, &[u8]) + Send + Sync + 'static) {
        self.shared
            .transmit_fn
            .store(Arc::new(Box::new(f) as Box<TransmitFn>));
    }

    pub fn set_egress_queue_depth(&self, port: u16, n: usize) {
        self.shared.egress_queue.set_capacity(port, n);
    }

    pub fn set_all_egress_queue_depths(&self, n: usize) {
        self.shared.egress_queue.set_all_capacities(n);
    }

    pub fn set_egress_queue_rate(&self, port: u16, pps: u32) {
        self.shared.egress_queue.set_rate(port, pps);
    }

    pub fn set_all_egress_queue_rates(&self, pps: u32) {
        self.shared.egress_queue.set_all_rates(pps);
    }

    pub fn get_time_elapsed_us(&self) -> u64 {
        self.shared.clock.elapsed_us()
    }

    pub fn get_time_since_epoch_us(&self) -> u64 {
        self.shared.clock.since_epoch_us()
    }
}

impl Drop for Switch {
    fn drop(&mut self) {
        self.shared.input_queue.shutdown();
        self.shared.egress_queue.shutdown();
        self.shared.output_queue.shutdown();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

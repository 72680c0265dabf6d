// Copyright 2024 Oxide Computer Company

use thiserror::Error;

/// Raised at construction or program-swap time. These are caller-actionable
/// and propagate as a `Result`, unlike the per-packet dispositions in
/// [`Disposition`] which a worker thread only logs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("egress thread count must be at least 1")]
    NoEgressThreads,

    #[error("required standard_metadata field missing: {0}")]
    MissingRequiredField(&'static str),
}

/// Non-fatal dispositions a worker thread logs and moves past. None of these
/// ever surface as a `Result::Err` out of a worker thread: per the error
/// handling design, no error is fatal to the worker thread, and a packet-level
/// error drops only the offending packet.
#[derive(Error, Debug)]
pub enum Disposition {
    #[error("priority {priority} out of range (>= {nb_queues} levels), dropping packet {packet_id}")]
    PriorityOutOfRange {
        packet_id: u64,
        priority: u32,
        nb_queues: u32,
    },

    #[error("mirror id {mirror_id} unmapped, skipping clone")]
    MirroringMiss { mirror_id: u32 },

    #[error("packet {packet_id} exceeded buffer headroom while growing headers")]
    BufferHeadroomExceeded { packet_id: u64 },

    #[error("queueing metadata partially declared, leaving it disabled")]
    PartialQueueingMetadata,
}

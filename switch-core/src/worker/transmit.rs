// Copyright 2024 Oxide Computer Company

use std::sync::Arc;

use crate::switch::Shared;

/// The single transmit worker: drains the output queue and hands each
/// packet to the host-provided transmit callback. The callback is
/// authoritative; its return value, if any, is not inspected and failures
/// are not retried.
pub fn run(shared: Arc<Shared>) {
    loop {
        let Some((port, buffer)) = shared.output_queue.pop() else {
            tracing::info!("transmit worker observed shutdown");
            break;
        };
        let f = shared.transmit_fn.load();
        (**f)(port, &buffer);
    }
}

// Copyright 2024 Oxide Computer Company

use std::sync::Arc;

use crate::error::Disposition;
use crate::instance::InstanceType;
use crate::packet::{Packet, REGISTER_ORIGINAL_LENGTH};
use crate::program::ForwardingProgram;
use crate::reinject::copy_field_list_and_set_type;
use crate::switch::Shared;

use super::run_deparser;

const FIELD_EGRESS_PORT: &str = "standard_metadata.egress_port";
const FIELD_EGRESS_SPEC: &str = "standard_metadata.egress_spec";
const FIELD_PACKET_LENGTH: &str = "standard_metadata.packet_length";
const FIELD_CLONE_SPEC: &str = "standard_metadata.clone_spec";
const FIELD_RECIRC_FLAG: &str = "intrinsic_metadata.recirculate_flag";
const FIELD_QID: &str = "queueing_metadata.qid";

const DROP_PORT: i64 = 511;

/// One of `nb_egress_threads` parallel egress workers. Each owns a disjoint
/// subset of ports determined by [`crate::egress_queue::PerPortMultiQueue::worker_for_port`].
pub fn run(shared: Arc<Shared>, worker_id: usize) {
    loop {
        let Some((port, priority, mut packet)) = shared.egress_queue.pop(worker_id) else {
            tracing::info!(worker_id, "egress worker observed shutdown");
            break;
        };

        let program = shared.program.load_full();

        if program.with_queueing_metadata() {
            let enq_ts = field_uint(&packet, "queueing_metadata.enq_timestamp");
            let now = shared.clock.since_epoch_us();
            set_field(
                &mut packet,
                "queueing_metadata.deq_timedelta",
                now.saturating_sub(enq_ts),
            );
            set_field(
                &mut packet,
                "queueing_metadata.deq_qdepth",
                shared.egress_queue.size(port) as u64,
            );
            if program.has_qid() {
                let qid = if shared.config.priority_queueing_enabled {
                    priority
                } else {
                    0
                };
                set_field(&mut packet, FIELD_QID, qid as u64);
            }
        }

        packet.egress_port = Some(port);
        set_field(&mut packet, FIELD_EGRESS_PORT, port as u64);
        set_field(&mut packet, FIELD_EGRESS_SPEC, 0);
        let original_len = packet.register(REGISTER_ORIGINAL_LENGTH);
        set_field(&mut packet, FIELD_PACKET_LENGTH, original_len as u64);

        program.egress.apply(&mut packet);

        let clone_spec = field_uint(&packet, FIELD_CLONE_SPEC);
        if clone_spec != 0 {
            egress_clone(&shared, &program, &mut packet, clone_spec);
        }

        let egress_spec = field_int(&packet, FIELD_EGRESS_SPEC);
        if egress_spec == DROP_PORT {
            tracing::trace!(packet_id = packet.id, "dropped at egress, egress_spec=511");
            continue;
        }

        run_deparser(&mut packet, &program);

        let recirc_flag = field_uint(&packet, FIELD_RECIRC_FLAG);
        if recirc_flag != 0 {
            recirculate(&shared, &program, &packet, recirc_flag);
            continue;
        }

        shared
            .output_queue
            .push((port, packet.bytes().to_vec()));
    }
}

fn egress_clone(shared: &Shared, program: &ForwardingProgram, packet: &mut Packet, clone_spec: u64) {
    let mirror_id = (clone_spec & 0xFFFF) as u32;
    let field_list_id = (clone_spec >> 16) as u32;
    set_field(packet, FIELD_CLONE_SPEC, 0);

    let egress_port = program.mirrors.get_mirroring_mapping(mirror_id);
    if egress_port < 0 {
        tracing::debug!(disposition = %Disposition::MirroringMiss { mirror_id });
        return;
    }

    let mut clone = packet.clone_with_phv_reset_metadata(shared.next_packet_id());
    copy_field_list_and_set_type(
        &mut clone,
        packet,
        field_list_id,
        program.field_lists.as_ref(),
        InstanceType::EgressClone,
    );
    super::ingress::enqueue_to_egress(shared, program, egress_port as u16, clone);
}

fn recirculate(shared: &Shared, program: &ForwardingProgram, packet: &Packet, field_list_id_raw: u64) {
    let field_list_id = field_list_id_raw as u32;
    let mut clone = packet.clone_no_phv(shared.next_packet_id());
    clone.phv.reset_metadata();
    copy_field_list_and_set_type(
        &mut clone,
        packet,
        field_list_id,
        program.field_lists.as_ref(),
        InstanceType::Recirc,
    );
    let deparsed_len = clone.bytes().len() as i64;
    clone.set_register(REGISTER_ORIGINAL_LENGTH, deparsed_len);
    set_field(&mut clone, FIELD_PACKET_LENGTH, deparsed_len as u64);
    shared.input_queue.push(clone);
}

fn field_int(packet: &Packet, name: &str) -> i64 {
    packet.phv.get_field(name).map(|f| f.get_int()).unwrap_or(0)
}

fn field_uint(packet: &Packet, name: &str) -> u64 {
    packet
        .phv
        .get_field(name)
        .map(|f| f.get_uint())
        .unwrap_or(0)
}

fn set_field(packet: &mut Packet, name: &str, value: u64) {
    if let Some(f) = packet.phv.get_field_mut(name) {
        f.set_uint(value);
    }
}

// Copyright 2024 Oxide Computer Company

use std::sync::Arc;

use crate::error::Disposition;
use crate::instance::InstanceType;
use crate::packet::{Packet, REGISTER_ORIGINAL_LENGTH};
use crate::program::ForwardingProgram;
use crate::reinject::{copy_field_list_and_set_type, stamp_instance_type};
use crate::switch::Shared;

use super::run_parser;

const FIELD_EGRESS_SPEC: &str = "standard_metadata.egress_spec";
const FIELD_CLONE_SPEC: &str = "standard_metadata.clone_spec";
const FIELD_LEARN_ID: &str = "intrinsic_metadata.lf_field_list";
const FIELD_MCAST_GRP: &str = "intrinsic_metadata.mcast_grp";
const FIELD_RESUBMIT_FLAG: &str = "intrinsic_metadata.resubmit_flag";
const FIELD_EGRESS_RID: &str = "intrinsic_metadata.egress_rid";

const DROP_PORT: i64 = 511;

/// The single ingress worker thread: pops from the input queue, runs the
/// parser and ingress pipeline, then evaluates the five post-pipeline
/// side-effects (ingress clone, learning, resubmit, multicast, unicast) in
/// that fixed order against the post-pipeline PHV.
pub fn run(shared: Arc<Shared>) {
    loop {
        let Some(mut packet) = shared.input_queue.pop() else {
            tracing::info!("ingress worker observed shutdown");
            break;
        };

        let program = shared.program.load_full();
        let s_in = packet.save_buffer_state();

        run_parser(&mut packet, &program);
        program.ingress.apply(&mut packet);

        if let Some(hook) = &program.table_update_hook {
            hook.apply_updates(&packet, program.table_runtime.as_ref());
        }

        let egress_spec = field_int(&packet, FIELD_EGRESS_SPEC);
        let clone_spec = field_uint(&packet, FIELD_CLONE_SPEC);
        let learn_id = field_uint(&packet, FIELD_LEARN_ID);
        let mcast_grp = field_uint(&packet, FIELD_MCAST_GRP);

        if clone_spec != 0 {
            ingress_clone(&shared, &program, &mut packet, s_in, clone_spec);
        }

        if learn_id > 0 {
            program.learn.learn(learn_id as u32, &packet);
        }

        let resubmit_flag = field_uint(&packet, FIELD_RESUBMIT_FLAG);
        if resubmit_flag != 0 {
            resubmit(&shared, &program, &mut packet, s_in, resubmit_flag);
            continue;
        }

        if mcast_grp != 0 {
            multicast(&shared, &program, &packet, mcast_grp);
            continue;
        }

        if egress_spec == DROP_PORT {
            tracing::trace!(packet_id = packet.id, "dropped at ingress, egress_spec=511");
            continue;
        }
        enqueue_to_egress(&shared, &program, egress_spec as u16, packet);
    }
}

fn ingress_clone(
    shared: &Shared,
    program: &ForwardingProgram,
    packet: &mut Packet,
    s_in: crate::packet::BufferState,
    clone_spec: u64,
) {
    let mirror_id = (clone_spec & 0xFFFF) as u32;
    let field_list_id = (clone_spec >> 16) as u32;
    clear_field(packet, FIELD_CLONE_SPEC);

    let egress_port = program.mirrors.get_mirroring_mapping(mirror_id);
    if egress_port < 0 {
        tracing::debug!(disposition = %Disposition::MirroringMiss { mirror_id });
        return;
    }

    let s_out = packet.save_buffer_state();
    packet.restore_buffer_state(s_in);

    let mut clone = packet.clone_no_phv(shared.next_packet_id());
    run_parser(&mut clone, program);
    copy_field_list_and_set_type(
        &mut clone,
        packet,
        field_list_id,
        program.field_lists.as_ref(),
        InstanceType::IngressClone,
    );
    enqueue_to_egress(shared, program, egress_port as u16, clone);

    packet.restore_buffer_state(s_out);
}

fn resubmit(
    shared: &Shared,
    program: &ForwardingProgram,
    packet: &mut Packet,
    s_in: crate::packet::BufferState,
    resubmit_flag: u64,
) {
    packet.restore_buffer_state(s_in);
    let field_list_id = resubmit_flag as u32;
    clear_field(packet, FIELD_RESUBMIT_FLAG);

    let mut clone = packet.clone_no_phv(shared.next_packet_id());
    copy_field_list_and_set_type(
        &mut clone,
        packet,
        field_list_id,
        program.field_lists.as_ref(),
        InstanceType::Resubmit,
    );
    shared.input_queue.push(clone);
}

fn multicast(shared: &Shared, program: &ForwardingProgram, packet: &Packet, mcast_grp: u64) {
    let original_len = packet.register(REGISTER_ORIGINAL_LENGTH);
    for replica in program.pre.replicate(mcast_grp as u32) {
        let mut clone = packet.clone_with_phv(shared.next_packet_id());
        if let Some(f) = clone.phv.get_field_mut(FIELD_EGRESS_RID) {
            f.set_uint(replica.rid as u64);
        }
        clone.set_register(REGISTER_ORIGINAL_LENGTH, original_len);
        stamp_instance_type(&mut clone, InstanceType::Replication);
        enqueue_to_egress(shared, program, replica.egress_port, clone);
    }
    tracing::trace!(
        packet_id = packet.id,
        mcast_grp,
        "original dropped after multicast replication"
    );
}

/// Shared by unicast, ingress-clone, and multicast paths: reads the
/// priority source field if priority queueing is compiled in, stamps
/// enqueue-time queueing metadata if declared, and pushes into (B).
pub(crate) fn enqueue_to_egress(
    shared: &Shared,
    program: &ForwardingProgram,
    port: u16,
    mut packet: Packet,
) {
    packet.egress_port = Some(port);
    let priority = if shared.config.priority_queueing_enabled {
        field_uint(&packet, &shared.config.priority_source_field) as u32
    } else {
        0
    };

    if program.with_queueing_metadata() {
        let depth_before = shared.egress_queue.size(port);
        if let Some(f) = packet.phv.get_field_mut("queueing_metadata.enq_timestamp") {
            f.set_uint(shared.clock.since_epoch_us());
        }
        if let Some(f) = packet.phv.get_field_mut("queueing_metadata.enq_qdepth") {
            f.set_uint(depth_before as u64);
        }
    }

    shared.egress_queue.push(port, priority, packet);
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

fn clear_field(packet: &mut Packet, name: &str) {
    if let Some(f) = packet.phv.get_field_mut(name) {
        f.set_uint(0);
    }
}

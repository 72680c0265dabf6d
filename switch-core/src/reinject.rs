// Copyright 2024 Oxide Computer Company

use crate::instance::InstanceType;
use crate::packet::Packet;
use crate::program::FieldListRegistry;

/// Stamps `dst`'s instance type (both the Rust-side field and the
/// `standard_metadata.instance_type` PHV field the forwarding program reads)
/// and copies the program-declared field list from `src` into `dst`. Shared
/// by every reinjection path: ingress clone, egress clone, resubmit,
/// recirculate, and multicast replication.
pub fn copy_field_list_and_set_type(
    dst: &mut Packet,
    src: &Packet,
    field_list_id: u32,
    field_lists: &dyn FieldListRegistry,
    instance_type: InstanceType,
) {
    match field_lists.get_field_list(field_list_id) {
        Some(fields) => dst.phv.copy_fields_from(&src.phv, &fields),
        None => tracing::warn!(field_list_id, "field list id has no registered fields"),
    }
    stamp_instance_type(dst, instance_type);
}

pub fn stamp_instance_type(packet: &mut Packet, instance_type: InstanceType) {
    packet.instance_type = instance_type;
    if let Some(f) = packet.phv.get_field_mut("standard_metadata.instance_type") {
        f.set(instance_type.as_i64());
    }
}

// Copyright 2024 Oxide Computer Company

pub mod egress;
pub mod ingress;
pub mod transmit;

use crate::packet::Packet;
use crate::program::ForwardingProgram;

/// Re-parses `packet` from its current buffer bytes, starting at its
/// current cursor. Bridges the core's [`crate::packet::Packet`] to `p4rs`'s
/// `packet_in` cursor-over-bytes abstraction for the duration of the call.
pub(crate) fn run_parser(packet: &mut Packet, program: &ForwardingProgram) {
    let bytes = packet.bytes().to_vec();
    let start = packet.cursor_bits();
    let mut pin = p4rs::packet_in::new(&bytes);
    pin.index = start;
    program.parser.parse(&mut pin, &mut packet.phv);
    packet.advance_cursor(pin.index.saturating_sub(start));
}

/// Runs the deparser and writes the materialized bytes back into `packet`.
/// The portion of the buffer the parser never consumed is passed through
/// unchanged as payload.
pub(crate) fn run_deparser(packet: &mut Packet, program: &ForwardingProgram) {
    let bytes = packet.bytes().to_vec();
    let payload_start = (packet.cursor_bits() / 8).min(bytes.len());
    let mut pout = p4rs::packet_out {
        header_data: Vec::new(),
        payload_data: &bytes[payload_start..],
    };
    program.deparser.deparse(&mut pout, &packet.phv);
    let mut out = pout.header_data;
    out.extend_from_slice(pout.payload_data);
    packet.set_bytes(&out);
}

// Copyright 2024 Oxide Computer Company

use std::sync::Arc;

use crate::error::Disposition;
use crate::instance::InstanceType;
use crate::phv::{FieldCatalog, Phv};

/// Headroom added on top of the received length so a forwarding program can
/// grow headers (push/insert) without reallocating mid-pipeline.
pub const HEADER_GROWTH_HEADROOM: usize = 512;

/// Register 0 is reserved for the packet's original received length, carried
/// across parse/deparse/clone/recirculate so `standard_metadata.packet_length`
/// can always be restored.
pub const REGISTER_ORIGINAL_LENGTH: usize = 0;

const NUM_REGISTERS: usize = 4;

/// Opaque parser-consumption checkpoint. Produced by [`Packet::save_buffer_state`]
/// and consumed by [`Packet::restore_buffer_state`]; callers must not
/// interpret the wrapped value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferState(usize);

/// Owns a packet's raw buffer, scratch registers, and parsed header vector.
/// Uniquely owned at every instant: moving a `Packet` between queues and
/// worker threads is the only way it changes hands, and the clone methods
/// produce an independent `Packet` with a freshly assigned id.
#[derive(Debug, Clone)]
pub struct Packet {
    pub id: u64,
    pub ingress_port: u16,
    pub egress_port: Option<u16>,
    pub instance_type: InstanceType,
    buffer: Vec<u8>,
    valid_len: usize,
    /// Bit-offset consumed by the parser so far; 0 before parsing starts.
    cursor_bits: usize,
    registers: [i64; NUM_REGISTERS],
    pub phv: Phv,
}

impl Packet {
    /// Allocates a packet received on `ingress_port` with `len` bytes of
    /// payload, backed by a buffer with [`HEADER_GROWTH_HEADROOM`] bytes of
    /// spare capacity for the forwarding program to grow headers into.
    pub fn new(
        id: u64,
        ingress_port: u16,
        initial_bytes: &[u8],
        catalog: Arc<FieldCatalog>,
    ) -> Self {
        let len = initial_bytes.len();
        let mut buffer = Vec::with_capacity(len + HEADER_GROWTH_HEADROOM);
        buffer.extend_from_slice(initial_bytes);
        buffer.resize(len + HEADER_GROWTH_HEADROOM, 0);

        let mut registers = [0i64; NUM_REGISTERS];
        registers[REGISTER_ORIGINAL_LENGTH] = len as i64;

        let mut phv = Phv::new(catalog);
        if let Some(f) = phv.get_field_mut("standard_metadata.ingress_port") {
            f.set(ingress_port as i64);
        }
        if let Some(f) = phv.get_field_mut("standard_metadata.packet_length") {
            f.set(len as i64);
        }

        Self {
            id,
            ingress_port,
            egress_port: None,
            instance_type: InstanceType::Normal,
            buffer,
            valid_len: len,
            cursor_bits: 0,
            registers,
            phv,
        }
    }

    /// The packet's payload, excluding unused growth headroom.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer[..self.valid_len]
    }

    /// Replaces the payload, e.g. after the deparser materializes headers.
    /// Grows the backing buffer if the new content exceeds current capacity,
    /// logging when that happens since it signals the headroom budget was
    /// exhausted.
    pub fn set_bytes(&mut self, data: &[u8]) {
        if data.len() > self.buffer.len() {
            tracing::warn!(
                disposition = %Disposition::BufferHeadroomExceeded { packet_id: self.id },
                grown_to = data.len(),
                headroom = HEADER_GROWTH_HEADROOM,
            );
            self.buffer.resize(data.len(), 0);
        }
        self.buffer[..data.len()].copy_from_slice(data);
        self.valid_len = data.len();
    }

    pub fn register(&self, idx: usize) -> i64 {
        self.registers[idx]
    }

    pub fn set_register(&mut self, idx: usize, v: i64) {
        self.registers[idx] = v;
    }

    pub fn original_length(&self) -> i64 {
        self.registers[REGISTER_ORIGINAL_LENGTH]
    }

    pub fn cursor_bits(&self) -> usize {
        self.cursor_bits
    }

    pub fn advance_cursor(&mut self, bits: usize) {
        self.cursor_bits += bits;
    }

    /// Checkpoints the current parser cursor. Used before a reinjection path
    /// consumes more of the buffer, so the original consumption point can be
    /// recovered afterward.
    pub fn save_buffer_state(&self) -> BufferState {
        BufferState(self.cursor_bits)
    }

    /// Rewinds the parser cursor to a previously saved checkpoint. Does not
    /// touch buffer bytes, only how much of them are considered "already
    /// parsed".
    pub fn restore_buffer_state(&mut self, state: BufferState) {
        self.cursor_bits = state.0;
    }

    /// Copies the raw buffer only; the PHV is reset to a fresh, unparsed
    /// state so the clone must be re-parsed before use.
    pub fn clone_no_phv(&self, new_id: u64) -> Self {
        let catalog = self.phv.catalog().clone();
        let mut clone = Self::new(new_id, self.ingress_port, self.bytes(), catalog);
        clone.registers = self.registers;
        clone
    }

    /// Copies both the raw buffer and the PHV, including all metadata.
    pub fn clone_with_phv(&self, new_id: u64) -> Self {
        let mut clone = self.clone_no_phv(new_id);
        clone.phv = self.phv.clone();
        clone.cursor_bits = self.cursor_bits;
        clone
    }

    /// Copies buffer and headers, but zeroes metadata fields on the copy.
    pub fn clone_with_phv_reset_metadata(&self, new_id: u64) -> Self {
        let mut clone = self.clone_with_phv(new_id);
        clone.phv.reset_metadata();
        clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phv::FieldCatalog;

    fn catalog() -> Arc<FieldCatalog> {
        FieldCatalog::builder()
            .with_standard_metadata()
            .with_intrinsic_metadata(&["intrinsic_metadata.mcast_grp"])
            .build()
    }

    #[test]
    fn new_packet_sizes_buffer_with_headroom() {
        let pkt = Packet::new(1, 0, &[1, 2, 3, 4], catalog());
        assert_eq!(pkt.bytes(), &[1, 2, 3, 4]);
        assert_eq!(pkt.original_length(), 4);
    }

    #[test]
    fn buffer_state_round_trips() {
        let mut pkt = Packet::new(1, 0, &[1, 2, 3, 4], catalog());
        let s_in = pkt.save_buffer_state();
        pkt.advance_cursor(32);
        assert_eq!(pkt.cursor_bits(), 32);
        pkt.restore_buffer_state(s_in);
        assert_eq!(pkt.cursor_bits(), 0);
    }

    #[test]
    fn clone_no_phv_resets_phv_but_keeps_buffer_and_registers() {
        let mut pkt = Packet::new(1, 0, &[9, 9, 9], catalog());
        pkt.set_register(1, 42);
        pkt.phv
            .get_field_mut("intrinsic_metadata.mcast_grp")
            .unwrap()
            .set(7i64);

        let clone = pkt.clone_no_phv(2);
        assert_eq!(clone.bytes(), pkt.bytes());
        assert_eq!(clone.register(1), 42);
        assert_eq!(
            clone
                .phv
                .get_field("intrinsic_metadata.mcast_grp")
                .unwrap()
                .get_int(),
            0
        );
    }

    #[test]
    fn clone_with_phv_preserves_metadata_reset_variant_clears_it() {
        let mut pkt = Packet::new(1, 0, &[9, 9, 9], catalog());
        pkt.phv
            .get_field_mut("intrinsic_metadata.mcast_grp")
            .unwrap()
            .set(7i64);

        let with_phv = pkt.clone_with_phv(2);
        assert_eq!(
            with_phv
                .phv
                .get_field("intrinsic_metadata.mcast_grp")
                .unwrap()
                .get_int(),
            7
        );

        let reset = pkt.clone_with_phv_reset_metadata(3);
        assert_eq!(
            reset
                .phv
                .get_field("intrinsic_metadata.mcast_grp")
                .unwrap()
                .get_int(),
            0
        );
    }

    #[test]
    fn set_bytes_grows_buffer_past_headroom_if_needed() {
        let mut pkt = Packet::new(1, 0, &[0; 4], catalog());
        let big = vec![1u8; HEADER_GROWTH_HEADROOM + 100];
        pkt.set_bytes(&big);
        assert_eq!(pkt.bytes().len(), HEADER_GROWTH_HEADROOM + 100);
    }
}

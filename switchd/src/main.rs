// Copyright 2024 Oxide Computer Company

//! A minimal host binary wiring a `switch_core::Switch` up to a toy
//! learning-free L2 forwarding program. Demonstrates how a real host would
//! assemble the configuration, catalog, and trait-object collaborators the
//! core expects; not a P4 compiler target.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser as ClapParser;

use switch_core::phv::{FieldCatalog, Phv};
use switch_core::program::{
    Deparser, EgressPipeline, FieldListRegistry, ForwardingProgram, IngressPipeline, MatchErrorCode,
    MatchActionRuntime, MirrorMap, LearnEngine, Parser as CoreParser, PreReplicationEngine, Replica,
    TableUpdate,
};
use switch_core::{Packet, SwitchConfig, Switch};

const FIELD_DST: &str = "ethernet.dst";
const FIELD_SRC: &str = "ethernet.src";
const FIELD_ETHERTYPE: &str = "ethernet.ethertype";
const ETHERNET_HEADER_BITS: usize = 112;
const FLOOD_GROUP: u32 = 1;

#[derive(ClapParser)]
#[clap(version = "0.1")]
struct Opts {
    /// Number of virtual ports to bring up.
    #[clap(long, default_value_t = 4)]
    ports: u16,

    /// Per-port egress rate limit in packets per second, 0 = unlimited.
    #[clap(long, default_value_t = 0)]
    rate_pps: u32,

    /// Per-port egress queue depth.
    #[clap(long, default_value_t = 1024)]
    queue_depth: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let opts = Opts::parse();

    let catalog = FieldCatalog::builder()
        .with_standard_metadata()
        .with_intrinsic_metadata(&["intrinsic_metadata.mcast_grp"])
        .field(FIELD_DST, 48, false)
        .field(FIELD_SRC, 48, false)
        .field(FIELD_ETHERTYPE, 16, false)
        .build();

    let mut fib = HashMap::new();
    fib.insert([0x33u8, 0x33, 0x33, 0x33, 0x33, 0x33], 1u16);
    fib.insert([0x44u8, 0x44, 0x44, 0x44, 0x44, 0x44], 2u16);

    let program = ForwardingProgram {
        catalog,
        parser: Arc::new(EthernetParser),
        ingress: Arc::new(LearningFreeFib { fib }),
        egress: Arc::new(PassthroughEgress),
        deparser: Arc::new(EthernetDeparser),
        field_lists: Arc::new(NoFieldLists),
        pre: Arc::new(FloodToAllPorts { nb_ports: opts.ports }),
        learn: Arc::new(NoLearning),
        mirrors: Arc::new(NoMirroring),
        table_runtime: Arc::new(NoTableUpdates),
        table_update_hook: None,
    };

    let config = SwitchConfig {
        max_port: opts.ports.saturating_sub(1),
        default_queue_depth: opts.queue_depth,
        default_queue_rate_pps: opts.rate_pps,
        ..SwitchConfig::default()
    };

    let switch = Switch::new(config, program, |port, buffer| {
        tracing::info!(port, bytes = buffer.len(), dst = %mac_str(&buffer[0..6]), "transmit");
    })?
    .start_and_return();

    switch.receive(0, &ethernet_frame([0x33, 0x33, 0x33, 0x33, 0x33, 0x33], b"blueberry"));
    switch.receive(0, &ethernet_frame([0x44, 0x44, 0x44, 0x44, 0x44, 0x44], b"muffin"));
    switch.receive(0, &ethernet_frame([0x55, 0x55, 0x55, 0x55, 0x55, 0x55], b"nut"));

    std::thread::sleep(Duration::from_millis(100));
    drop(switch);

    Ok(())
}

fn mac_str(b: &[u8]) -> String {
    b.iter()
        .map(|x| format!("{:02x}", x))
        .collect::<Vec<_>>()
        .join(":")
}

fn ethernet_frame(dst: [u8; 6], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(14 + payload.len());
    frame.extend_from_slice(&dst);
    frame.extend_from_slice(&[0x11, 0x11, 0x11, 0x11, 0x11, 0x11]);
    frame.extend_from_slice(&[0x08, 0x00]);
    frame.extend_from_slice(payload);
    frame
}

struct EthernetParser;

impl CoreParser for EthernetParser {
    fn parse(&self, pkt: &mut p4rs::packet_in, phv: &mut Phv) {
        let start = pkt.index / 8;
        if pkt.data.len() < start + 14 {
            tracing::warn!("packet too short for an ethernet header, leaving PHV unset");
            return;
        }
        if let Some(f) = phv.get_field_mut(FIELD_DST) {
            f.set_uint(be_bytes_to_u64(&pkt.data[start..start + 6]));
        }
        if let Some(f) = phv.get_field_mut(FIELD_SRC) {
            f.set_uint(be_bytes_to_u64(&pkt.data[start + 6..start + 12]));
        }
        if let Some(f) = phv.get_field_mut(FIELD_ETHERTYPE) {
            f.set_uint(be_bytes_to_u64(&pkt.data[start + 12..start + 14]));
        }
        pkt.index += ETHERNET_HEADER_BITS;
    }
}

fn be_bytes_to_u64(b: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[8 - b.len()..].copy_from_slice(b);
    u64::from_be_bytes(buf)
}

struct EthernetDeparser;

impl Deparser for EthernetDeparser {
    fn deparse(&self, pkt: &mut p4rs::packet_out, phv: &Phv) {
        if let Some(f) = phv.get_field(FIELD_DST) {
            pkt.header_data.extend_from_slice(&f.bytes());
        }
        if let Some(f) = phv.get_field(FIELD_SRC) {
            pkt.header_data.extend_from_slice(&f.bytes());
        }
        if let Some(f) = phv.get_field(FIELD_ETHERTYPE) {
            pkt.header_data.extend_from_slice(&f.bytes());
        }
    }
}

/// Static destination-MAC forwarding table, flooding to a multicast group on
/// a miss. Stands in for a real match-action table, which is an external
/// collaborator this core only calls through `MatchActionRuntime`.
struct LearningFreeFib {
    fib: HashMap<[u8; 6], u16>,
}

impl IngressPipeline for LearningFreeFib {
    fn apply(&self, packet: &mut Packet) {
        let dst = packet
            .phv
            .get_field(FIELD_DST)
            .map(|f| f.bytes())
            .unwrap_or_default();
        let key: [u8; 6] = dst.get(0..6).and_then(|s| s.try_into().ok()).unwrap_or([0; 6]);

        match self.fib.get(&key) {
            Some(port) => {
                if let Some(f) = packet.phv.get_field_mut("standard_metadata.egress_spec") {
                    f.set_uint(*port as u64);
                }
            }
            None => {
                if let Some(f) = packet.phv.get_field_mut("intrinsic_metadata.mcast_grp") {
                    f.set_uint(FLOOD_GROUP as u64);
                }
            }
        }
    }
}

struct PassthroughEgress;

impl EgressPipeline for PassthroughEgress {
    fn apply(&self, _packet: &mut Packet) {}
}

struct NoFieldLists;

impl FieldListRegistry for NoFieldLists {
    fn get_field_list(&self, _id: u32) -> Option<Vec<String>> {
        None
    }
}

struct FloodToAllPorts {
    nb_ports: u16,
}

impl PreReplicationEngine for FloodToAllPorts {
    fn replicate(&self, mgid: u32) -> Vec<Replica> {
        if mgid != FLOOD_GROUP {
            return Vec::new();
        }
        (0..self.nb_ports)
            .map(|port| Replica {
                egress_port: port,
                rid: port as u32,
            })
            .collect()
    }
}

struct NoLearning;

impl LearnEngine for NoLearning {
    fn learn(&self, _learn_id: u32, _packet: &Packet) {}
}

struct NoMirroring;

impl MirrorMap for NoMirroring {
    fn get_mirroring_mapping(&self, _mirror_id: u32) -> i32 {
        -1
    }
}

struct NoTableUpdates;

impl MatchActionRuntime for NoTableUpdates {
    fn add_entry(&self, _update: &TableUpdate) -> Result<u32, MatchErrorCode> {
        Err(MatchErrorCode::Error)
    }

    fn modify_entry(&self, _handle: u32, _update: &TableUpdate) -> Result<(), MatchErrorCode> {
        Err(MatchErrorCode::Error)
    }

    fn delete_entry(&self, _handle: u32) -> Result<(), MatchErrorCode> {
        Err(MatchErrorCode::Error)
    }
}

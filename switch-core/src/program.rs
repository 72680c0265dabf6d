// Copyright 2024 Oxide Computer Company

use std::sync::Arc;

use thiserror::Error;

use crate::error::Disposition;
use crate::packet::Packet;
use crate::phv::{FieldCatalog, Phv};

/// Walks the packet's raw buffer and populates its PHV. The buffer side of
/// the contract is `p4rs`'s `packet_in`, the same cursor-over-a-byte-slice
/// abstraction compiled P4 parsers extract against; `Phv` is the core's own
/// generalized named-field table rather than a per-program header struct.
pub trait Parser: Send + Sync {
    fn parse(&self, pkt: &mut p4rs::packet_in, phv: &mut Phv);
}

/// The ingress match-action pipeline. Reads and writes the PHV, including
/// the `standard_metadata` fields the core inspects after it runs.
pub trait IngressPipeline: Send + Sync {
    fn apply(&self, packet: &mut Packet);
}

/// The egress match-action pipeline, run once per replica after egress
/// dequeue.
pub trait EgressPipeline: Send + Sync {
    fn apply(&self, packet: &mut Packet);
}

/// Materializes the PHV's header fields back into the packet's raw buffer,
/// via `p4rs`'s `packet_out` header-accumulator/payload-passthrough pair.
pub trait Deparser: Send + Sync {
    fn deparse(&self, pkt: &mut p4rs::packet_out, phv: &Phv);
}

/// Resolves a compiler-assigned field-list id to the ordered set of PHV
/// field names it copies. Used by every reinjection path (clone, resubmit,
/// recirculate).
pub trait FieldListRegistry: Send + Sync {
    fn get_field_list(&self, id: u32) -> Option<Vec<String>>;
}

/// One replica target produced by multicast replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replica {
    pub egress_port: u16,
    pub rid: u32,
}

/// Expands a multicast group id into its member replicas.
pub trait PreReplicationEngine: Send + Sync {
    fn replicate(&self, mgid: u32) -> Vec<Replica>;
}

/// Receives learned-field-list notifications. Implementations typically
/// forward these to a control-plane channel; the core only needs to deliver
/// them.
pub trait LearnEngine: Send + Sync {
    fn learn(&self, learn_id: u32, packet: &Packet);
}

/// Resolves a mirror id to a destination egress port, or a negative value
/// if the id has no mapping (a mirroring miss, logged and otherwise
/// ignored).
pub trait MirrorMap: Send + Sync {
    fn get_mirroring_mapping(&self, mirror_id: u32) -> i32;
}

/// Mirrors bmv2's `MatchErrorCode`, trimmed to the subset a table-update
/// hook can actually produce through add/modify/delete.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchErrorCode {
    #[error("SUCCESS")]
    Success,
    #[error("TABLE_FULL")]
    TableFull,
    #[error("INVALID_HANDLE")]
    InvalidHandle,
    #[error("INVALID_TABLE_NAME")]
    InvalidTableName,
    #[error("INVALID_ACTION_NAME")]
    InvalidActionName,
    #[error("BAD_MATCH_KEY")]
    BadMatchKey,
    #[error("BAD_ACTION_DATA")]
    BadActionData,
    #[error("ERROR")]
    Error,
}

/// A decoded table mutation, as extracted from a packet's table-update
/// header stack by a [`TableUpdateHook`].
pub struct TableUpdate {
    pub kind: UpdateKind,
    pub table_name: String,
    pub action_name: String,
    pub match_key: Vec<u8>,
    pub action_data: Vec<u8>,
}

/// The control-plane-facing match-action table collaborator. A forwarding
/// program's table-update hook dispatches decoded mutations here.
pub trait MatchActionRuntime: Send + Sync {
    fn add_entry(&self, update: &TableUpdate) -> Result<u32, MatchErrorCode>;
    fn modify_entry(&self, handle: u32, update: &TableUpdate) -> Result<(), MatchErrorCode>;
    fn delete_entry(&self, handle: u32) -> Result<(), MatchErrorCode>;
}

/// Update kinds a table-update header stack can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Add,
    Delete,
    Modify,
}

/// Optional hook a compiled program can provide to let packets themselves
/// carry match-table mutations. Invoked by the ingress worker right after
/// the ingress pipeline applies, before step 5 of the ingress loop.
pub trait TableUpdateHook: Send + Sync {
    /// Decodes zero or more updates out of `packet`'s PHV and dispatches
    /// each to `runtime`. Failures are logged by the caller with the
    /// returned symbolic code; they never affect the packet's own
    /// disposition.
    fn apply_updates(&self, packet: &Packet, runtime: &dyn MatchActionRuntime);
}

/// The full compiled forwarding program, held behind a single hot-swappable
/// pointer so a swap can never be observed as a torn combination of old and
/// new stages.
pub struct ForwardingProgram {
    /// Declares every PHV field this program knows about. Bundled with the
    /// stages (rather than swapped independently) so a PHV is never built
    /// against a catalog the rest of the program doesn't agree with.
    pub catalog: Arc<FieldCatalog>,
    pub parser: Arc<dyn Parser>,
    pub ingress: Arc<dyn IngressPipeline>,
    pub egress: Arc<dyn EgressPipeline>,
    pub deparser: Arc<dyn Deparser>,
    pub field_lists: Arc<dyn FieldListRegistry>,
    pub pre: Arc<dyn PreReplicationEngine>,
    pub learn: Arc<dyn LearnEngine>,
    pub mirrors: Arc<dyn MirrorMap>,
    pub table_runtime: Arc<dyn MatchActionRuntime>,
    pub table_update_hook: Option<Arc<dyn TableUpdateHook>>,
}

pub const QUEUEING_METADATA_REQUIRED_FIELDS: &[&str] = &[
    "queueing_metadata.enq_timestamp",
    "queueing_metadata.enq_qdepth",
    "queueing_metadata.deq_timedelta",
    "queueing_metadata.deq_qdepth",
];

/// All-or-none detection per the distilled spec: true only when every
/// required queueing-metadata field is declared. A partial declaration is
/// logged as a configuration warning and leaves the feature disabled.
pub fn catalog_has_queueing_metadata(catalog: &FieldCatalog) -> bool {
    let declared = QUEUEING_METADATA_REQUIRED_FIELDS
        .iter()
        .filter(|f| catalog.has_field(f))
        .count();
    if declared > 0 && declared < QUEUEING_METADATA_REQUIRED_FIELDS.len() {
        tracing::warn!(
            declared,
            required = QUEUEING_METADATA_REQUIRED_FIELDS.len(),
            disposition = %Disposition::PartialQueueingMetadata,
        );
    }
    declared == QUEUEING_METADATA_REQUIRED_FIELDS.len()
}

impl ForwardingProgram {
    pub fn with_queueing_metadata(&self) -> bool {
        catalog_has_queueing_metadata(&self.catalog)
    }

    pub fn has_qid(&self) -> bool {
        self.catalog.has_field("queueing_metadata.qid")
    }
}

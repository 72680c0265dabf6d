// Copyright 2024 Oxide Computer Company

pub mod clock;
pub mod config;
pub mod egress_queue;
pub mod error;
pub mod instance;
pub mod packet;
pub mod phv;
pub mod program;
pub mod queue;
pub mod rate_limiter;
pub mod reinject;
pub mod switch;
mod worker;

pub use config::SwitchConfig;
pub use error::{ConfigError, Disposition};
pub use instance::InstanceType;
pub use packet::Packet;
pub use phv::{Field, FieldCatalog, Phv};
pub use program::{
    Deparser, EgressPipeline, FieldListRegistry, ForwardingProgram, IngressPipeline,
    MatchActionRuntime, MatchErrorCode, MirrorMap, Parser, PreReplicationEngine, Replica,
    TableUpdate, TableUpdateHook, UpdateKind,
};
pub use switch::{Switch, TransmitFn};

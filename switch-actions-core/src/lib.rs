#![forbid(unsafe_code)]

pub mod actions;
pub mod buffer;
pub mod checksum;
pub mod collaborators;
pub mod config;
pub mod deferred;
pub mod editors;
pub mod engine;
pub mod error;
pub mod flow_key;
pub mod interpreter;

pub use actions::{
    ActionListBuilder, ActionListIter, ActionTag, RawAction, SampleAttrTag, SetAttrTag,
    UserspaceAttrTag,
};
pub use buffer::{ChecksumMode, PacketBuffer, TunnelInfo, VlanOffload};
pub use collaborators::{Classifier, Collaborators, RandomSource, RateLimiter, UpcallInfo, UpcallTransport, VportTable};
pub use config::{load_from_path, EngineConfig};
pub use engine::{CpuMetrics, Engine};
pub use error::{EngineError, Result};
pub use flow_key::FlowKey;

//! External collaborator interfaces.
//!
//! Flow classification, netlink parsing, vport transport, upcall
//! transport and SKB allocation are each modeled as a trait so the
//! engine can be exercised without a real dataplane behind it. A
//! production host implements these against its own vport table,
//! classifier and RCU-protected datapath handle; tests and the demo CLI
//! use simple in-memory stand-ins.

use crate::buffer::{PacketBuffer, TunnelInfo};
use crate::error::Result;
use crate::flow_key::FlowKey;
use std::time::{Duration, Instant};

/// An upcall descriptor built by the interpreter's USERSPACE handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcallInfo {
    pub userdata: Vec<u8>,
    pub portid: u32,
    pub egress_tun_port: Option<u32>,
}

/// The virtual-port table: send and lookup.
pub trait VportTable {
    /// Send `packet` out `port`. The collaborator owns the packet after
    /// this call returns successfully.
    fn vport_send(&mut self, port: u32, packet: PacketBuffer) -> Result<()>;

    /// Whether `port_id` resolves to a live vport (used before resolving
    /// egress tunnel info for USERSPACE).
    fn vport_lookup(&self, port_id: u32) -> bool;

    /// Resolve the egress tunnel descriptor to attach to an upcall for
    /// `port`, if that vport is tunnel-backed.
    fn vport_get_egress_tunnel_info(&self, port: u32, packet: &PacketBuffer) -> Result<TunnelInfo>;
}

/// Userspace upcall transport.
pub trait UpcallTransport {
    /// Deliver `packet` (borrowed — the transport clones internally if it
    /// needs to hold onto the bytes past this call) under `key` with the
    /// given upcall descriptor.
    fn dp_upcall(&mut self, packet: &PacketBuffer, key: &FlowKey, info: &UpcallInfo) -> Result<()>;
}

/// Flow classification re-entry: recirculation and
/// re-parsing the flow key from packet bytes.
pub trait Classifier {
    /// Re-enter classification for a recirculated packet. Consumes the
    /// packet — it is either emitted, delivered, or freed further down
    /// this call.
    fn classify_and_process(&mut self, packet: PacketBuffer, key: FlowKey) -> Result<()>;

    /// Re-derive `key`'s header-visible fields from `packet`'s current
    /// bytes, making the key valid again.
    fn flow_key_update(&mut self, packet: &PacketBuffer, key: &mut FlowKey) -> Result<()>;
}

/// A uniform random source.
pub trait RandomSource {
    fn next_u32(&mut self) -> u32;
}

/// Everything the interpreter needs from the host, bundled so
/// `execute_actions` takes one collaborator argument instead of four.
pub trait Collaborators: VportTable + UpcallTransport + Classifier + RandomSource {}

impl<T: VportTable + UpcallTransport + Classifier + RandomSource> Collaborators for T {}

/// "A rate-limited log primitive". Gates repeated
/// warnings (packet-loop detection, deferred-FIFO-full) to at most one
/// emission per window, so a sustained loop doesn't flood the log.
pub struct RateLimiter {
    window: Duration,
    last_logged: Option<Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self { window, last_logged: None }
    }

    /// Returns `true` if a warning should actually be emitted now.
    pub fn should_log(&mut self) -> bool {
        let now = Instant::now();
        match self.last_logged {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last_logged = Some(now);
                true
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

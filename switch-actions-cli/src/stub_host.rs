//! In-memory stand-ins for the engine's external collaborators. These exist only so the demo binary has something to run
//! against — they are not a real vport table, upcall transport or
//! classifier.

use switch_actions_core::{
    Classifier, FlowKey, PacketBuffer, RandomSource, Result, TunnelInfo, UpcallInfo,
    UpcallTransport, VportTable,
};
use tracing::info;

#[derive(Default)]
pub struct StubHost {
    next_random: u32,
}

impl StubHost {
    pub fn new(seed: u32) -> Self {
        Self { next_random: seed }
    }
}

impl VportTable for StubHost {
    fn vport_send(&mut self, port: u32, packet: PacketBuffer) -> Result<()> {
        info!(port, bytes = packet.len(), "vport_send");
        Ok(())
    }

    fn vport_lookup(&self, _port_id: u32) -> bool {
        true
    }

    fn vport_get_egress_tunnel_info(&self, _port: u32, _packet: &PacketBuffer) -> Result<TunnelInfo> {
        Ok(TunnelInfo { dst_ip: 0, tun_id: 0 })
    }
}

impl UpcallTransport for StubHost {
    fn dp_upcall(&mut self, packet: &PacketBuffer, key: &FlowKey, info: &UpcallInfo) -> Result<()> {
        tracing::info!(
            portid = info.portid,
            bytes = packet.len(),
            eth_type = key.eth.eth_type,
            "dp_upcall"
        );
        Ok(())
    }
}

impl Classifier for StubHost {
    fn classify_and_process(&mut self, packet: PacketBuffer, key: FlowKey) -> Result<()> {
        info!(bytes = packet.len(), recirc_id = key.recirc_id, "classify_and_process (recirculated)");
        Ok(())
    }

    fn flow_key_update(&mut self, _packet: &PacketBuffer, key: &mut FlowKey) -> Result<()> {
        // Demo stand-in: mark the key valid again without re-deriving it
        // from packet bytes. A real classifier re-parses every field.
        if key.eth.eth_type == 0 {
            key.eth.eth_type = 0x0800;
        }
        Ok(())
    }
}

impl RandomSource for StubHost {
    fn next_u32(&mut self) -> u32 {
        // Deterministic LCG so demo runs are reproducible, not a source
        // of real entropy.
        self.next_random = self.next_random.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        self.next_random
    }
}

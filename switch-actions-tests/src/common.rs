//! Shared fixtures and a recording collaborator stand-in for end-to-end
//! scenario tests.

use std::cell::RefCell;
use std::rc::Rc;
use switch_actions_core::{
    Classifier, FlowKey, PacketBuffer, RandomSource, Result, TunnelInfo, UpcallInfo,
    UpcallTransport, VportTable,
};

#[derive(Default, Debug)]
pub struct RecordingState {
    pub sent: Vec<(u32, Vec<u8>)>,
    pub upcalls: Vec<(u32, Vec<u8>)>,
    pub recircs: Vec<u32>,
    pub recirc_keys: Vec<FlowKey>,
}

#[derive(Default)]
pub struct RecordingBuffers {
    pub sent: Vec<(u32, PacketBuffer)>,
}

/// A collaborator stand-in that records every vport send, upcall and
/// recirculation instead of actually transporting anything, so tests can
/// assert on what the interpreter decided to do.
pub struct RecordingHost {
    pub state: Rc<RefCell<RecordingState>>,
    pub buffers: Rc<RefCell<RecordingBuffers>>,
    pub next_random: u32,
    pub fail_upcalls: bool,
}

impl RecordingHost {
    pub fn new(next_random: u32) -> Self {
        Self {
            state: Rc::new(RefCell::new(RecordingState::default())),
            buffers: Rc::new(RefCell::new(RecordingBuffers::default())),
            next_random,
            fail_upcalls: false,
        }
    }

    /// A host whose `dp_upcall` always fails, for exercising callers that
    /// must treat a collaborator error as non-fatal.
    pub fn new_with_failing_upcall(next_random: u32) -> Self {
        Self { fail_upcalls: true, ..Self::new(next_random) }
    }
}

impl VportTable for RecordingHost {
    fn vport_send(&mut self, port: u32, packet: PacketBuffer) -> Result<()> {
        self.state.borrow_mut().sent.push((port, packet.data().to_vec()));
        self.buffers.borrow_mut().sent.push((port, packet));
        Ok(())
    }

    fn vport_lookup(&self, _port_id: u32) -> bool {
        true
    }

    fn vport_get_egress_tunnel_info(&self, _port: u32, _packet: &PacketBuffer) -> Result<TunnelInfo> {
        Ok(TunnelInfo { dst_ip: 0, tun_id: 0 })
    }
}

impl UpcallTransport for RecordingHost {
    fn dp_upcall(&mut self, packet: &PacketBuffer, _key: &FlowKey, info: &UpcallInfo) -> Result<()> {
        if self.fail_upcalls {
            return Err(switch_actions_core::EngineError::Collaborator("no listener registered".into()));
        }
        self.state.borrow_mut().upcalls.push((info.portid, packet.data().to_vec()));
        Ok(())
    }
}

impl Classifier for RecordingHost {
    fn classify_and_process(&mut self, _packet: PacketBuffer, key: FlowKey) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.recircs.push(key.recirc_id);
        state.recirc_keys.push(key);
        Ok(())
    }

    fn flow_key_update(&mut self, _packet: &PacketBuffer, key: &mut FlowKey) -> Result<()> {
        key.eth.eth_type = 0x0800;
        Ok(())
    }
}

impl RandomSource for RecordingHost {
    fn next_u32(&mut self) -> u32 {
        self.next_random
    }
}

pub const ETH_SRC: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
pub const ETH_DST: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];

/// A minimal untagged Ethernet frame with no L3 payload, padded to the
/// 64-byte minimum frame size.
pub fn eth_frame(ethertype: u16) -> Vec<u8> {
    let mut frame = vec![0u8; 64];
    frame[0..6].copy_from_slice(&ETH_DST);
    frame[6..12].copy_from_slice(&ETH_SRC);
    frame[12..14].copy_from_slice(&ethertype.to_be_bytes());
    frame
}

fn ones_complement_sum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = *chunks.remainder() {
        sum += u16::from_be_bytes([last, 0]) as u32;
    }
    sum
}

fn fold_checksum(mut sum: u32) -> u16 {
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Build a 20-byte IPv4 header (no options) with a correct header
/// checksum, followed by a 20-byte TCP header (no options, no payload)
/// with a correct checksum over the IPv4 pseudo-header.
pub fn ipv4_tcp_frame(src: [u8; 4], dst: [u8; 4], tcp_src: u16, tcp_dst: u16) -> Vec<u8> {
    let mut frame = eth_frame(0x0800);
    frame.resize(14 + 20 + 20, 0);
    let ip = 14usize;
    frame[ip] = 0x45; // version 4, IHL 5
    frame[ip + 1] = 0; // tos
    let total_len: u16 = 40;
    frame[ip + 2..ip + 4].copy_from_slice(&total_len.to_be_bytes());
    frame[ip + 8] = 64; // ttl
    frame[ip + 9] = 6; // protocol = TCP
    frame[ip + 12..ip + 16].copy_from_slice(&src);
    frame[ip + 16..ip + 20].copy_from_slice(&dst);
    let ip_checksum = fold_checksum(ones_complement_sum(&frame[ip..ip + 20]));
    frame[ip + 10..ip + 12].copy_from_slice(&ip_checksum.to_be_bytes());

    let tcp = ip + 20;
    frame[tcp..tcp + 2].copy_from_slice(&tcp_src.to_be_bytes());
    frame[tcp + 2..tcp + 4].copy_from_slice(&tcp_dst.to_be_bytes());
    frame[tcp + 12] = 0x50; // data offset = 5 words
    let tcp_checksum = tcp_udp_checksum(&src, &dst, 6, &frame[tcp..tcp + 20]);
    frame[tcp + 16..tcp + 18].copy_from_slice(&tcp_checksum.to_be_bytes());
    frame
}

/// The standard TCP/UDP pseudo-header checksum: IPv4 src+dst, zero byte,
/// protocol, segment length, then the segment itself (with its own
/// checksum field treated as zero).
pub fn tcp_udp_checksum(src: &[u8; 4], dst: &[u8; 4], protocol: u8, segment: &[u8]) -> u16 {
    let mut pseudo = Vec::with_capacity(12 + segment.len());
    pseudo.extend_from_slice(src);
    pseudo.extend_from_slice(dst);
    pseudo.push(0);
    pseudo.push(protocol);
    pseudo.extend_from_slice(&(segment.len() as u16).to_be_bytes());
    pseudo.extend_from_slice(segment);
    fold_checksum(ones_complement_sum(&pseudo))
}

pub fn ipv4_header_checksum(header20: &[u8]) -> u16 {
    fold_checksum(ones_complement_sum(header20))
}

/// Recompute the IPv4 header checksum of a live frame's 20-byte header at
/// `ip_off`, zeroing the stored checksum field first so the recomputation
/// doesn't fold in whatever is currently stored there.
pub fn recompute_ipv4_checksum(frame: &[u8], ip_off: usize) -> u16 {
    let mut header = frame[ip_off..ip_off + 20].to_vec();
    header[10] = 0;
    header[11] = 0;
    ipv4_header_checksum(&header)
}

/// Recompute the TCP checksum of a live frame's TCP segment at `tcp_off`
/// running to the end of `frame`, against the IPv4 addresses at `ip_off`.
pub fn recompute_tcp_checksum(frame: &[u8], ip_off: usize, tcp_off: usize) -> u16 {
    let src: [u8; 4] = frame[ip_off + 12..ip_off + 16].try_into().unwrap();
    let dst: [u8; 4] = frame[ip_off + 16..ip_off + 20].try_into().unwrap();
    let mut segment = frame[tcp_off..].to_vec();
    segment[16] = 0;
    segment[17] = 0;
    tcp_udp_checksum(&src, &dst, 6, &segment)
}

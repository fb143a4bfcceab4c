//! The mutable packet view.
//!
//! Buffers may be shared (the pending-output optimization hands the same
//! bytes to two vports without a clone until an editor actually needs to
//! mutate them). We model that with `Rc<Vec<u8>>` and `Rc::make_mut`:
//! cloning a [`PacketBuffer`] is a cheap refcount bump, and the first
//! mutating call after a clone transparently copies the backing storage.
//! That is exactly the copy-on-write predicate a real SKB clone flag
//! expresses with a refcounted owner bit, here using a standard-library
//! primitive instead of a hand-rolled shared/owned flag.

use crate::error::{EngineError, Result};
use std::rc::Rc;

/// SKB-style checksum offload mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    /// No checksum information is being tracked.
    None,
    /// The checksum is known good and does not need recomputation.
    Unnecessary,
    /// Software maintains a running one's-complement sum over the payload.
    Complete,
    /// Hardware will compute the transport checksum before the packet is
    /// finally emitted; editors must still keep the *stored* partial value
    /// consistent with the platform convention.
    Partial,
}

/// Hardware VLAN offload slot: present flag plus TPID/TCI, stored
/// out-of-band from the packet bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VlanOffload {
    pub tpid: u16,
    pub tci: u16,
}

/// Egress tunnel descriptor, either resolved by a collaborator for an
/// upcall or stashed by SET(TUNNEL_INFO) for later tunnel output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelInfo {
    pub dst_ip: u32,
    pub tun_id: u64,
}

pub const ETH_HEADER_LEN: usize = 14;
pub const VLAN_HEADER_LEN: usize = 4;
pub const MPLS_LSE_LEN: usize = 4;

pub const ETH_P_8021Q: u16 = 0x8100;
pub const ETH_P_8021AD: u16 = 0x88A8;
pub const ETH_P_MPLS_UC: u16 = 0x8847;
pub const ETH_P_MPLS_MC: u16 = 0x8848;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_SCTP: u8 = 132;

/// A mutable view over one packet's bytes plus layer offsets and offload
/// state. `mac_header` is always relative to the start of `data`;
/// `mac_len` is the distance from the mac header to the first
/// non-L2 header (it includes VLAN tags and excludes any MPLS label
/// stack).
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    data: Rc<Vec<u8>>,
    mac_header: usize,
    mac_len: usize,
    network_header: usize,
    transport_header: usize,
    csum_mode: ChecksumMode,
    /// Meaningful only when `csum_mode == Complete`: the running
    /// one's-complement sum the caller is maintaining over the payload.
    csum_value: u16,
    vlan_offload: Option<VlanOffload>,
    protocol: u16,
    inner_protocol: Option<u16>,
    hash: Option<u32>,
    priority: u32,
    skb_mark: u32,
    tunnel_info: Option<TunnelInfo>,
}

impl PacketBuffer {
    /// Construct a buffer for a freshly-received, untagged Ethernet frame.
    pub fn new(bytes: Vec<u8>, protocol: u16) -> Self {
        Self {
            data: Rc::new(bytes),
            mac_header: 0,
            mac_len: ETH_HEADER_LEN,
            network_header: ETH_HEADER_LEN,
            transport_header: ETH_HEADER_LEN,
            csum_mode: ChecksumMode::None,
            csum_value: 0,
            vlan_offload: None,
            protocol,
            inner_protocol: None,
            hash: None,
            priority: 0,
            skb_mark: 0,
            tunnel_info: None,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Ensure the first `range_len` bytes of the packet are present and
    /// exclusively owned, copying the backing storage if it is currently
    /// shared with another [`PacketBuffer`].
    pub fn ensure_writable(&mut self, range_len: usize) -> Result<()> {
        if self.data.len() < range_len {
            return Err(EngineError::MalformedActions(format!(
                "packet too short: need {range_len} bytes, have {}",
                self.data.len()
            )));
        }
        if Rc::strong_count(&self.data) > 1 {
            let owned: Vec<u8> = self.data.as_ref().clone();
            self.data = Rc::new(owned);
        }
        Ok(())
    }

    /// Mutable access to the backing bytes. Callers must call
    /// [`PacketBuffer::ensure_writable`] first for the range they intend
    /// to touch.
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        Rc::make_mut(&mut self.data)
    }

    /// Grow headroom by inserting `n` zero bytes at the absolute front of
    /// the buffer. The caller is responsible for relocating any header
    /// that needs to stay at a fixed offset relative to the new data
    /// start.
    pub fn push_front(&mut self, n: usize) -> Result<()> {
        self.insert_at(0, n)
    }

    /// Shrink headroom by removing the first `n` bytes of the buffer.
    pub fn pull_front(&mut self, n: usize) -> Result<()> {
        self.remove_at(0, n)
    }

    /// Insert `n` zero bytes at `offset` (used by VLAN push to open a gap
    /// after the address pair rather than at the absolute front).
    pub fn insert_at(&mut self, offset: usize, n: usize) -> Result<()> {
        let buf = Rc::make_mut(&mut self.data);
        buf.try_reserve(n).map_err(|_| EngineError::OutOfMemory)?;
        buf.splice(offset..offset, std::iter::repeat(0u8).take(n));
        Ok(())
    }

    /// Remove `n` bytes starting at `offset`.
    pub fn remove_at(&mut self, offset: usize, n: usize) -> Result<()> {
        let buf = Rc::make_mut(&mut self.data);
        if buf.len() < offset + n {
            return Err(EngineError::MalformedActions("remove_at past end of packet".into()));
        }
        buf.drain(offset..offset + n);
        Ok(())
    }

    /// Recompute the mac header offset to the current data start (always
    /// `0` in this representation — see module docs).
    pub fn reset_mac_header(&mut self) {
        self.mac_header = 0;
    }

    pub fn mac_header(&self) -> usize {
        self.mac_header
    }

    pub fn mac_len(&self) -> usize {
        self.mac_len
    }

    pub fn set_mac_len(&mut self, len: usize) {
        self.mac_len = len;
    }

    pub fn network_header(&self) -> usize {
        self.network_header
    }

    pub fn set_network_header(&mut self, offset: usize) {
        self.network_header = offset;
    }

    pub fn transport_header(&self) -> usize {
        self.transport_header
    }

    pub fn set_transport_header(&mut self, offset: usize) {
        self.transport_header = offset;
    }

    /// Offset of the outermost ethertype field: the last two bytes of the
    /// mac header region (after any VLAN tags, before any MPLS stack).
    pub fn ethertype_offset(&self) -> usize {
        self.mac_header + self.mac_len - 2
    }

    pub fn checksum_mode(&self) -> ChecksumMode {
        self.csum_mode
    }

    pub fn set_checksum_mode(&mut self, mode: ChecksumMode) {
        self.csum_mode = mode;
    }

    pub fn running_checksum(&self) -> u16 {
        self.csum_value
    }

    pub fn set_running_checksum(&mut self, value: u16) {
        self.csum_value = value;
    }

    pub fn vlan_offload(&self) -> Option<VlanOffload> {
        self.vlan_offload
    }

    pub fn set_vlan_offload(&mut self, offload: Option<VlanOffload>) {
        self.vlan_offload = offload;
    }

    pub fn protocol(&self) -> u16 {
        self.protocol
    }

    pub fn set_protocol(&mut self, protocol: u16) {
        self.protocol = protocol;
    }

    pub fn inner_protocol(&self) -> Option<u16> {
        self.inner_protocol
    }

    pub fn set_inner_protocol(&mut self, protocol: Option<u16>) {
        self.inner_protocol = protocol;
    }

    pub fn hash(&self) -> Option<u32> {
        self.hash
    }

    /// Invalidate the cached hash; any mutation that changes
    /// classification-relevant bytes must call this.
    pub fn clear_hash(&mut self) {
        self.hash = None;
    }

    pub fn set_hash(&mut self, hash: u32) {
        self.hash = Some(hash);
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    pub fn skb_mark(&self) -> u32 {
        self.skb_mark
    }

    pub fn set_skb_mark(&mut self, mark: u32) {
        self.skb_mark = mark;
    }

    pub fn tunnel_info(&self) -> Option<TunnelInfo> {
        self.tunnel_info
    }

    pub fn set_tunnel_info(&mut self, info: Option<TunnelInfo>) {
        self.tunnel_info = info;
    }

    /// Produce an independently-owned copy of this buffer (used for the
    /// pending-output clone and for SAMPLE/RECIRC deferral). The backing
    /// bytes are *not* copied eagerly — they stay shared via `Rc` until
    /// either side next mutates them.
    pub fn clone_for_deferred(&self) -> Self {
        self.clone()
    }

    /// Whether this buffer's backing storage is currently shared with
    /// another `PacketBuffer` (diagnostic / test use).
    pub fn is_shared(&self) -> bool {
        Rc::strong_count(&self.data) > 1
    }
}

//! Action-list wire format: a tag-length-value sequence.
//!
//! Wire format decision: each TLV is `u16 tag` + `u16 len` (payload length, not
//! including the 4-byte header) + `payload`, big-endian, no alignment
//! padding. Nested lists (SAMPLE's `actions`, USERSPACE's attribute set,
//! SET's key-attr) are themselves TLV sequences occupying the outer
//! element's payload.

use crate::error::{EngineError, Result};

macro_rules! tag_enum {
    ($name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn from_u16(v: u16) -> Option<Self> {
                match v {
                    $($value => Some(Self::$variant)),+,
                    _ => None,
                }
            }

            pub fn as_u16(self) -> u16 {
                match self {
                    $(Self::$variant => $value),+
                }
            }
        }
    };
}

tag_enum!(ActionTag {
    Output = 1,
    Userspace = 2,
    Hash = 3,
    PushMpls = 4,
    PopMpls = 5,
    PushVlan = 6,
    PopVlan = 7,
    Recirc = 8,
    Set = 9,
    Sample = 10,
});

tag_enum!(SetAttrTag {
    Priority = 1,
    SkbMark = 2,
    TunnelInfo = 3,
    Ethernet = 4,
    Ipv4 = 5,
    Ipv6 = 6,
    Tcp = 7,
    Udp = 8,
    Sctp = 9,
    Mpls = 10,
});

tag_enum!(UserspaceAttrTag {
    Userdata = 1,
    Pid = 2,
    EgressTunPort = 3,
});

tag_enum!(SampleAttrTag {
    Probability = 1,
    Actions = 2,
});

/// One decoded TLV element: its tag and a borrowed slice over the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAction<'a> {
    pub tag: u16,
    pub payload: &'a [u8],
}

const TLV_HEADER_LEN: usize = 4;

/// Lazily walk a TLV-encoded action list, yielding one [`RawAction`] per
/// element. Malformed lists (truncated header, payload past the end of
/// the buffer) yield a single `MalformedActions` error and then end.
pub struct ActionListIter<'a> {
    remaining: &'a [u8],
    errored: bool,
}

impl<'a> ActionListIter<'a> {
    pub fn new(list: &'a [u8]) -> Self {
        Self { remaining: list, errored: false }
    }
}

impl<'a> Iterator for ActionListIter<'a> {
    type Item = Result<RawAction<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored || self.remaining.is_empty() {
            return None;
        }
        if self.remaining.len() < TLV_HEADER_LEN {
            self.errored = true;
            return Some(Err(EngineError::MalformedActions(
                "truncated TLV header".into(),
            )));
        }
        let tag = u16::from_be_bytes([self.remaining[0], self.remaining[1]]);
        let len = u16::from_be_bytes([self.remaining[2], self.remaining[3]]) as usize;
        let total = TLV_HEADER_LEN + len;
        if self.remaining.len() < total {
            self.errored = true;
            return Some(Err(EngineError::MalformedActions(format!(
                "TLV payload of {len} bytes exceeds remaining {} bytes",
                self.remaining.len() - TLV_HEADER_LEN
            ))));
        }
        let payload = &self.remaining[TLV_HEADER_LEN..total];
        self.remaining = &self.remaining[total..];
        Some(Ok(RawAction { tag, payload }))
    }
}

/// Decode exactly one TLV's payload as a big-endian `u32`.
pub fn payload_as_u32(payload: &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| EngineError::MalformedActions("expected 4-byte payload".into()))?;
    Ok(u32::from_be_bytes(bytes))
}

/// Decode exactly one TLV's payload as a big-endian `u16`.
pub fn payload_as_u16(payload: &[u8]) -> Result<u16> {
    let bytes: [u8; 2] = payload
        .try_into()
        .map_err(|_| EngineError::MalformedActions("expected 2-byte payload".into()))?;
    Ok(u16::from_be_bytes(bytes))
}

/// Builds TLV-encoded action lists. Used by the CLI demo harness and by
/// tests that need concrete byte fixtures rather than hand-written
/// literals.
#[derive(Debug, Default, Clone)]
pub struct ActionListBuilder {
    buf: Vec<u8>,
}

impl ActionListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_tlv(&mut self, tag: u16, payload: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(&tag.to_be_bytes());
        self.buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(payload);
        self
    }

    pub fn output(&mut self, port: u32) -> &mut Self {
        self.push_tlv(ActionTag::Output.as_u16(), &port.to_be_bytes())
    }

    pub fn recirc(&mut self, recirc_id: u32) -> &mut Self {
        self.push_tlv(ActionTag::Recirc.as_u16(), &recirc_id.to_be_bytes())
    }

    pub fn pop_vlan(&mut self) -> &mut Self {
        self.push_tlv(ActionTag::PopVlan.as_u16(), &[])
    }

    pub fn push_vlan(&mut self, tpid: u16, tci: u16) -> &mut Self {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&tpid.to_be_bytes());
        payload.extend_from_slice(&tci.to_be_bytes());
        self.push_tlv(ActionTag::PushVlan.as_u16(), &payload)
    }

    pub fn push_mpls(&mut self, lse: u32, ethertype: u16) -> &mut Self {
        let mut payload = Vec::with_capacity(6);
        payload.extend_from_slice(&lse.to_be_bytes());
        payload.extend_from_slice(&ethertype.to_be_bytes());
        self.push_tlv(ActionTag::PushMpls.as_u16(), &payload)
    }

    pub fn pop_mpls(&mut self, ethertype: u16) -> &mut Self {
        self.push_tlv(ActionTag::PopMpls.as_u16(), &ethertype.to_be_bytes())
    }

    pub fn hash(&mut self, basis: u32) -> &mut Self {
        self.push_tlv(ActionTag::Hash.as_u16(), &basis.to_be_bytes())
    }

    /// Append a SET action with a single already-encoded nested attribute.
    pub fn set_raw(&mut self, attr_tag: u16, attr_payload: &[u8]) -> &mut Self {
        let mut nested = Vec::with_capacity(TLV_HEADER_LEN + attr_payload.len());
        nested.extend_from_slice(&attr_tag.to_be_bytes());
        nested.extend_from_slice(&(attr_payload.len() as u16).to_be_bytes());
        nested.extend_from_slice(attr_payload);
        self.push_tlv(ActionTag::Set.as_u16(), &nested)
    }

    /// SET(IPV4) always carries the complete desired header field values
    /// (src, dst, tos, ttl, protocol hint); the editor compares each
    /// against the packet's current bytes and only touches what differs.
    pub fn set_ipv4(&mut self, src: u32, dst: u32, tos: u8, ttl: u8, proto: u8) -> &mut Self {
        let mut payload = [0u8; 11];
        payload[0..4].copy_from_slice(&src.to_be_bytes());
        payload[4..8].copy_from_slice(&dst.to_be_bytes());
        payload[8] = tos;
        payload[9] = ttl;
        payload[10] = proto;
        self.set_raw(SetAttrTag::Ipv4.as_u16(), &payload)
    }

    pub fn set_tcp(&mut self, src: u16, dst: u16) -> &mut Self {
        let mut payload = [0u8; 4];
        payload[0..2].copy_from_slice(&src.to_be_bytes());
        payload[2..4].copy_from_slice(&dst.to_be_bytes());
        self.set_raw(SetAttrTag::Tcp.as_u16(), &payload)
    }

    pub fn set_udp(&mut self, src: u16, dst: u16) -> &mut Self {
        let mut payload = [0u8; 4];
        payload[0..2].copy_from_slice(&src.to_be_bytes());
        payload[2..4].copy_from_slice(&dst.to_be_bytes());
        self.set_raw(SetAttrTag::Udp.as_u16(), &payload)
    }

    pub fn set_sctp(&mut self, src: u16, dst: u16) -> &mut Self {
        let mut payload = [0u8; 4];
        payload[0..2].copy_from_slice(&src.to_be_bytes());
        payload[2..4].copy_from_slice(&dst.to_be_bytes());
        self.set_raw(SetAttrTag::Sctp.as_u16(), &payload)
    }

    pub fn set_ethernet(&mut self, src: [u8; 6], dst: [u8; 6]) -> &mut Self {
        let mut payload = [0u8; 12];
        payload[0..6].copy_from_slice(&src);
        payload[6..12].copy_from_slice(&dst);
        self.set_raw(SetAttrTag::Ethernet.as_u16(), &payload)
    }

    pub fn set_mpls(&mut self, lse: u32) -> &mut Self {
        self.set_raw(SetAttrTag::Mpls.as_u16(), &lse.to_be_bytes())
    }

    pub fn set_priority(&mut self, priority: u32) -> &mut Self {
        self.set_raw(SetAttrTag::Priority.as_u16(), &priority.to_be_bytes())
    }

    pub fn set_skb_mark(&mut self, mark: u32) -> &mut Self {
        self.set_raw(SetAttrTag::SkbMark.as_u16(), &mark.to_be_bytes())
    }

    /// Append a USERSPACE action with a `PID` attribute (and optional
    /// userdata).
    pub fn userspace(&mut self, pid: u32, userdata: &[u8]) -> &mut Self {
        let mut nested = Vec::new();
        if !userdata.is_empty() {
            nested.extend_from_slice(&UserspaceAttrTag::Userdata.as_u16().to_be_bytes());
            nested.extend_from_slice(&(userdata.len() as u16).to_be_bytes());
            nested.extend_from_slice(userdata);
        }
        nested.extend_from_slice(&UserspaceAttrTag::Pid.as_u16().to_be_bytes());
        nested.extend_from_slice(&4u16.to_be_bytes());
        nested.extend_from_slice(&pid.to_be_bytes());
        self.push_tlv(ActionTag::Userspace.as_u16(), &nested)
    }

    pub fn sample(&mut self, probability: u32, nested_actions: &[u8]) -> &mut Self {
        let mut nested = Vec::new();
        nested.extend_from_slice(&SampleAttrTag::Probability.as_u16().to_be_bytes());
        nested.extend_from_slice(&4u16.to_be_bytes());
        nested.extend_from_slice(&probability.to_be_bytes());
        nested.extend_from_slice(&SampleAttrTag::Actions.as_u16().to_be_bytes());
        nested.extend_from_slice(&(nested_actions.len() as u16).to_be_bytes());
        nested.extend_from_slice(nested_actions);
        self.push_tlv(ActionTag::Sample.as_u16(), &nested)
    }

    pub fn build(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

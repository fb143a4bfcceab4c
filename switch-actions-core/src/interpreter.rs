//! The action interpreter: walks a TLV action list and dispatches to
//! header editors, vport output, sampling and recirculation.

use crate::actions::{
    payload_as_u16, payload_as_u32, ActionListIter, ActionTag, RawAction, SampleAttrTag,
    SetAttrTag, UserspaceAttrTag,
};
use crate::buffer::{PacketBuffer, TunnelInfo};
use crate::collaborators::{Collaborators, RateLimiter, UpcallInfo};
use crate::deferred::{DeferredEntry, DeferredFifo};
use crate::editors::{ethernet, ipv4, ipv6, mpls, transport, vlan};
use crate::error::{EngineError, Result};
use crate::flow_key::FlowKey;
use std::net::Ipv6Addr;

const ETH_P_IPV4: u16 = 0x0800;
const ETH_P_IPV6: u16 = 0x86DD;

/// Run `actions` against an owned packet, returning once the list is
/// exhausted or an editor/collaborator error aborts it. Consumes the
/// packet along every path: emitted via a vport, delivered via upcall,
/// handed to a deferred entry, or simply dropped.
pub fn run(
    mut packet: PacketBuffer,
    key: &mut FlowKey,
    actions: &[u8],
    collabs: &mut dyn Collaborators,
    deferred: &mut DeferredFifo,
    loop_warn: &mut RateLimiter,
) -> Result<()> {
    let parsed: Vec<RawAction> = ActionListIter::new(actions).collect::<Result<Vec<_>>>()?;

    let mut prev_port: Option<u32> = None;

    for (index, action) in parsed.iter().enumerate() {
        let is_last = index == parsed.len() - 1;
        match ActionTag::from_u16(action.tag) {
            Some(ActionTag::Output) => {
                let port = payload_as_u32(action.payload)?;
                if let Some(prev) = prev_port {
                    let clone = packet.clone_for_deferred();
                    collabs.vport_send(prev, clone)?;
                }
                prev_port = Some(port);
            }
            Some(ActionTag::Userspace) => {
                dispatch_userspace(&packet, key, action.payload, collabs)?;
            }
            Some(ActionTag::Hash) => {
                let basis = payload_as_u32(action.payload)?;
                key.ovs_flow_hash = mix_hash(key, basis);
            }
            Some(ActionTag::PushMpls) => {
                let (lse, ethertype) = decode_push_mpls(action.payload)?;
                mpls::push(&mut packet, key, lse, ethertype)?;
            }
            Some(ActionTag::PopMpls) => {
                let ethertype = payload_as_u16(action.payload)?;
                mpls::pop(&mut packet, key, ethertype)?;
            }
            Some(ActionTag::PushVlan) => {
                let (tpid, tci) = decode_push_vlan(action.payload)?;
                vlan::push(&mut packet, key, tpid, tci)?;
            }
            Some(ActionTag::PopVlan) => {
                vlan::pop(&mut packet, key)?;
            }
            Some(ActionTag::Set) => {
                dispatch_set(&mut packet, key, action.payload)?;
            }
            Some(ActionTag::Sample) => {
                dispatch_sample(&mut packet, key, action.payload, collabs, deferred, loop_warn)?;
            }
            Some(ActionTag::Recirc) => {
                let recirc_id = payload_as_u32(action.payload)?;
                let consumed = dispatch_recirc(
                    &mut packet,
                    key,
                    recirc_id,
                    is_last,
                    collabs,
                    deferred,
                    loop_warn,
                )?;
                if consumed {
                    return Ok(());
                }
            }
            None => {
                return Err(EngineError::MalformedActions(format!(
                    "unrecognized action tag {}",
                    action.tag
                )));
            }
        }
    }

    if let Some(port) = prev_port {
        collabs.vport_send(port, packet)?;
    }
    Ok(())
}

fn decode_push_mpls(payload: &[u8]) -> Result<(u32, u16)> {
    if payload.len() != 6 {
        return Err(EngineError::MalformedActions("PUSH_MPLS payload must be 6 bytes".into()));
    }
    let lse = u32::from_be_bytes(payload[0..4].try_into().unwrap());
    let ethertype = u16::from_be_bytes(payload[4..6].try_into().unwrap());
    Ok((lse, ethertype))
}

fn decode_push_vlan(payload: &[u8]) -> Result<(u16, u16)> {
    if payload.len() != 4 {
        return Err(EngineError::MalformedActions("PUSH_VLAN payload must be 4 bytes".into()));
    }
    let tpid = u16::from_be_bytes(payload[0..2].try_into().unwrap());
    let tci = u16::from_be_bytes(payload[2..4].try_into().unwrap());
    Ok((tpid, tci))
}

/// Platform L4 hash mixed with the action's basis. Coerces a zero result to one, since zero doubles as
/// "hash not computed" downstream.
fn mix_hash(key: &FlowKey, basis: u32) -> u32 {
    let mut h = basis.wrapping_mul(0x9E37_79B1).rotate_left(13);
    h ^= (key.tp.src as u32) << 16 | key.tp.dst as u32;
    h = h.wrapping_mul(0x85EB_CA6B).rotate_left(15);
    h ^= key.ipv4.src ^ key.ipv4.dst;
    h = h.wrapping_mul(0xC2B2_AE35).rotate_left(17);
    if h == 0 {
        1
    } else {
        h
    }
}

fn dispatch_userspace(
    packet: &PacketBuffer,
    key: &FlowKey,
    payload: &[u8],
    collabs: &mut dyn Collaborators,
) -> Result<()> {
    let mut userdata = Vec::new();
    let mut portid = None;
    let mut egress_tun_port = None;

    for attr in ActionListIter::new(payload) {
        let attr = attr?;
        match UserspaceAttrTag::from_u16(attr.tag) {
            Some(UserspaceAttrTag::Userdata) => userdata = attr.payload.to_vec(),
            Some(UserspaceAttrTag::Pid) => portid = Some(payload_as_u32(attr.payload)?),
            Some(UserspaceAttrTag::EgressTunPort) => {
                egress_tun_port = Some(payload_as_u32(attr.payload)?)
            }
            None => return Err(EngineError::MalformedActions("unknown USERSPACE attr".into())),
        }
    }

    let portid = portid.ok_or_else(|| EngineError::MalformedActions("USERSPACE missing PID".into()))?;
    if let Some(tun_port) = egress_tun_port {
        collabs.vport_get_egress_tunnel_info(tun_port, packet)?;
    }
    let info = UpcallInfo { userdata, portid, egress_tun_port };
    collabs.dp_upcall(packet, key, &info)
}

fn dispatch_set(buf: &mut PacketBuffer, key: &mut FlowKey, payload: &[u8]) -> Result<()> {
    let mut inner = ActionListIter::new(payload);
    let attr = match inner.next() {
        Some(r) => r?,
        None => return Err(EngineError::MalformedActions("empty SET payload".into())),
    };

    match SetAttrTag::from_u16(attr.tag) {
        Some(SetAttrTag::Priority) => {
            let priority = payload_as_u32(attr.payload)?;
            buf.set_priority(priority);
            key.phy.priority = priority;
        }
        Some(SetAttrTag::SkbMark) => {
            let mark = payload_as_u32(attr.payload)?;
            buf.set_skb_mark(mark);
            key.phy.skb_mark = mark;
        }
        Some(SetAttrTag::TunnelInfo) => {
            if attr.payload.len() != 12 {
                return Err(EngineError::MalformedActions("TUNNEL_INFO payload must be 12 bytes".into()));
            }
            let dst_ip = u32::from_be_bytes(attr.payload[0..4].try_into().unwrap());
            let tun_id = u64::from_be_bytes(attr.payload[4..12].try_into().unwrap());
            buf.set_tunnel_info(Some(TunnelInfo { dst_ip, tun_id }));
        }
        Some(SetAttrTag::Ethernet) => {
            if attr.payload.len() != 12 {
                return Err(EngineError::MalformedActions("ETHERNET payload must be 12 bytes".into()));
            }
            let src: [u8; 6] = attr.payload[0..6].try_into().unwrap();
            let dst: [u8; 6] = attr.payload[6..12].try_into().unwrap();
            ethernet::set_addresses(buf, key, src, dst)?;
        }
        Some(SetAttrTag::Ipv4) => {
            if attr.payload.len() != 11 {
                return Err(EngineError::MalformedActions("IPV4 payload must be 11 bytes".into()));
            }
            let src = u32::from_be_bytes(attr.payload[0..4].try_into().unwrap());
            let dst = u32::from_be_bytes(attr.payload[4..8].try_into().unwrap());
            let tos = attr.payload[8];
            let ttl = attr.payload[9];
            ipv4::set_src(buf, key, src)?;
            ipv4::set_dst(buf, key, dst)?;
            ipv4::set_tos(buf, key, tos)?;
            ipv4::set_ttl(buf, key, ttl)?;
        }
        Some(SetAttrTag::Ipv6) => {
            if attr.payload.len() != 39 {
                return Err(EngineError::MalformedActions("IPV6 payload must be 39 bytes".into()));
            }
            let src = Ipv6Addr::from(<[u8; 16]>::try_from(&attr.payload[0..16]).unwrap());
            let dst = Ipv6Addr::from(<[u8; 16]>::try_from(&attr.payload[16..32]).unwrap());
            let label = u32::from_be_bytes(attr.payload[32..36].try_into().unwrap());
            let tclass = attr.payload[36];
            let hlimit = attr.payload[37];
            ipv6::set_src(buf, key, src)?;
            ipv6::set_dst(buf, key, dst)?;
            ipv6::set_flow_label(buf, key, label)?;
            ipv6::set_traffic_class(buf, key, tclass)?;
            ipv6::set_hop_limit(buf, key, hlimit)?;
        }
        Some(SetAttrTag::Tcp) => {
            let (src, dst) = decode_ports(attr.payload)?;
            let t_off = transport_offset_for(buf)?;
            transport::set_tcp_ports(buf, key, t_off, Some(src), Some(dst))?;
        }
        Some(SetAttrTag::Udp) => {
            let (src, dst) = decode_ports(attr.payload)?;
            let t_off = transport_offset_for(buf)?;
            transport::set_udp_ports(buf, key, t_off, Some(src), Some(dst))?;
        }
        Some(SetAttrTag::Sctp) => {
            let (src, dst) = decode_ports(attr.payload)?;
            let t_off = transport_offset_for(buf)?;
            transport::set_sctp_ports(buf, key, t_off, Some(src), Some(dst))?;
        }
        Some(SetAttrTag::Mpls) => {
            let lse = payload_as_u32(attr.payload)?;
            mpls::set(buf, key, lse)?;
        }
        None => return Err(EngineError::MalformedActions("unknown SET attr".into())),
    }
    Ok(())
}

fn decode_ports(payload: &[u8]) -> Result<(u16, u16)> {
    if payload.len() != 4 {
        return Err(EngineError::MalformedActions("port payload must be 4 bytes".into()));
    }
    let src = u16::from_be_bytes(payload[0..2].try_into().unwrap());
    let dst = u16::from_be_bytes(payload[2..4].try_into().unwrap());
    Ok((src, dst))
}

fn transport_offset_for(buf: &PacketBuffer) -> Result<usize> {
    match buf.protocol() {
        ETH_P_IPV4 => ipv4::transport_offset(buf),
        ETH_P_IPV6 => ipv6::transport_offset(buf),
        other => Err(EngineError::MalformedActions(format!(
            "SET transport action on non-IP packet (protocol 0x{other:04x})"
        ))),
    }
}

/// SAMPLE never aborts the outer action list: a malformed attribute, an
/// unknown attribute tag, or a failure in the fast-path USERSPACE
/// dispatch are all dropped-sample-continue-outer-list, the same as a
/// full deferred FIFO below.
fn dispatch_sample(
    buf: &mut PacketBuffer,
    key: &mut FlowKey,
    payload: &[u8],
    collabs: &mut dyn Collaborators,
    deferred: &mut DeferredFifo,
    loop_warn: &mut RateLimiter,
) -> Result<()> {
    if let Err(err) = try_dispatch_sample(buf, key, payload, collabs, deferred, loop_warn) {
        if loop_warn.should_log() {
            tracing::warn!("dropping sample: {err}");
        }
    }
    Ok(())
}

fn try_dispatch_sample(
    buf: &mut PacketBuffer,
    key: &mut FlowKey,
    payload: &[u8],
    collabs: &mut dyn Collaborators,
    deferred: &mut DeferredFifo,
    loop_warn: &mut RateLimiter,
) -> Result<()> {
    let mut probability = None;
    let mut nested_actions: &[u8] = &[];

    for attr in ActionListIter::new(payload) {
        let attr = attr?;
        match SampleAttrTag::from_u16(attr.tag) {
            Some(SampleAttrTag::Probability) => probability = Some(payload_as_u32(attr.payload)?),
            Some(SampleAttrTag::Actions) => nested_actions = attr.payload,
            None => return Err(EngineError::MalformedActions("unknown SAMPLE attr".into())),
        }
    }
    let threshold = probability.unwrap_or(0);

    // Skip iff a fresh uniform draw is >= threshold.
    if collabs.next_u32() >= threshold {
        return Ok(());
    }

    if is_single_userspace_action(nested_actions) {
        // Fast path: execute directly against the live packet (USERSPACE
        // clones internally if the transport needs to retain the bytes).
        return dispatch_userspace_from_full_list(buf, key, nested_actions, collabs);
    }

    let clone = buf.clone_for_deferred();
    let entry = DeferredEntry { packet: clone, actions: Some(nested_actions.to_vec()), key: *key };
    if deferred.push(entry).is_err() && loop_warn.should_log() {
        tracing::warn!("deferred FIFO full, dropping sample");
    }
    Ok(())
}

/// The nested list is exactly one USERSPACE action spanning the whole
/// list.
fn is_single_userspace_action(nested_actions: &[u8]) -> bool {
    let mut iter = ActionListIter::new(nested_actions);
    let Some(Ok(first)) = iter.next() else { return false };
    if first.tag != ActionTag::Userspace.as_u16() {
        return false;
    }
    iter.next().is_none()
}

fn dispatch_userspace_from_full_list(
    buf: &PacketBuffer,
    key: &FlowKey,
    list: &[u8],
    collabs: &mut dyn Collaborators,
) -> Result<()> {
    let action = ActionListIter::new(list).next().unwrap()?;
    dispatch_userspace(buf, key, action.payload, collabs)
}

/// Returns `true` if the packet was consumed by recirculation (the
/// RECIRC was the last action and the interpreter should return
/// immediately).
fn dispatch_recirc(
    buf: &mut PacketBuffer,
    key: &mut FlowKey,
    recirc_id: u32,
    is_last: bool,
    collabs: &mut dyn Collaborators,
    deferred: &mut DeferredFifo,
    loop_warn: &mut RateLimiter,
) -> Result<bool> {
    if !key.is_valid() {
        collabs.flow_key_update(buf, key)?;
    }

    let mut recirc_key = *key;
    recirc_key.recirc_id = recirc_id;

    if !is_last {
        let clone = buf.clone_for_deferred();
        let entry = DeferredEntry { packet: clone, actions: None, key: recirc_key };
        if deferred.push(entry).is_err() && loop_warn.should_log() {
            tracing::warn!("deferred FIFO full, dropping recirc clone");
        }
        Ok(false)
    } else {
        let owned = std::mem::replace(buf, PacketBuffer::new(Vec::new(), 0));
        let entry = DeferredEntry { packet: owned, actions: None, key: recirc_key };
        if deferred.push(entry).is_err() && loop_warn.should_log() {
            tracing::warn!("deferred FIFO full, dropping recirc");
        }
        Ok(true)
    }
}

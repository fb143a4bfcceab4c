//! IPv6 header editor.

use crate::buffer::{PacketBuffer, IPPROTO_SCTP, IPPROTO_TCP, IPPROTO_UDP};
use crate::editors::transport;
use crate::error::{EngineError, Result};
use crate::flow_key::FlowKey;
use std::net::Ipv6Addr;

const IPPROTO_ICMPV6: u8 = 58;
const IPPROTO_ROUTING: u8 = 43;
const IPPROTO_HOP_BY_HOP: u8 = 0;
const IPPROTO_DEST_OPTS: u8 = 60;
const IPPROTO_FRAGMENT: u8 = 44;
const IPPROTO_NONE: u8 = 59;

const SRC_OFFSET: usize = 8;
const DST_OFFSET: usize = 24;

/// Result of walking the IPv6 extension header chain.
struct ExtHeaderScan {
    transport_offset: usize,
    transport_protocol: u8,
    saw_routing_header: bool,
}

/// Walk the extension header chain starting right after the 40-byte
/// fixed IPv6 header, stopping at the first transport-layer protocol
/// (or an unrecognized/unsupported extension header).
fn scan_extension_headers(buf: &PacketBuffer) -> Result<ExtHeaderScan> {
    let base = buf.network_header();
    let data = buf.data();
    let mut next_header = *data
        .get(base + 6)
        .ok_or_else(|| EngineError::MalformedActions("truncated IPv6 header".into()))?;
    let mut offset = base + 40;
    let mut saw_routing_header = false;

    loop {
        match next_header {
            IPPROTO_TCP | IPPROTO_UDP | IPPROTO_SCTP | IPPROTO_ICMPV6 | IPPROTO_NONE => {
                return Ok(ExtHeaderScan { transport_offset: offset, transport_protocol: next_header, saw_routing_header });
            }
            IPPROTO_HOP_BY_HOP | IPPROTO_DEST_OPTS | IPPROTO_ROUTING => {
                if next_header == IPPROTO_ROUTING {
                    saw_routing_header = true;
                }
                let nh = *data
                    .get(offset)
                    .ok_or_else(|| EngineError::MalformedActions("truncated IPv6 extension header".into()))?;
                let len_field = *data
                    .get(offset + 1)
                    .ok_or_else(|| EngineError::MalformedActions("truncated IPv6 extension header".into()))?;
                offset += (len_field as usize + 1) * 8;
                next_header = nh;
            }
            IPPROTO_FRAGMENT => {
                let nh = *data
                    .get(offset)
                    .ok_or_else(|| EngineError::MalformedActions("truncated IPv6 fragment header".into()))?;
                offset += 8;
                next_header = nh;
            }
            other => {
                // Unsupported extension header (e.g. AH): stop here rather
                // than guess its length.
                return Ok(ExtHeaderScan { transport_offset: offset, transport_protocol: other, saw_routing_header });
            }
        }
    }
}

/// Locate the transport header offset by walking the extension header
/// chain (needed to dispatch a SET(TCP/UDP/SCTP) action on an IPv6
/// packet).
pub fn transport_offset(buf: &PacketBuffer) -> Result<usize> {
    Ok(scan_extension_headers(buf)?.transport_offset)
}

fn read_addr(buf: &PacketBuffer, offset: usize) -> Result<[u8; 16]> {
    let abs = buf.network_header() + offset;
    buf.data()
        .get(abs..abs + 16)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| EngineError::MalformedActions("truncated IPv6 header".into()))
}

fn write_addr(buf: &mut PacketBuffer, offset: usize, value: &[u8; 16]) {
    let abs = buf.network_header() + offset;
    buf.data_mut()[abs..abs + 16].copy_from_slice(value);
}

fn propagate_transport_checksum(
    buf: &mut PacketBuffer,
    transport_offset: usize,
    protocol: u8,
    old: &[u8; 16],
    new: &[u8; 16],
) -> Result<()> {
    match protocol {
        IPPROTO_TCP => transport::adjust_tcp_checksum_for_ipv6(buf, transport_offset, old, new),
        IPPROTO_UDP => transport::adjust_udp_checksum_for_ipv6(buf, transport_offset, old, new),
        IPPROTO_ICMPV6 => transport::adjust_icmpv6_checksum_for_ipv6(buf, transport_offset, old, new),
        _ => Ok(()),
    }
}

/// Set the IPv6 source address.
pub fn set_src(buf: &mut PacketBuffer, key: &mut FlowKey, new: Ipv6Addr) -> Result<()> {
    buf.ensure_writable(buf.network_header() + 40)?;
    let old_bytes = read_addr(buf, SRC_OFFSET)?;
    let new_bytes = new.octets();
    if old_bytes == new_bytes {
        return Ok(());
    }
    write_addr(buf, SRC_OFFSET, &new_bytes);

    let scan = scan_extension_headers(buf)?;
    propagate_transport_checksum(buf, scan.transport_offset, scan.transport_protocol, &old_bytes, &new_bytes)?;

    buf.clear_hash();
    key.ipv6.src = new;
    Ok(())
}

/// Set the IPv6 destination address. Skips the transport checksum propagation when a Routing
/// extension header is present: the destination actually seen by L4
/// traversal differs from the header's literal destination field.
pub fn set_dst(buf: &mut PacketBuffer, key: &mut FlowKey, new: Ipv6Addr) -> Result<()> {
    buf.ensure_writable(buf.network_header() + 40)?;
    let old_bytes = read_addr(buf, DST_OFFSET)?;
    let new_bytes = new.octets();
    if old_bytes == new_bytes {
        return Ok(());
    }
    write_addr(buf, DST_OFFSET, &new_bytes);

    let scan = scan_extension_headers(buf)?;
    if !scan.saw_routing_header {
        propagate_transport_checksum(buf, scan.transport_offset, scan.transport_protocol, &old_bytes, &new_bytes)?;
    }

    buf.clear_hash();
    key.ipv6.dst = new;
    Ok(())
}

/// Set the traffic class (DSCP+ECN) byte, preserving the flow label.
pub fn set_traffic_class(buf: &mut PacketBuffer, key: &mut FlowKey, new_tclass: u8) -> Result<()> {
    buf.ensure_writable(buf.network_header() + 4)?;
    let off = buf.network_header();
    let word = u32::from_be_bytes(buf.data()[off..off + 4].try_into().unwrap());
    let new_word = (word & !(0xFFu32 << 20)) | ((new_tclass as u32) << 20);
    buf.data_mut()[off..off + 4].copy_from_slice(&new_word.to_be_bytes());
    key.ip.tos = new_tclass;
    Ok(())
}

/// Set the 20-bit flow label, preserving the traffic class.
pub fn set_flow_label(buf: &mut PacketBuffer, key: &mut FlowKey, new_label: u32) -> Result<()> {
    buf.ensure_writable(buf.network_header() + 4)?;
    let off = buf.network_header();
    let word = u32::from_be_bytes(buf.data()[off..off + 4].try_into().unwrap());
    let masked = new_label & 0x000F_FFFF;
    let new_word = (word & !0x000F_FFFF) | masked;
    buf.data_mut()[off..off + 4].copy_from_slice(&new_word.to_be_bytes());
    key.ipv6_label.label = masked;
    Ok(())
}

/// Set hop limit. IPv6 has no header
/// checksum, so this is a direct write with no incremental checksum math.
pub fn set_hop_limit(buf: &mut PacketBuffer, key: &mut FlowKey, new_hop_limit: u8) -> Result<()> {
    buf.ensure_writable(buf.network_header() + 8)?;
    let off = buf.network_header() + 7;
    buf.data_mut()[off] = new_hop_limit;
    key.ip.ttl = new_hop_limit;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv6_tcp_frame() -> PacketBuffer {
        let mut bytes = vec![0u8; 14 + 40 + 20];
        bytes[12..14].copy_from_slice(&0x86DDu16.to_be_bytes());
        let ip = 14usize;
        // version=6, tclass=0, flowlabel=0
        bytes[ip] = 0x60;
        bytes[ip + 6] = IPPROTO_TCP;
        bytes[ip + 7] = 64;
        bytes[ip + SRC_OFFSET..ip + SRC_OFFSET + 16]
            .copy_from_slice(&Ipv6Addr::LOCALHOST.octets());
        bytes[ip + DST_OFFSET..ip + DST_OFFSET + 16]
            .copy_from_slice(&Ipv6Addr::UNSPECIFIED.octets());
        let mut buf = PacketBuffer::new(bytes, 0x86DD);
        buf.set_network_header(ip);
        buf
    }

    #[test]
    fn set_src_updates_key_and_tcp_checksum() {
        let mut buf = ipv6_tcp_frame();
        let mut key = FlowKey::default();
        let transport_off = buf.network_header() + 40;
        let csum_off = transport_off + 16;
        buf.data_mut()[csum_off..csum_off + 2].copy_from_slice(&0x5555u16.to_be_bytes());
        let before = u16::from_be_bytes(buf.data()[csum_off..csum_off + 2].try_into().unwrap());

        let new_addr = "2001:db8::1".parse().unwrap();
        set_src(&mut buf, &mut key, new_addr).unwrap();

        let after = u16::from_be_bytes(buf.data()[csum_off..csum_off + 2].try_into().unwrap());
        assert_ne!(before, after);
        assert_eq!(key.ipv6.src, new_addr);
    }

    #[test]
    fn set_dst_skips_checksum_update_when_routing_header_present() {
        // Insert a minimal routing header (8 bytes: next_header=TCP, hdr_ext_len=0, ...).
        let mut bytes = vec![0u8; 14 + 40 + 8 + 20];
        bytes[12..14].copy_from_slice(&0x86DDu16.to_be_bytes());
        let ip = 14usize;
        bytes[ip] = 0x60;
        bytes[ip + 6] = IPPROTO_ROUTING;
        bytes[ip + 7] = 64;
        let routing_off = ip + 40;
        bytes[routing_off] = IPPROTO_TCP;
        bytes[routing_off + 1] = 0; // hdr_ext_len=0 -> 8-byte header
        let transport_off = routing_off + 8;
        let csum_off = transport_off + 16;
        bytes[csum_off..csum_off + 2].copy_from_slice(&0x4242u16.to_be_bytes());

        let mut buf = PacketBuffer::new(bytes, 0x86DD);
        buf.set_network_header(ip);
        let mut key = FlowKey::default();

        set_dst(&mut buf, &mut key, "2001:db8::2".parse().unwrap()).unwrap();

        let unchanged = u16::from_be_bytes(buf.data()[csum_off..csum_off + 2].try_into().unwrap());
        assert_eq!(unchanged, 0x4242);
        assert_eq!(key.ipv6.dst, "2001:db8::2".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn traffic_class_and_flow_label_are_independent() {
        let mut buf = ipv6_tcp_frame();
        let mut key = FlowKey::default();
        set_flow_label(&mut buf, &mut key, 0x0ABCDE).unwrap();
        set_traffic_class(&mut buf, &mut key, 0x2E).unwrap();

        assert_eq!(key.ip.tos, 0x2E);
        assert_eq!(key.ipv6_label.label, 0x0ABCDE);

        let off = buf.network_header();
        let word = u32::from_be_bytes(buf.data()[off..off + 4].try_into().unwrap());
        assert_eq!((word >> 20) & 0xFF, 0x2E);
        assert_eq!(word & 0xFFFFF, 0x0ABCDE);
        assert_eq!(word >> 28, 6); // version untouched
    }
}

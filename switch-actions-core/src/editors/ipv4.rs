//! IPv4 header editor.

use crate::buffer::{PacketBuffer, IPPROTO_SCTP, IPPROTO_TCP, IPPROTO_UDP};
use crate::checksum::replace2;
use crate::editors::transport;
use crate::error::{EngineError, Result};
use crate::flow_key::FlowKey;

const CHECKSUM_OFFSET: usize = 10;
const SRC_OFFSET: usize = 12;
const DST_OFFSET: usize = 16;

fn header_checksum(buf: &PacketBuffer) -> Result<u16> {
    let off = buf.network_header() + CHECKSUM_OFFSET;
    let bytes: [u8; 2] = buf.data()[off..off + 2]
        .try_into()
        .map_err(|_| EngineError::MalformedActions("truncated IPv4 header".into()))?;
    Ok(u16::from_be_bytes(bytes))
}

fn set_header_checksum(buf: &mut PacketBuffer, value: u16) {
    let off = buf.network_header() + CHECKSUM_OFFSET;
    buf.data_mut()[off..off + 2].copy_from_slice(&value.to_be_bytes());
}

fn protocol(buf: &PacketBuffer) -> Result<u8> {
    let off = buf.network_header() + 9;
    buf.data()
        .get(off)
        .copied()
        .ok_or_else(|| EngineError::MalformedActions("truncated IPv4 header".into()))
}

fn ihl_words(buf: &PacketBuffer) -> Result<usize> {
    let off = buf.network_header();
    let byte = *buf
        .data()
        .get(off)
        .ok_or_else(|| EngineError::MalformedActions("truncated IPv4 header".into()))?;
    Ok((byte & 0x0F) as usize)
}

/// Offset of the transport header, derived from the IHL field.
pub fn transport_offset(buf: &PacketBuffer) -> Result<usize> {
    Ok(buf.network_header() + ihl_words(buf)? * 4)
}

fn read_addr(buf: &PacketBuffer, offset: usize) -> Result<u32> {
    let abs = buf.network_header() + offset;
    let bytes: [u8; 4] = buf.data()[abs..abs + 4]
        .try_into()
        .map_err(|_| EngineError::MalformedActions("truncated IPv4 header".into()))?;
    Ok(u32::from_be_bytes(bytes))
}

fn write_addr(buf: &mut PacketBuffer, offset: usize, value: u32) {
    let abs = buf.network_header() + offset;
    buf.data_mut()[abs..abs + 4].copy_from_slice(&value.to_be_bytes());
}

/// Update one address field (src or dst), the IPv4 header checksum, and —
/// when present and not SCTP — the transport checksum's pseudo-header
/// contribution.
fn set_addr(buf: &mut PacketBuffer, key: &mut FlowKey, field_offset: usize, new: u32) -> Result<()> {
    buf.ensure_writable(buf.network_header() + 20)?;
    let old = read_addr(buf, field_offset)?;
    if old == new {
        return Ok(());
    }

    let old_check = header_checksum(buf)?;
    let new_check = replace2(old_check, (old >> 16) as u16, (new >> 16) as u16);
    let new_check = replace2(new_check, old as u16, new as u16);
    set_header_checksum(buf, new_check);
    write_addr(buf, field_offset, new);

    let proto = protocol(buf)?;
    if proto != IPPROTO_SCTP {
        if let Ok(t_off) = transport_offset(buf) {
            match proto {
                IPPROTO_TCP => transport::adjust_tcp_checksum_for_ipv4(buf, t_off, old, new)?,
                IPPROTO_UDP => transport::adjust_udp_checksum_for_ipv4(buf, t_off, old, new)?,
                _ => {}
            }
        }
    }

    buf.clear_hash();
    if field_offset == SRC_OFFSET {
        key.ipv4.src = new;
    } else {
        key.ipv4.dst = new;
    }
    Ok(())
}

pub fn set_src(buf: &mut PacketBuffer, key: &mut FlowKey, new_src: u32) -> Result<()> {
    set_addr(buf, key, SRC_OFFSET, new_src)
}

pub fn set_dst(buf: &mut PacketBuffer, key: &mut FlowKey, new_dst: u32) -> Result<()> {
    set_addr(buf, key, DST_OFFSET, new_dst)
}

/// Set the DSCP+ECN byte, preserving untouched bits via a caller-supplied
/// mask.
pub fn set_tos(buf: &mut PacketBuffer, key: &mut FlowKey, new_tos: u8) -> Result<()> {
    buf.ensure_writable(buf.network_header() + 2)?;
    let off = buf.network_header() + 1;
    let old_tos = buf.data()[off];
    if old_tos == new_tos {
        return Ok(());
    }
    let old_check = header_checksum(buf)?;
    let old_word = u16::from_be_bytes([old_tos, buf.data()[buf.network_header()]]);
    let new_word = u16::from_be_bytes([new_tos, buf.data()[buf.network_header()]]);
    let new_check = replace2(old_check, old_word, new_word);
    set_header_checksum(buf, new_check);
    buf.data_mut()[off] = new_tos;
    key.ip.tos = new_tos;
    Ok(())
}

/// Set TTL.
pub fn set_ttl(buf: &mut PacketBuffer, key: &mut FlowKey, new_ttl: u8) -> Result<()> {
    buf.ensure_writable(buf.network_header() + 10)?;
    let off = buf.network_header() + 8;
    let old_ttl = buf.data()[off];
    if old_ttl == new_ttl {
        return Ok(());
    }
    let proto = buf.data()[off + 1];
    let old_check = header_checksum(buf)?;
    let old_word = u16::from_be_bytes([old_ttl, proto]);
    let new_word = u16::from_be_bytes([new_ttl, proto]);
    let new_check = replace2(old_check, old_word, new_word);
    set_header_checksum(buf, new_check);
    buf.data_mut()[off] = new_ttl;
    key.ip.ttl = new_ttl;
    Ok(())
}

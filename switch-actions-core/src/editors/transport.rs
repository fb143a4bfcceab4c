//! TCP/UDP/SCTP port rewrite editor and the pseudo-header checksum
//! adjustments IPv4/IPv6 address edits feed into it.

use crate::buffer::{ChecksumMode, PacketBuffer};
use crate::checksum::{mangle_zero, replace16, replace2, replace4, sctp_cksum};
use crate::error::{EngineError, Result};
use crate::flow_key::FlowKey;

const TCP_CHECKSUM_OFFSET: usize = 16;
const UDP_CHECKSUM_OFFSET: usize = 6;
const SCTP_CHECKSUM_OFFSET: usize = 8;

fn read_u16(buf: &PacketBuffer, offset: usize) -> Result<u16> {
    buf.data()
        .get(offset..offset + 2)
        .map(|s| u16::from_be_bytes([s[0], s[1]]))
        .ok_or_else(|| EngineError::MalformedActions("truncated transport header".into()))
}

/// Reflect an IPv4 address change into a TCP checksum's pseudo-header
/// contribution. Always performed, regardless of checksum mode.
pub fn adjust_tcp_checksum_for_ipv4(
    buf: &mut PacketBuffer,
    transport_offset: usize,
    old_addr: u32,
    new_addr: u32,
) -> Result<()> {
    let csum_off = transport_offset + TCP_CHECKSUM_OFFSET;
    let Ok(old_check) = read_u16(buf, csum_off) else { return Ok(()) };
    let new_check = replace4(old_check, old_addr, new_addr, true);
    buf.data_mut()[csum_off..csum_off + 2].copy_from_slice(&new_check.to_be_bytes());
    Ok(())
}

/// As [`adjust_tcp_checksum_for_ipv4`], for UDP: skipped entirely when the
/// stored checksum is the "not computed" zero sentinel and mode isn't
/// PARTIAL; mangles a would-be-zero result otherwise.
pub fn adjust_udp_checksum_for_ipv4(
    buf: &mut PacketBuffer,
    transport_offset: usize,
    old_addr: u32,
    new_addr: u32,
) -> Result<()> {
    let csum_off = transport_offset + UDP_CHECKSUM_OFFSET;
    let Ok(old_check) = read_u16(buf, csum_off) else { return Ok(()) };
    if old_check == 0 && buf.checksum_mode() != ChecksumMode::Partial {
        return Ok(());
    }
    let new_check = mangle_zero(replace4(old_check, old_addr, new_addr, true));
    buf.data_mut()[csum_off..csum_off + 2].copy_from_slice(&new_check.to_be_bytes());
    Ok(())
}

/// IPv6 analogue of [`adjust_tcp_checksum_for_ipv4`].
pub fn adjust_tcp_checksum_for_ipv6(
    buf: &mut PacketBuffer,
    transport_offset: usize,
    old_addr: &[u8; 16],
    new_addr: &[u8; 16],
) -> Result<()> {
    let csum_off = transport_offset + TCP_CHECKSUM_OFFSET;
    let Ok(old_check) = read_u16(buf, csum_off) else { return Ok(()) };
    let new_check = replace16(old_check, old_addr, new_addr);
    buf.data_mut()[csum_off..csum_off + 2].copy_from_slice(&new_check.to_be_bytes());
    Ok(())
}

/// ICMPv6 checksum also covers the IPv6 pseudo-header (unlike ICMPv4,
/// which has none); no "not computed" zero convention applies.
pub fn adjust_icmpv6_checksum_for_ipv6(
    buf: &mut PacketBuffer,
    transport_offset: usize,
    old_addr: &[u8; 16],
    new_addr: &[u8; 16],
) -> Result<()> {
    const ICMPV6_CHECKSUM_OFFSET: usize = 2;
    let csum_off = transport_offset + ICMPV6_CHECKSUM_OFFSET;
    let Ok(old_check) = read_u16(buf, csum_off) else { return Ok(()) };
    let new_check = replace16(old_check, old_addr, new_addr);
    buf.data_mut()[csum_off..csum_off + 2].copy_from_slice(&new_check.to_be_bytes());
    Ok(())
}

/// IPv6 analogue of [`adjust_udp_checksum_for_ipv4`].
pub fn adjust_udp_checksum_for_ipv6(
    buf: &mut PacketBuffer,
    transport_offset: usize,
    old_addr: &[u8; 16],
    new_addr: &[u8; 16],
) -> Result<()> {
    let csum_off = transport_offset + UDP_CHECKSUM_OFFSET;
    let Ok(old_check) = read_u16(buf, csum_off) else { return Ok(()) };
    if old_check == 0 && buf.checksum_mode() != ChecksumMode::Partial {
        return Ok(());
    }
    let new_check = mangle_zero(replace16(old_check, old_addr, new_addr));
    buf.data_mut()[csum_off..csum_off + 2].copy_from_slice(&new_check.to_be_bytes());
    Ok(())
}

/// Set TCP source/destination ports.
pub fn set_tcp_ports(
    buf: &mut PacketBuffer,
    key: &mut FlowKey,
    transport_offset: usize,
    new_src: Option<u16>,
    new_dst: Option<u16>,
) -> Result<()> {
    buf.ensure_writable(transport_offset + TCP_CHECKSUM_OFFSET + 2)?;
    let csum_off = transport_offset + TCP_CHECKSUM_OFFSET;
    let mut check = read_u16(buf, csum_off)?;
    let mut touched = false;

    if let Some(new_src) = new_src {
        let old_src = read_u16(buf, transport_offset)?;
        if old_src != new_src {
            check = replace2(check, old_src, new_src);
            buf.data_mut()[transport_offset..transport_offset + 2].copy_from_slice(&new_src.to_be_bytes());
            key.tp.src = new_src;
            touched = true;
        }
    }
    if let Some(new_dst) = new_dst {
        let old_dst = read_u16(buf, transport_offset + 2)?;
        if old_dst != new_dst {
            check = replace2(check, old_dst, new_dst);
            buf.data_mut()[transport_offset + 2..transport_offset + 4].copy_from_slice(&new_dst.to_be_bytes());
            key.tp.dst = new_dst;
            touched = true;
        }
    }

    if touched {
        buf.data_mut()[csum_off..csum_off + 2].copy_from_slice(&check.to_be_bytes());
        buf.clear_hash();
    }
    Ok(())
}

/// Set UDP source/destination ports.
pub fn set_udp_ports(
    buf: &mut PacketBuffer,
    key: &mut FlowKey,
    transport_offset: usize,
    new_src: Option<u16>,
    new_dst: Option<u16>,
) -> Result<()> {
    buf.ensure_writable(transport_offset + UDP_CHECKSUM_OFFSET + 2)?;
    let csum_off = transport_offset + UDP_CHECKSUM_OFFSET;
    let stored = read_u16(buf, csum_off)?;
    let skip_checksum = stored == 0 && buf.checksum_mode() != ChecksumMode::Partial;
    let mut check = stored;
    let mut touched = false;

    if let Some(new_src) = new_src {
        let old_src = read_u16(buf, transport_offset)?;
        if old_src != new_src {
            if !skip_checksum {
                check = replace2(check, old_src, new_src);
            }
            buf.data_mut()[transport_offset..transport_offset + 2].copy_from_slice(&new_src.to_be_bytes());
            key.tp.src = new_src;
            touched = true;
        }
    }
    if let Some(new_dst) = new_dst {
        let old_dst = read_u16(buf, transport_offset + 2)?;
        if old_dst != new_dst {
            if !skip_checksum {
                check = replace2(check, old_dst, new_dst);
            }
            buf.data_mut()[transport_offset + 2..transport_offset + 4].copy_from_slice(&new_dst.to_be_bytes());
            key.tp.dst = new_dst;
            touched = true;
        }
    }

    if touched {
        if !skip_checksum {
            buf.data_mut()[csum_off..csum_off + 2].copy_from_slice(&mangle_zero(check).to_be_bytes());
        }
        buf.clear_hash();
    }
    Ok(())
}

/// Set SCTP source/destination ports, preserving any pre-existing CRC32-C
/// corruption via the XOR-delta identity: `old_stored XOR old_correct XOR new_correct`.
pub fn set_sctp_ports(
    buf: &mut PacketBuffer,
    key: &mut FlowKey,
    transport_offset: usize,
    new_src: Option<u16>,
    new_dst: Option<u16>,
) -> Result<()> {
    buf.ensure_writable(transport_offset + SCTP_CHECKSUM_OFFSET + 4)?;
    let csum_off = transport_offset + SCTP_CHECKSUM_OFFSET;
    let old_src = read_u16(buf, transport_offset)?;
    let old_dst = read_u16(buf, transport_offset + 2)?;
    let new_src_val = new_src.unwrap_or(old_src);
    let new_dst_val = new_dst.unwrap_or(old_dst);
    if new_src_val == old_src && new_dst_val == old_dst {
        return Ok(());
    }

    let old_stored = u32::from_be_bytes(buf.data()[csum_off..csum_off + 4].try_into().unwrap());
    buf.data_mut()[csum_off..csum_off + 4].fill(0);
    let old_correct = sctp_cksum(buf.data(), transport_offset);

    buf.data_mut()[transport_offset..transport_offset + 2].copy_from_slice(&new_src_val.to_be_bytes());
    buf.data_mut()[transport_offset + 2..transport_offset + 4].copy_from_slice(&new_dst_val.to_be_bytes());
    buf.data_mut()[csum_off..csum_off + 4].fill(0);
    let new_correct = sctp_cksum(buf.data(), transport_offset);

    let stored = old_stored ^ old_correct ^ new_correct;
    buf.data_mut()[csum_off..csum_off + 4].copy_from_slice(&stored.to_be_bytes());

    if let Some(s) = new_src {
        key.tp.src = s;
    }
    if let Some(d) = new_dst {
        key.tp.dst = d;
    }
    buf.clear_hash();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_segment(transport_offset: usize) -> PacketBuffer {
        let mut bytes = vec![0u8; transport_offset + 20];
        bytes[transport_offset..transport_offset + 2].copy_from_slice(&1000u16.to_be_bytes());
        bytes[transport_offset + 2..transport_offset + 4].copy_from_slice(&80u16.to_be_bytes());
        bytes[transport_offset + 16..transport_offset + 18].copy_from_slice(&0x1234u16.to_be_bytes());
        PacketBuffer::new(bytes, 0x0800)
    }

    #[test]
    fn tcp_port_rewrite_updates_checksum() {
        let mut buf = tcp_segment(34);
        let mut key = FlowKey::default();
        let before = read_u16(&buf, 34 + TCP_CHECKSUM_OFFSET).unwrap();
        set_tcp_ports(&mut buf, &mut key, 34, None, Some(8080)).unwrap();
        let after = read_u16(&buf, 34 + TCP_CHECKSUM_OFFSET).unwrap();
        assert_ne!(before, after);
        assert_eq!(key.tp.dst, 8080);
        // restoring the port restores the checksum
        set_tcp_ports(&mut buf, &mut key, 34, None, Some(80)).unwrap();
        assert_eq!(read_u16(&buf, 34 + TCP_CHECKSUM_OFFSET).unwrap(), before);
    }

    #[test]
    fn udp_zero_checksum_is_left_alone() {
        let mut bytes = vec![0u8; 42];
        bytes[14..16].copy_from_slice(&1000u16.to_be_bytes());
        bytes[16..18].copy_from_slice(&53u16.to_be_bytes());
        // checksum field stays 0
        let mut buf = PacketBuffer::new(bytes, 0x0800);
        let mut key = FlowKey::default();
        set_udp_ports(&mut buf, &mut key, 14, None, Some(5353)).unwrap();
        assert_eq!(read_u16(&buf, 14 + UDP_CHECKSUM_OFFSET).unwrap(), 0);
        assert_eq!(key.tp.dst, 5353);
    }

    #[test]
    fn udp_nonzero_checksum_never_becomes_literal_zero() {
        let mut bytes = vec![0u8; 42];
        bytes[14..16].copy_from_slice(&1000u16.to_be_bytes());
        bytes[16..18].copy_from_slice(&53u16.to_be_bytes());
        bytes[20..22].copy_from_slice(&0x0001u16.to_be_bytes());
        let mut buf = PacketBuffer::new(bytes, 0x0800);
        let mut key = FlowKey::default();
        set_udp_ports(&mut buf, &mut key, 14, None, Some(1000 ^ 0x0001)).unwrap();
        assert_ne!(read_u16(&buf, 14 + UDP_CHECKSUM_OFFSET).unwrap(), 0);
    }

    #[test]
    fn sctp_port_rewrite_preserves_xor_corruption() {
        let transport_offset = 34;
        let mut bytes = vec![0u8; transport_offset + 16];
        bytes[transport_offset..transport_offset + 2].copy_from_slice(&1000u16.to_be_bytes());
        bytes[transport_offset + 2..transport_offset + 4].copy_from_slice(&80u16.to_be_bytes());
        let mut buf = PacketBuffer::new(bytes, 0x0800);

        // Compute the correct checksum, then store a deliberately corrupted one.
        buf.data_mut()[transport_offset + SCTP_CHECKSUM_OFFSET..transport_offset + SCTP_CHECKSUM_OFFSET + 4].fill(0);
        let correct = sctp_cksum(buf.data(), transport_offset);
        let corruption_delta = 0xDEAD_BEEFu32;
        let corrupted_stored = correct ^ corruption_delta;
        buf.data_mut()[transport_offset + SCTP_CHECKSUM_OFFSET..transport_offset + SCTP_CHECKSUM_OFFSET + 4]
            .copy_from_slice(&corrupted_stored.to_be_bytes());

        let mut key = FlowKey::default();
        set_sctp_ports(&mut buf, &mut key, transport_offset, None, Some(8080)).unwrap();

        let new_stored = u32::from_be_bytes(
            buf.data()[transport_offset + SCTP_CHECKSUM_OFFSET..transport_offset + SCTP_CHECKSUM_OFFSET + 4]
                .try_into()
                .unwrap(),
        );
        let saved = new_stored;
        buf.data_mut()[transport_offset + SCTP_CHECKSUM_OFFSET..transport_offset + SCTP_CHECKSUM_OFFSET + 4].fill(0);
        let new_correct = sctp_cksum(buf.data(), transport_offset);
        assert_eq!(saved ^ new_correct, corruption_delta);
    }
}

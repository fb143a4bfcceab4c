//! MPLS push/pop/set editor.
//!
//! `mac_len` never includes the MPLS label stack, so the
//! label stack entry (LSE) always lands immediately after the mac header
//! and `network_header` is defined to point at it — from the switch's
//! point of view, MPLS *is* the network layer once pushed.

use crate::buffer::{ChecksumMode, PacketBuffer, MPLS_LSE_LEN};
use crate::checksum::running_sum_add;
use crate::error::Result;
use crate::flow_key::FlowKey;

/// Push an MPLS label.
pub fn push(buf: &mut PacketBuffer, key: &mut FlowKey, lse: u32, ethertype: u16) -> Result<()> {
    let mac_len = buf.mac_len();
    buf.ensure_writable(buf.mac_header() + mac_len)?;

    // Make 4 bytes of headroom, then slide the mac header back into place
    // at the front, leaving a clean gap at [mac_len, mac_len+4) for the LSE.
    buf.push_front(MPLS_LSE_LEN)?;
    buf.data_mut().copy_within(MPLS_LSE_LEN..MPLS_LSE_LEN + mac_len, 0);
    buf.reset_mac_header();

    let lse_bytes = lse.to_be_bytes();
    buf.data_mut()[mac_len..mac_len + MPLS_LSE_LEN].copy_from_slice(&lse_bytes);

    let ethertype_off = buf.ethertype_offset();
    let old_protocol = u16::from_be_bytes([
        buf.data()[ethertype_off],
        buf.data()[ethertype_off + 1],
    ]);
    buf.data_mut()[ethertype_off..ethertype_off + 2].copy_from_slice(&ethertype.to_be_bytes());

    if buf.inner_protocol().is_none() {
        buf.set_inner_protocol(Some(old_protocol));
    }
    buf.set_protocol(ethertype);
    buf.set_network_header(buf.mac_header() + mac_len);
    buf.set_transport_header(buf.transport_header() + MPLS_LSE_LEN);

    if buf.checksum_mode() == ChecksumMode::Complete {
        let sum = running_sum_add(buf.running_checksum(), &lse_bytes);
        buf.set_running_checksum(sum);
    }

    key.invalidate();
    Ok(())
}

/// Pop the outermost MPLS label.
pub fn pop(buf: &mut PacketBuffer, key: &mut FlowKey, replacement_ethertype: u16) -> Result<()> {
    let mac_len = buf.mac_len();
    buf.ensure_writable(buf.mac_header() + mac_len + MPLS_LSE_LEN)?;

    let lse_bytes: [u8; 4] = buf.data()[mac_len..mac_len + MPLS_LSE_LEN].try_into().unwrap();
    if buf.checksum_mode() == ChecksumMode::Complete {
        let sum = crate::checksum::running_sum_sub(buf.running_checksum(), &lse_bytes);
        buf.set_running_checksum(sum);
    }

    buf.data_mut().copy_within(0..mac_len, MPLS_LSE_LEN);
    buf.pull_front(MPLS_LSE_LEN)?;
    buf.reset_mac_header();

    let ethertype_off = buf.ethertype_offset();
    buf.data_mut()[ethertype_off..ethertype_off + 2]
        .copy_from_slice(&replacement_ethertype.to_be_bytes());

    if matches!(buf.protocol(), crate::buffer::ETH_P_MPLS_UC | crate::buffer::ETH_P_MPLS_MC) {
        buf.set_protocol(replacement_ethertype);
    }
    buf.set_network_header(buf.mac_header() + mac_len);
    buf.set_transport_header(buf.transport_header().saturating_sub(MPLS_LSE_LEN));

    key.invalidate();
    Ok(())
}

/// Overwrite the top LSE in place.
pub fn set(buf: &mut PacketBuffer, key: &mut FlowKey, new_lse: u32) -> Result<()> {
    let mac_len = buf.mac_len();
    buf.ensure_writable(buf.mac_header() + mac_len + MPLS_LSE_LEN)?;

    let old_lse_bytes: [u8; 4] = buf.data()[mac_len..mac_len + MPLS_LSE_LEN].try_into().unwrap();
    let old_lse = u32::from_be_bytes(old_lse_bytes);

    if buf.checksum_mode() == ChecksumMode::Complete {
        let sum = crate::checksum::replace4(buf.running_checksum(), old_lse, new_lse, false);
        buf.set_running_checksum(sum);
    }

    buf.data_mut()[mac_len..mac_len + MPLS_LSE_LEN].copy_from_slice(&new_lse.to_be_bytes());
    key.mpls.top_lse = new_lse;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ETH_P_MPLS_UC;

    fn frame() -> PacketBuffer {
        let mut bytes = vec![0u8; 64];
        bytes[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        PacketBuffer::new(bytes, 0x0800)
    }

    #[test]
    fn push_preserves_mac_len_invariant() {
        let mut buf = frame();
        let mut key = FlowKey::default();
        push(&mut buf, &mut key, 0x0001_0100, ETH_P_MPLS_UC).unwrap();
        assert_eq!(buf.network_header() - buf.mac_header(), buf.mac_len());
        assert_eq!(&buf.data()[12..14], &ETH_P_MPLS_UC.to_be_bytes());
        assert_eq!(buf.protocol(), ETH_P_MPLS_UC);
        assert_eq!(buf.inner_protocol(), Some(0x0800));
        assert!(!key.is_valid());
    }

    #[test]
    fn push_then_pop_restores_bytes_and_mac_len() {
        let mut buf = frame();
        let original = buf.data().to_vec();
        let original_mac_len = buf.mac_len();
        let mut key = FlowKey::default();

        push(&mut buf, &mut key, 0x0001_0100, ETH_P_MPLS_UC).unwrap();
        pop(&mut buf, &mut key, 0x0800).unwrap();

        assert_eq!(buf.data(), original.as_slice());
        assert_eq!(buf.mac_len(), original_mac_len);
        assert_eq!(buf.protocol(), 0x0800);
    }

    #[test]
    fn set_updates_key_and_checksum() {
        let mut buf = frame();
        let mut key = FlowKey::default();
        push(&mut buf, &mut key, 0x0001_0100, ETH_P_MPLS_UC).unwrap();
        buf.set_checksum_mode(ChecksumMode::Complete);
        buf.set_running_checksum(0xABCD);
        let before = buf.running_checksum();

        set(&mut buf, &mut key, 0x0002_0200).unwrap();
        assert_eq!(key.mpls.top_lse, 0x0002_0200);
        assert_ne!(buf.running_checksum(), before);

        set(&mut buf, &mut key, 0x0001_0100).unwrap();
        assert_eq!(buf.running_checksum(), before);
    }
}

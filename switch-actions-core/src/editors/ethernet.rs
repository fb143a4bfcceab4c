//! Ethernet address editor.

use crate::buffer::{ChecksumMode, PacketBuffer, ETH_HEADER_LEN};
use crate::checksum::{running_sum_add, running_sum_sub};
use crate::error::Result;
use crate::flow_key::FlowKey;

/// Set Ethernet source and destination addresses.
///
/// "Ensure first 14 bytes writable; write src and dst; update running
/// checksum (COMPLETE mode) by subtracting old 12 bytes and adding new 12
/// bytes; update the flow key's `eth.src`/`eth.dst`."
pub fn set_addresses(
    buf: &mut PacketBuffer,
    key: &mut FlowKey,
    src: [u8; 6],
    dst: [u8; 6],
) -> Result<()> {
    buf.ensure_writable(ETH_HEADER_LEN)?;
    let old: [u8; 12] = buf.data()[0..12].try_into().unwrap();

    if buf.checksum_mode() == ChecksumMode::Complete {
        let mut sum = running_sum_sub(buf.running_checksum(), &old);
        let mut new = [0u8; 12];
        new[0..6].copy_from_slice(&dst);
        new[6..12].copy_from_slice(&src);
        sum = running_sum_add(sum, &new);
        buf.set_running_checksum(sum);
    }

    let data = buf.data_mut();
    data[0..6].copy_from_slice(&dst);
    data[6..12].copy_from_slice(&src);

    key.eth.src = src;
    key.eth.dst = dst;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> PacketBuffer {
        let mut bytes = vec![0u8; 64];
        bytes[0..6].copy_from_slice(&[1, 1, 1, 1, 1, 1]);
        bytes[6..12].copy_from_slice(&[2, 2, 2, 2, 2, 2]);
        bytes[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        PacketBuffer::new(bytes, 0x0800)
    }

    #[test]
    fn rewrites_addresses_and_key() {
        let mut buf = frame();
        let mut key = FlowKey::default();
        let new_src = [9, 9, 9, 9, 9, 9];
        let new_dst = [8, 8, 8, 8, 8, 8];
        set_addresses(&mut buf, &mut key, new_src, new_dst).unwrap();
        assert_eq!(&buf.data()[0..6], &new_dst);
        assert_eq!(&buf.data()[6..12], &new_src);
        assert_eq!(key.eth.src, new_src);
        assert_eq!(key.eth.dst, new_dst);
    }

    #[test]
    fn complete_checksum_updates_consistently() {
        let mut buf = frame();
        buf.set_checksum_mode(ChecksumMode::Complete);
        buf.set_running_checksum(0x1234);
        let mut key = FlowKey::default();
        let before = buf.running_checksum();
        set_addresses(&mut buf, &mut key, [9; 6], [8; 6]).unwrap();
        assert_ne!(buf.running_checksum(), before);
        // Reverting the edit should restore the original running sum.
        let orig_src = [1u8, 1, 1, 1, 1, 1];
        let orig_dst = [2u8, 2, 2, 2, 2, 2];
        set_addresses(&mut buf, &mut key, orig_src, orig_dst).unwrap();
        assert_eq!(buf.running_checksum(), before);
    }
}

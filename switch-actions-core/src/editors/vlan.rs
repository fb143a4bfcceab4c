//! VLAN push/pop editor.

use crate::buffer::{ChecksumMode, PacketBuffer, VlanOffload, ETH_P_8021Q, VLAN_HEADER_LEN};
use crate::checksum::running_sum_add;
use crate::error::Result;
use crate::flow_key::FlowKey;

/// Offset where a VLAN tag lives in packet bytes once materialized: right
/// after the 12-byte address pair, before the (now inner) ethertype.
const VLAN_TAG_OFFSET: usize = 12;

/// Materialize `offload` into packet bytes at [`VLAN_TAG_OFFSET`],
/// growing `mac_len` by 4 and folding the new bytes into a COMPLETE
/// running checksum.
fn materialize(buf: &mut PacketBuffer, offload: VlanOffload) -> Result<()> {
    buf.ensure_writable(buf.mac_header() + buf.mac_len())?;
    buf.insert_at(buf.mac_header() + VLAN_TAG_OFFSET, VLAN_HEADER_LEN)?;
    let inserted_at = buf.mac_header() + VLAN_TAG_OFFSET;
    let tag_bytes = {
        let data = buf.data_mut();
        data[inserted_at..inserted_at + 2].copy_from_slice(&offload.tpid.to_be_bytes());
        data[inserted_at + 2..inserted_at + 4].copy_from_slice(&offload.tci.to_be_bytes());
        [
            data[inserted_at],
            data[inserted_at + 1],
            data[inserted_at + 2],
            data[inserted_at + 3],
        ]
    };
    buf.set_mac_len(buf.mac_len() + VLAN_HEADER_LEN);
    if buf.checksum_mode() == ChecksumMode::Complete {
        let sum = running_sum_add(buf.running_checksum(), &tag_bytes);
        buf.set_running_checksum(sum);
    }
    Ok(())
}

/// Push a VLAN tag.
pub fn push(buf: &mut PacketBuffer, key: &mut FlowKey, tpid: u16, tci: u16) -> Result<()> {
    if let Some(existing) = buf.vlan_offload() {
        materialize(buf, existing)?;
        key.invalidate();
    } else {
        key.eth.tci = tci;
    }
    buf.set_vlan_offload(Some(VlanOffload { tpid, tci }));
    Ok(())
}

/// Pop a VLAN tag.
pub fn pop(buf: &mut PacketBuffer, key: &mut FlowKey) -> Result<()> {
    if buf.vlan_offload().is_some() {
        buf.set_vlan_offload(None);
        key.eth.tci = 0;
        return Ok(());
    }

    if buf.ethertype_offset() + 2 > buf.len() {
        return Ok(());
    }
    let outer_ethertype = u16::from_be_bytes([
        buf.data()[buf.ethertype_offset()],
        buf.data()[buf.ethertype_offset() + 1],
    ]);
    if outer_ethertype != ETH_P_8021Q || buf.len() < buf.mac_header() + buf.mac_len() {
        return Ok(());
    }

    pop_one_tag_from_bytes(buf)?;

    // If, after popping, a second stacked VLAN is present in the bytes,
    // pop that one too and promote it into the hardware offload slot.
    if buf.ethertype_offset() + 2 <= buf.len() {
        let now_outer = u16::from_be_bytes([
            buf.data()[buf.ethertype_offset()],
            buf.data()[buf.ethertype_offset() + 1],
        ]);
        if now_outer == ETH_P_8021Q {
            let tag_off = buf.mac_header() + VLAN_TAG_OFFSET;
            let tpid = u16::from_be_bytes([buf.data()[tag_off], buf.data()[tag_off + 1]]);
            let tci = u16::from_be_bytes([buf.data()[tag_off + 2], buf.data()[tag_off + 3]]);
            pop_one_tag_from_bytes(buf)?;
            buf.set_vlan_offload(Some(VlanOffload { tpid, tci }));
            key.invalidate();
            return Ok(());
        }
    }

    key.eth.tci = 0;
    Ok(())
}

/// Remove one 4-byte VLAN header already present in packet bytes at
/// [`VLAN_TAG_OFFSET`], shrinking `mac_len` and folding the removed bytes
/// out of a COMPLETE running checksum.
fn pop_one_tag_from_bytes(buf: &mut PacketBuffer) -> Result<()> {
    let tag_off = buf.mac_header() + VLAN_TAG_OFFSET;
    let removed: [u8; 4] = buf.data()[tag_off..tag_off + 4].try_into().unwrap();
    buf.remove_at(tag_off, VLAN_HEADER_LEN)?;
    buf.set_mac_len(buf.mac_len() - VLAN_HEADER_LEN);
    if buf.checksum_mode() == ChecksumMode::Complete {
        let sum = crate::checksum::running_sum_sub(buf.running_checksum(), &removed);
        buf.set_running_checksum(sum);
    }
    Ok(())
}

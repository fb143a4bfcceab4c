//! TOML scenario format for the demo harness: a synthetic packet, an
//! action list expressed as structured data instead of raw TLV bytes,
//! and the CPU the scenario should run on.

use serde::Deserialize;
use std::net::{Ipv4Addr, Ipv6Addr};
use switch_actions_core::ActionListBuilder;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub cpu_id: usize,
    pub packet: PacketSpec,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Deserialize)]
pub struct PacketSpec {
    /// Outer ethertype, e.g. `2048` for IPv4, `34525` for IPv6.
    pub protocol: u16,
    /// Raw frame bytes as a hex string (no `0x` prefix, no separators).
    pub bytes_hex: String,
}

impl PacketSpec {
    pub fn decode_bytes(&self) -> Result<Vec<u8>, String> {
        decode_hex(&self.bytes_hex)
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("hex string must have an even number of digits".into());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    Output { port: u32 },
    Recirc { recirc_id: u32 },
    Hash { basis: u32 },
    PushVlan { tpid: u16, tci: u16 },
    PopVlan,
    PushMpls { lse: u32, ethertype: u16 },
    PopMpls { ethertype: u16 },
    SetPriority { priority: u32 },
    SetSkbMark { mark: u32 },
    SetMpls { lse: u32 },
    SetEthernet { src: [u8; 6], dst: [u8; 6] },
    SetIpv4 { src: Ipv4Addr, dst: Ipv4Addr, tos: u8, ttl: u8, proto: u8 },
    SetIpv6 { src: Ipv6Addr, dst: Ipv6Addr, label: u32, tclass: u8, hlimit: u8 },
    SetTcp { src: u16, dst: u16 },
    SetUdp { src: u16, dst: u16 },
    SetSctp { src: u16, dst: u16 },
    Userspace { pid: u32, #[serde(default)] userdata: Vec<u8> },
    Sample { probability: u32, actions: Vec<ActionSpec> },
}

/// Encode a scenario's structured action list into the engine's TLV wire
/// format, recursing into SAMPLE's nested list.
pub fn build_actions(specs: &[ActionSpec]) -> Vec<u8> {
    let mut builder = ActionListBuilder::new();
    append_actions(&mut builder, specs);
    builder.build()
}

fn append_actions(builder: &mut ActionListBuilder, specs: &[ActionSpec]) {
    for spec in specs {
        match spec {
            ActionSpec::Output { port } => {
                builder.output(*port);
            }
            ActionSpec::Recirc { recirc_id } => {
                builder.recirc(*recirc_id);
            }
            ActionSpec::Hash { basis } => {
                builder.hash(*basis);
            }
            ActionSpec::PushVlan { tpid, tci } => {
                builder.push_vlan(*tpid, *tci);
            }
            ActionSpec::PopVlan => {
                builder.pop_vlan();
            }
            ActionSpec::PushMpls { lse, ethertype } => {
                builder.push_mpls(*lse, *ethertype);
            }
            ActionSpec::PopMpls { ethertype } => {
                builder.pop_mpls(*ethertype);
            }
            ActionSpec::SetPriority { priority } => {
                builder.set_priority(*priority);
            }
            ActionSpec::SetSkbMark { mark } => {
                builder.set_skb_mark(*mark);
            }
            ActionSpec::SetMpls { lse } => {
                builder.set_mpls(*lse);
            }
            ActionSpec::SetEthernet { src, dst } => {
                builder.set_ethernet(*src, *dst);
            }
            ActionSpec::SetIpv4 { src, dst, tos, ttl, proto } => {
                builder.set_ipv4(u32::from(*src), u32::from(*dst), *tos, *ttl, *proto);
            }
            ActionSpec::SetIpv6 { .. } => {
                // IPv6 SET is encoded directly: ActionListBuilder has no
                // dedicated helper since the full 39-byte payload is easy
                // to get wrong by hand; build it inline here instead of
                // growing the builder's public surface for one caller.
                if let ActionSpec::SetIpv6 { src, dst, label, tclass, hlimit } = spec {
                    let mut payload = [0u8; 39];
                    payload[0..16].copy_from_slice(&src.octets());
                    payload[16..32].copy_from_slice(&dst.octets());
                    payload[32..36].copy_from_slice(&label.to_be_bytes());
                    payload[36] = *tclass;
                    payload[37] = *hlimit;
                    builder.set_raw(switch_actions_core::SetAttrTag::Ipv6.as_u16(), &payload);
                }
            }
            ActionSpec::SetTcp { src, dst } => {
                builder.set_tcp(*src, *dst);
            }
            ActionSpec::SetUdp { src, dst } => {
                builder.set_udp(*src, *dst);
            }
            ActionSpec::SetSctp { src, dst } => {
                builder.set_sctp(*src, *dst);
            }
            ActionSpec::Userspace { pid, userdata } => {
                builder.userspace(*pid, userdata);
            }
            ActionSpec::Sample { probability, actions } => {
                let nested = build_actions(actions);
                builder.sample(*probability, &nested);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hex_bytes() {
        assert_eq!(decode_hex("aabbcc").unwrap(), vec![0xaa, 0xbb, 0xcc]);
        assert!(decode_hex("abc").is_err());
    }

    #[test]
    fn builds_output_action_list() {
        let actions = vec![ActionSpec::Output { port: 7 }];
        let bytes = build_actions(&actions);
        assert!(!bytes.is_empty());
    }
}

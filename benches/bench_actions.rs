//! Micro benchmarks for the action execution engine's hot paths: a single
//! OUTPUT (the common case the pending-output optimization targets), a
//! combined IPv4/TCP rewrite, and VLAN push/pop.
//!
//! ```bash
//! cargo bench --bench bench_actions
//! ```

use criterion::{criterion_group, criterion_main, Criterion};
use switch_actions_core::{ActionListBuilder, Engine, EngineConfig, FlowKey, PacketBuffer, Result};
use switch_actions_core::{Classifier, RandomSource, TunnelInfo, UpcallInfo, UpcallTransport, VportTable};

struct NullHost;

impl VportTable for NullHost {
    fn vport_send(&mut self, _port: u32, _packet: PacketBuffer) -> Result<()> {
        Ok(())
    }

    fn vport_lookup(&self, _port_id: u32) -> bool {
        true
    }

    fn vport_get_egress_tunnel_info(&self, _port: u32, _packet: &PacketBuffer) -> Result<TunnelInfo> {
        Ok(TunnelInfo { dst_ip: 0, tun_id: 0 })
    }
}

impl UpcallTransport for NullHost {
    fn dp_upcall(&mut self, _packet: &PacketBuffer, _key: &FlowKey, _info: &UpcallInfo) -> Result<()> {
        Ok(())
    }
}

impl Classifier for NullHost {
    fn classify_and_process(&mut self, _packet: PacketBuffer, _key: FlowKey) -> Result<()> {
        Ok(())
    }

    fn flow_key_update(&mut self, _packet: &PacketBuffer, key: &mut FlowKey) -> Result<()> {
        key.eth.eth_type = 0x0800;
        Ok(())
    }
}

impl RandomSource for NullHost {
    fn next_u32(&mut self) -> u32 {
        0
    }
}

fn eth_frame() -> Vec<u8> {
    let mut frame = vec![0u8; 64];
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    frame
}

fn ipv4_key() -> FlowKey {
    let mut key = FlowKey::default();
    key.eth.eth_type = 0x0800;
    key.ipv4.src = u32::from_be_bytes([10, 0, 0, 1]);
    key.ipv4.dst = u32::from_be_bytes([10, 0, 0, 2]);
    key
}

fn bench_single_output(c: &mut Criterion) {
    let actions = ActionListBuilder::new().output(7).build();
    c.bench_function("execute_actions_single_output", |b| {
        b.iter(|| {
            let mut engine = Engine::new(EngineConfig::default());
            let mut host = NullHost;
            engine
                .execute_actions(0, PacketBuffer::new(std::hint::black_box(eth_frame()), 0x0800), ipv4_key(), &actions, &mut host)
                .unwrap();
        });
    });
}

fn ipv4_tcp_frame() -> Vec<u8> {
    let mut frame = eth_frame();
    frame.resize(14 + 20 + 20, 0);
    let ip = 14;
    frame[ip] = 0x45;
    frame[ip + 2..ip + 4].copy_from_slice(&40u16.to_be_bytes());
    frame[ip + 8] = 64;
    frame[ip + 9] = 6;
    frame[ip + 12..ip + 16].copy_from_slice(&[10, 0, 0, 1]);
    frame[ip + 16..ip + 20].copy_from_slice(&[10, 0, 0, 2]);
    let tcp = ip + 20;
    frame[tcp..tcp + 2].copy_from_slice(&1000u16.to_be_bytes());
    frame[tcp + 2..tcp + 4].copy_from_slice(&80u16.to_be_bytes());
    frame[tcp + 12] = 0x50;
    frame
}

fn bench_ipv4_tcp_rewrite(c: &mut Criterion) {
    let actions = ActionListBuilder::new()
        .set_ipv4(u32::from_be_bytes([10, 0, 0, 1]), u32::from_be_bytes([192, 168, 1, 1]), 0, 64, 6)
        .set_tcp(1000, 8080)
        .output(2)
        .build();
    c.bench_function("execute_actions_ipv4_tcp_rewrite", |b| {
        b.iter(|| {
            let mut engine = Engine::new(EngineConfig::default());
            let mut host = NullHost;
            engine
                .execute_actions(0, PacketBuffer::new(std::hint::black_box(ipv4_tcp_frame()), 0x0800), ipv4_key(), &actions, &mut host)
                .unwrap();
        });
    });
}

fn bench_vlan_push_pop(c: &mut Criterion) {
    let actions = ActionListBuilder::new().push_vlan(0x8100, 0x0064).pop_vlan().output(1).build();
    c.bench_function("execute_actions_vlan_push_pop", |b| {
        b.iter(|| {
            let mut engine = Engine::new(EngineConfig::default());
            let mut host = NullHost;
            engine
                .execute_actions(0, PacketBuffer::new(std::hint::black_box(eth_frame()), 0x0800), ipv4_key(), &actions, &mut host)
                .unwrap();
        });
    });
}

criterion_group!(action_benches, bench_single_output, bench_ipv4_tcp_rewrite, bench_vlan_push_pop);
criterion_main!(action_benches);

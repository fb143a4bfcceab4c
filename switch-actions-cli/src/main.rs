#![forbid(unsafe_code)]

mod scenario;
mod stub_host;

use clap::Parser;
use scenario::{build_actions, Scenario};
use std::path::PathBuf;
use std::process::ExitCode;
use stub_host::StubHost;
use switch_actions_core::{Engine, EngineConfig, FlowKey, PacketBuffer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Switch action execution engine demo harness")]
struct Cli {
    /// Path to a scenario TOML file (packet bytes + action list).
    #[arg(short, long, value_name = "FILE", default_value = "demos/basic.toml")]
    scenario: PathBuf,

    /// Path to an engine config TOML file; defaults are used if omitted.
    #[arg(short, long, value_name = "FILE")]
    engine_config: Option<PathBuf>,

    /// Random seed fed to the demo's deterministic RNG (affects SAMPLE).
    #[arg(long, default_value_t = 1)]
    seed: u32,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.engine_config {
        Some(path) => match switch_actions_core::load_from_path(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(%err, "failed to load engine config");
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };

    let scenario_text = match std::fs::read_to_string(&cli.scenario) {
        Ok(text) => text,
        Err(err) => {
            error!(%err, path = %cli.scenario.display(), "failed to read scenario file");
            return ExitCode::FAILURE;
        }
    };
    let scenario: Scenario = match toml::from_str(&scenario_text) {
        Ok(s) => s,
        Err(err) => {
            error!(%err, "failed to parse scenario file");
            return ExitCode::FAILURE;
        }
    };

    let bytes = match scenario.packet.decode_bytes() {
        Ok(b) => b,
        Err(err) => {
            error!(%err, "failed to decode packet bytes_hex");
            return ExitCode::FAILURE;
        }
    };

    let packet = PacketBuffer::new(bytes, scenario.packet.protocol);
    let mut key = FlowKey::default();
    key.eth.eth_type = scenario.packet.protocol;

    let actions = build_actions(&scenario.actions);
    let mut engine = Engine::new(config);
    let mut host = StubHost::new(cli.seed);

    info!(cpu_id = scenario.cpu_id, action_bytes = actions.len(), "running scenario");
    match engine.execute_actions(scenario.cpu_id, packet, key, &actions, &mut host) {
        Ok(()) => {
            if let Some(metrics) = engine.metrics(scenario.cpu_id) {
                info!(
                    recursion_exceeded = metrics.recursion_exceeded,
                    deferred_dropped = metrics.deferred_dropped,
                    deferred_high_water_mark = metrics.deferred_high_water_mark,
                    "scenario finished"
                );
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "execute_actions failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

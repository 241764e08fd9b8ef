//! Command-line runner: loads a scenario, runs it and prints the statistics.
//!
//! Usage: `vanet-stack-simulator <scenario.json|toml> [settings.json|toml]`
//!
//! The optional second file replaces the scenario's `settings` section.

use anyhow::{Context, bail};
use env_logger::Builder;
use log::{LevelFilter, info};
use std::env;

use vanet_stack_simulator::common::settings::load_settings;
use vanet_stack_simulator::simulation::log_capture::{TeeLogger, drain_captured_logs, drain_node_logs};
use vanet_stack_simulator::simulation::scenario::load_scenario;

fn main() -> anyhow::Result<()> {
    // Logging setup
    let logger = Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("vanet_stack_simulator"), LevelFilter::Debug)
        .build();
    TeeLogger::new(logger).install().context("Failed to install logger")?;

    info!("Starting up");

    let args: Vec<String> = env::args().collect();
    let Some(scenario_path) = args.get(1) else {
        bail!("Usage: {} <scenario.json|toml> [settings.json|toml]", args.first().map(String::as_str).unwrap_or("vanet-stack-simulator"));
    };

    let mut scenario = load_scenario(scenario_path).with_context(|| format!("Failed to load scenario {}", scenario_path))?;
    if let Some(settings_path) = args.get(2) {
        scenario.settings = load_settings(settings_path).with_context(|| format!("Failed to load settings {}", settings_path))?;
        info!("Using settings from {}", settings_path);
    }

    let sim = scenario.run().context("Simulation failed")?;

    for node in sim.nodes() {
        let state = node.state();
        let node_logs = drain_node_logs(state.id());
        info!(
            "Node {} ({} {}): {} delivered, {} log lines",
            state.id(),
            state.kind(),
            state.ipv6_address(),
            state.delivered().len(),
            node_logs.len()
        );
        if let Some(last) = node_logs.last() {
            info!("Node {} last log: [{}] {}", state.id(), last.level, last.content);
        }
    }
    let unrouted = drain_captured_logs().len();
    if unrouted > 0 {
        info!("{} captured log lines belong to no node", unrouted);
    }

    println!("{}", sim.statistics().summary());
    Ok(())
}

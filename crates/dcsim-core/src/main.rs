//! dcsim CLI — drive the data centre simulator and the agent harness.

use clap::{Parser, Subcommand};
use dcsim_core::config::SimConfig;
use dcsim_core::eval;
use dcsim_core::simulator::Simulator;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dcsim",
    about = "Discrete-time GPU data centre simulator",
    version
)]
struct Cli {
    /// Path to YAML configuration (falls back to $DC_SIM_CONFIG, then defaults).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulator for a fixed number of ticks and print a summary.
    Run {
        /// Number of ticks to simulate.
        #[arg(short, long, default_value = "240")]
        ticks: u64,
        /// Append every snapshot to a JSON-lines file.
        #[arg(long)]
        telemetry_log: Option<PathBuf>,
        /// Write the final snapshot to a JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run an agent through an evaluation scenario and print its scores.
    RunAgent {
        /// Agent name.
        #[arg(short, long, default_value = "reactive")]
        agent: String,
        /// Scenario id.
        #[arg(short, long, default_value = "steady_state")]
        scenario: String,
        /// Write the evaluation result to a JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compare multiple agents on the same scenario.
    Compare {
        /// Comma-separated list of agent names (default: all built-ins).
        #[arg(short = 'A', long, value_delimiter = ',')]
        agents: Vec<String>,
        /// Scenario id.
        #[arg(short, long, default_value = "steady_state")]
        scenario: String,
        /// Write results to a JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List available agents.
    ListAgents,
    /// List available scenarios.
    ListScenarios,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Run {
            ticks,
            telemetry_log,
            output,
        } => {
            let mut simulator = Simulator::new(config);
            if let Some(path) = telemetry_log {
                simulator.log_telemetry_to(path).unwrap_or_else(|e| {
                    eprintln!("Error opening telemetry log: {}", e);
                    std::process::exit(1);
                });
            }
            let states = simulator.tick_n(ticks);
            let Some(last) = states.last() else {
                println!("Nothing to simulate (ticks = 0)");
                return;
            };

            println!(
                "Simulated {} ticks ({}): {} jobs submitted, {} completed, {} SLA violations",
                ticks,
                simulator.clock().elapsed_hms(),
                last.workload.total_submitted,
                last.workload.completed,
                last.workload.sla_violations,
            );
            println!(
                "IT {:.1} kW | total {:.1} kW | PUE {:.3} | max inlet {:.1} °C | {:.1} kg CO2 | {:.2} GBP",
                last.power.it_power_kw,
                last.power.total_power_kw,
                last.power.pue,
                last.thermal
                    .racks
                    .iter()
                    .map(|r| r.inlet_temp_c)
                    .fold(f64::MIN, f64::max),
                last.carbon.cumulative_carbon_kg,
                last.carbon.cumulative_cost_gbp,
            );

            if let Some(path) = output {
                write_json(&path, last);
            }
        }
        Commands::RunAgent {
            agent,
            scenario,
            output,
        } => {
            let scenario = load_scenario(&scenario);
            let result = dcsim_core::run_agent_scenario(config, Some(&agent), &scenario)
                .unwrap_or_else(|e| {
                    eprintln!("Error running scenario: {}", e);
                    std::process::exit(1);
                });
            println!("{}", eval::format_table(&result));

            if let Some(path) = output {
                write_json(&path, &result);
            }
        }
        Commands::Compare {
            agents,
            scenario,
            output,
        } => {
            let scenario = load_scenario(&scenario);
            let names: Vec<&str> = if agents.is_empty() {
                dcsim_agents::available_agents()
            } else {
                agents.iter().map(|s| s.as_str()).collect()
            };

            let results = dcsim_core::compare_agents(&config, &names, &scenario);
            println!("{}", eval::format_comparison_table(&results));
            for result in &results {
                println!("{}", eval::format_table(result));
            }

            if let Some(path) = output {
                write_json(&path, &results);
            }
        }
        Commands::ListAgents => {
            println!("Available agents:");
            for name in dcsim_agents::available_agents() {
                println!("  - {}", name);
            }
        }
        Commands::ListScenarios => {
            println!("Available scenarios:");
            for scenario in eval::available_scenarios()
                .iter()
                .filter_map(|name| eval::scenario_by_name(name))
            {
                println!("  - {:<16} {}", scenario.scenario_id, scenario.description);
            }
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> SimConfig {
    let result = match path {
        Some(p) => SimConfig::from_file(p),
        None => SimConfig::from_env(),
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    })
}

fn load_scenario(name: &str) -> dcsim_core::Scenario {
    eval::scenario_by_name(name).unwrap_or_else(|| {
        eprintln!(
            "Unknown scenario: {}. Available: {:?}",
            name,
            eval::available_scenarios()
        );
        std::process::exit(1);
    })
}

fn write_json<T: serde::Serialize>(path: &std::path::Path, value: &T) {
    let json = serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("Error serialising output: {}", e);
        std::process::exit(1);
    });
    std::fs::write(path, json).unwrap_or_else(|e| {
        eprintln!("Error writing output: {}", e);
        std::process::exit(1);
    });
    println!("Results written to {}", path.display());
}

//! Pymesh simulator CLI
//!
//! Runs scripted scenarios or an interactive session over an in-memory
//! partition.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use pymesh_core::{Mac, format_mac};
use pymesh_logging::{LogConfig, PymeshSubscriberBuilder};
use pymesh_node::{MeshOrchestrator, NodeConfig, SendRequest};
use pymesh_sim::{SimMesh, Topology, scenarios};
use pymesh_stats::StatRequest;

#[derive(Parser)]
#[command(
    name = "pymesh-sim",
    about = "Pymesh application protocol over a simulated mesh",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSONL logs instead of pretty output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Let the leader aggregate a star partition and query it
    Topology {
        #[arg(short, long, default_value = "3")]
        routers: usize,

        /// Children per router
        #[arg(short, long, default_value = "2")]
        children: usize,
    },

    /// Send one message and wait for its ACK
    Message {
        #[arg(long, default_value = "0x21", value_parser = parse_mac)]
        from: Mac,

        #[arg(long, default_value = "0x30", value_parser = parse_mac)]
        to: Mac,

        #[arg(short, long, default_value = "hello")]
        payload: String,
    },

    /// Probe link reliability from a router to the leader
    Stats {
        #[arg(short, long, default_value = "5")]
        repetitions: u16,

        /// Seconds to wait for each ACK
        #[arg(short, long, default_value = "10")]
        period: u32,
    },

    /// Watch a lone leader restart itself
    Watchdog {
        /// Seconds a single-leader partition is tolerated
        #[arg(short, long, default_value = "180")]
        dwell: u64,
    },

    /// Step a star partition by hand
    Interactive {
        #[arg(short, long, default_value = "3")]
        routers: usize,

        #[arg(short, long, default_value = "1")]
        children: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.json {
        LogConfig::default()
    } else {
        LogConfig::development()
    };
    let level = if cli.verbose { "debug" } else { "info" };
    let _guard = PymeshSubscriberBuilder::new()
        .with_config(config)
        .with_level(level)
        .init()?;

    match cli.command {
        Commands::Topology { routers, children } => {
            scenarios::run_topology_scenario(routers, children).await?;
        }
        Commands::Message { from, to, payload } => {
            let outcome = scenarios::run_message_scenario(from, to, &payload).await?;
            if !outcome.acked {
                bail!("no ACK after {} steps", outcome.steps);
            }
        }
        Commands::Stats {
            repetitions,
            period,
        } => {
            let summary = scenarios::run_stats_scenario(repetitions, period).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Watchdog { dwell } => {
            scenarios::run_watchdog_scenario(Duration::from_secs(dwell)).await?;
        }
        Commands::Interactive { routers, children } => {
            run_interactive(routers, children).await?;
        }
    }

    Ok(())
}

fn parse_mac(input: &str) -> Result<Mac, String> {
    let digits = input.trim_start_matches("0x");
    Mac::from_str_radix(digits, 16).map_err(|e| format!("invalid mac {:?}: {}", input, e))
}

async fn run_interactive(routers: usize, children: usize) -> anyhow::Result<()> {
    let topology = Topology::star(routers, children);
    println!("{}", topology.visualize());
    let mut sim = SimMesh::new(topology, NodeConfig::in_memory()).await?;

    println!("Commands:");
    println!("  step [n]                - Advance n ticks (default 1)");
    println!("  send <from> <to> <msg>  - Queue a message");
    println!("  recv <mac>              - Pop the oldest received message");
    println!("  info <at> <mac>         - Ask a node about another node");
    println!("  macs <mac>              - Nodes known to a node");
    println!("  probe <from> <to> <n>   - Start a statistics job");
    println!("  job <mac> <id>          - Show a statistics job (0 for all)");
    println!("  quit                    - Exit");
    println!();

    let mut next_id: u16 = 1;
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        let Some(command) = parts.first() else {
            continue;
        };

        let result = match *command {
            "step" => {
                let n = parts.get(1).and_then(|n| n.parse().ok()).unwrap_or(1);
                sim.run(n).await;
                println!("  t = {}s", sim.elapsed().as_secs());
                Ok(())
            }
            "send" if parts.len() >= 4 => {
                let id = next_id;
                next_id = next_id.wrapping_add(1).max(1);
                send(&sim, parts[1], parts[2], parts[3..].join(" "), id).await
            }
            "recv" if parts.len() == 2 => recv(&sim, parts[1]).await,
            "info" if parts.len() == 3 => info(&sim, parts[1], parts[2]).await,
            "macs" if parts.len() == 2 => macs(&sim, parts[1]).await,
            "probe" if parts.len() == 4 => probe(&sim, parts[1], parts[2], parts[3]).await,
            "job" if parts.len() == 3 => job(&sim, parts[1], parts[2]).await,
            "quit" | "exit" => break,
            _ => {
                println!("  Unknown command: {}", input.trim());
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("  Error: {:#}", e);
        }
    }

    sim.shutdown().await?;
    Ok(())
}

fn lookup<'a>(sim: &'a SimMesh, mac: &str) -> anyhow::Result<&'a MeshOrchestrator> {
    let mac = parse_mac(mac).map_err(anyhow::Error::msg)?;
    sim.node(mac)
        .with_context(|| format!("no node {}", format_mac(mac)))
}

async fn send(sim: &SimMesh, from: &str, to: &str, payload: String, id: u16) -> anyhow::Result<()> {
    let node = lookup(sim, from)?;
    let to = parse_mac(to).map_err(anyhow::Error::msg)?;
    let queued = node
        .send_message(SendRequest::new(to, id, payload.into_bytes()))
        .await;
    println!("  Message {} to {} queued: {}", id, format_mac(to), queued);
    Ok(())
}

async fn recv(sim: &SimMesh, at: &str) -> anyhow::Result<()> {
    let node = lookup(sim, at)?;
    match node.get_received_message().await {
        Some(message) => println!(
            "  From {} (id {}): {}",
            format_mac(message.mac),
            message.id,
            String::from_utf8_lossy(&message.payload)
        ),
        None => println!("  Nothing received"),
    }
    Ok(())
}

async fn info(sim: &SimMesh, at: &str, target: &str) -> anyhow::Result<()> {
    let node = lookup(sim, at)?;
    let target = parse_mac(target).map_err(anyhow::Error::msg)?;
    match node.get_node_info(target).await {
        Ok(info) => println!("  {}", serde_json::to_string(&info)?),
        Err(e) => println!("  {} (step to let the leader answer)", e),
    }
    Ok(())
}

async fn macs(sim: &SimMesh, at: &str) -> anyhow::Result<()> {
    let node = lookup(sim, at)?;
    let macs: Vec<String> = node.mesh_macs().await.into_iter().map(format_mac).collect();
    println!("  {}", macs.join(" "));
    Ok(())
}

async fn probe(sim: &SimMesh, from: &str, to: &str, repetitions: &str) -> anyhow::Result<()> {
    let node = lookup(sim, from)?;
    let to = parse_mac(to).map_err(anyhow::Error::msg)?;
    let repetitions = repetitions.parse().context("repetitions")?;
    let id = node
        .statistics_start(StatRequest::new(to, repetitions, 10))
        .await?;
    println!("  Job {} started", id);
    Ok(())
}

async fn job(sim: &SimMesh, at: &str, id: &str) -> anyhow::Result<()> {
    let node = lookup(sim, at)?;
    let id = id.parse().context("job id")?;
    let report = node.statistics_get(id).await?;
    println!("  {}", serde_json::to_string(&report)?);
    Ok(())
}

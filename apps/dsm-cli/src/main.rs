//! # DSM CLI
//!
//! Walkthroughs of sequencer-ordered shared variables. Every scenario runs
//! in-process: nodes talk over the deterministic simulated bus, or over the
//! tokio channel bus for the `actors` scenario.
//!
//! ## Protocol in one picture
//!
//! ```text
//!   writer ──Write/Cas──▶ sequencer (min id of the group)
//!                            │ assigns seq 0, 1, 2, ...
//!                            └──Update(seq)──▶ every member, itself included
//!   member: seq == cursor → apply, drain buffer
//!           seq >  cursor → hold in reorder buffer
//!           seq <  cursor → stale, drop
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;
use dsm_node::{
    BusStats, ChangeLog, ChannelBus, Cluster, Message, NetworkConfig, Node, NodeHandle, NodeId,
    SimulatedBus, Value, VariableChange,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "dsm-cli")]
#[command(about = "Sequencer-ordered distributed shared memory walkthroughs")]
#[command(version)]
struct Cli {
    /// Show node-level protocol logs (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Three nodes: two writes and a compare-and-exchange, same order everywhere
    Demo,
    /// One subscriber receives sequence 2 before 0 and 1
    Reorder,
    /// Random workload on a reordering, duplicating bus, then a convergence report
    Chaos {
        /// Number of nodes in the group
        #[arg(long, default_value_t = 5)]
        nodes: u32,
        /// Number of requests to issue
        #[arg(long, default_value_t = 200)]
        ops: usize,
        /// Seed for both the workload and the bus
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Print a JSON summary instead of the report
        #[arg(long)]
        json: bool,
    },
    /// The demo scenario with every node running as a tokio task
    Actors,
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn show_values(variable: &str, values: &BTreeMap<NodeId, Value>) {
    let border = "─".repeat(44);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^42} │",
        format!("Variable: {}", variable).bright_yellow().to_string()
    );
    println!("  ├{}┤", border);
    if values.is_empty() {
        println!("  │ {:^42} │", "(no subscribers)".dimmed().to_string());
    }
    for (node, value) in values {
        let line = format!("  {:<16} = {:>8}", node.to_string(), value);
        println!("  │ {:<42} │", line);
    }
    println!("  └{}┘", border);
}

fn show_history(log: &ChangeLog, nodes: &[NodeId], variable: &str) {
    for node in nodes {
        let history: Vec<String> = log
            .sequences_for(*node, variable)
            .iter()
            .zip(log.values_for(*node, variable))
            .map(|(seq, value)| format!("#{}={}", seq, value))
            .collect();
        step(&format!("{}: [{}]", node.to_string().bright_magenta(), history.join(", ")));
    }
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL SUBSCRIBERS CONVERGED: same value, same history".bright_green().bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED: subscribers differ".bright_red().bold()
        );
    }
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", "error:".bright_red().bold(), e);
    std::process::exit(1);
}

fn observed_cluster(n: u32, network: NetworkConfig) -> dsm_node::Result<(Cluster, ChangeLog)> {
    let mut cluster = Cluster::with_nodes(n, network)?;
    let log = ChangeLog::new();
    for id in cluster.ids() {
        cluster.add_observer(id, log.clone())?;
    }
    Ok((cluster, log))
}

// ─── Demo ──────────────────────────────────────────────────────────────────

fn run_demo() -> dsm_node::Result<()> {
    header("DEMO: Three Nodes, One Total Order");

    let (mut cluster, log) = observed_cluster(3, NetworkConfig::fifo())?;
    let group = cluster.ids();

    section("Phase 1: Every node subscribes to A with group {N0, N1, N2}");
    cluster.subscribe_all("A", &group)?;
    let sequencer = cluster.node(NodeId(1))?.replica("A")?.sequencer();
    step(&format!("sequencer for A is {}", sequencer.to_string().bright_magenta()));

    section("Phase 2: Requests");
    cluster.write(NodeId(1), "A", 1)?;
    step("N1: write(A, 1)");
    cluster.run_until_idle()?;
    cluster.write(NodeId(2), "A", 2)?;
    step("N2: write(A, 2)");
    cluster.run_until_idle()?;
    cluster.compare_and_exchange(NodeId(0), "A", 2, 5)?;
    step("N0: compare_and_exchange(A, 2, 5)");
    cluster.run_until_idle()?;
    cluster.compare_and_exchange(NodeId(2), "A", 2, 9)?;
    step("N2: compare_and_exchange(A, 2, 9)  (stale expectation)");
    cluster.run_until_idle()?;

    section("Phase 3: Notification histories");
    show_history(&log, &group, "A");

    section("Phase 4: Final state");
    show_values("A", &cluster.values("A"));
    convergence_result(cluster.is_converged("A"));
    step("the failed CAS left no trace on any node");
    Ok(())
}

// ─── Reorder ───────────────────────────────────────────────────────────────

fn run_reorder() -> dsm_node::Result<()> {
    header("REORDER: Out-of-Order Updates at One Subscriber");

    // N1 only receives in this scenario, so nothing is ever drained.
    let bus = Arc::new(SimulatedBus::new(NetworkConfig::fifo()));
    bus.register(NodeId(1))?;
    let mut node = Node::new(NodeId(1), bus);
    node.add_observer(|change: &VariableChange| {
        println!(
            "    {} {} observed {}#{} = {}",
            "⚡".bright_yellow(),
            change.node.to_string().bright_magenta(),
            change.variable,
            change.sequence,
            change.value.to_string().bright_white().bold()
        );
    });
    node.subscribe("A", &[NodeId(0), NodeId(1), NodeId(2)])?;

    let deliveries = [(2, 30), (0, 10), (1, 20), (1, 20)];
    for (sequence, value) in deliveries {
        section(&format!("Update A#{} = {} arrives from N0", sequence, value));
        node.handle_message(Message::update("A", value, sequence, NodeId(0)))?;
        let replica = node.replica("A")?;
        step(&format!(
            "value = {}, next expected = {}, buffered = {:?}",
            replica.value(),
            replica.next_expected_sequence(),
            replica.pending_sequences()
        ));
    }

    section("Result");
    step("sequence 2 waited in the reorder buffer until 0 and 1 arrived");
    step("the retransmitted sequence 1 was recognised as stale and dropped");
    Ok(())
}

// ─── Chaos ─────────────────────────────────────────────────────────────────

fn run_chaos(nodes: u32, ops: usize, seed: u64, json: bool) -> dsm_node::Result<()> {
    let nodes = nodes.max(1);
    let (mut cluster, log) = observed_cluster(nodes, NetworkConfig::chaotic(seed))?;
    let group = cluster.ids();
    let variables = ["A", "B"];
    for variable in variables {
        cluster.subscribe_all(variable, &group)?;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut writes = 0usize;
    let mut cas = 0usize;
    for i in 0..ops {
        let node = NodeId(rng.gen_range(0..nodes));
        let variable = variables[rng.gen_range(0..variables.len())];
        if rng.gen_bool(0.3) {
            let expected = cluster.node(node)?.value(variable)?;
            cluster.compare_and_exchange(node, variable, expected, i as Value)?;
            cas += 1;
        } else {
            cluster.write(node, variable, i as Value)?;
            writes += 1;
        }
        for _ in 0..rng.gen_range(0..4) {
            cluster.step()?;
        }
    }
    let drained = cluster.run_until_idle()?;

    let mut report = Vec::new();
    for variable in variables {
        let sequencer = cluster.node(NodeId(0))?.replica(variable)?;
        let reference = log.values_for(NodeId(0), variable);
        let same_history = group.iter().all(|id| log.values_for(*id, variable) == reference);
        report.push((
            variable,
            sequencer.next_sequence_to_assign(),
            cluster.is_converged(variable) && same_history,
            cluster.values(variable),
        ));
    }
    let stats = cluster.stats();

    if json {
        print_chaos_json(nodes, ops, seed, writes, cas, &stats, &report);
        return Ok(());
    }

    header("CHAOS: Reordering and Duplicating Bus");
    section("Workload");
    step(&format!(
        "{} nodes, {} requests ({} writes, {} CAS), seed {}",
        nodes, ops, writes, cas, seed
    ));
    let network = cluster.bus().config();
    step(&format!(
        "bus: {:?} order, reorder rate {:.2}, duplicate rate {:.2}",
        network.ordering, network.reorder_rate, network.duplicate_rate
    ));
    step(&format!("{} deliveries left after the workload were drained", drained));

    section("Bus statistics");
    step(&format!("sent       {}", stats.sent));
    step(&format!("delivered  {}", stats.delivered));
    step(&format!("duplicated {}", stats.duplicated));
    step(&format!("reordered  {}", stats.reordered));

    for (variable, accepted, converged, values) in &report {
        section(&format!("Variable {}: {} updates sequenced", variable, accepted));
        show_values(variable, values);
        convergence_result(*converged);
    }
    Ok(())
}

fn print_chaos_json(
    nodes: u32,
    ops: usize,
    seed: u64,
    writes: usize,
    cas: usize,
    stats: &BusStats,
    report: &[(&str, u64, bool, BTreeMap<NodeId, Value>)],
) {
    let variables: Vec<serde_json::Value> = report
        .iter()
        .map(|(variable, accepted, converged, values)| {
            let values: serde_json::Map<String, serde_json::Value> = values
                .iter()
                .map(|(node, value)| (node.to_string(), serde_json::json!(value)))
                .collect();
            serde_json::json!({
                "variable": variable,
                "sequenced": accepted,
                "converged": converged,
                "values": values,
            })
        })
        .collect();

    let summary = serde_json::json!({
        "nodes": nodes,
        "ops": ops,
        "seed": seed,
        "writes": writes,
        "cas": cas,
        "bus": stats,
        "variables": variables,
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => println!("{}", text),
        Err(e) => fail(e),
    }
}

// ─── Actors ────────────────────────────────────────────────────────────────

/// One request of the actor walkthrough, on variable A.
enum ActorRequest {
    Write { writer: usize, value: Value },
    Cas { writer: usize, expected: Value, value: Value },
}

impl ActorRequest {
    fn writer(&self) -> usize {
        match self {
            Self::Write { writer, .. } | Self::Cas { writer, .. } => *writer,
        }
    }

    async fn issue(&self, handle: &NodeHandle) -> dsm_node::Result<()> {
        match *self {
            Self::Write { value, .. } => handle.write("A", value).await,
            Self::Cas { expected, value, .. } => {
                handle.compare_and_exchange("A", expected, value).await
            }
        }
    }
}

impl std::fmt::Display for ActorRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write { value, .. } => write!(f, "write(A, {})", value),
            Self::Cas { expected, value, .. } => {
                write!(f, "compare_and_exchange(A, {}, {})", expected, value)
            }
        }
    }
}

async fn run_actors() -> dsm_node::Result<()> {
    header("ACTORS: The Demo on Tokio Tasks");

    let bus = ChannelBus::new();
    let ids = [NodeId(0), NodeId(1), NodeId(2)];
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handles = Vec::new();
    for id in ids {
        let mut node = Node::new(id, bus.clone());
        let tx = tx.clone();
        node.add_observer(move |change: &VariableChange| {
            let _ = tx.send(change.clone());
        });
        handles.push(NodeHandle::spawn(node, &bus)?);
    }
    drop(tx);

    section("Phase 1: Subscribe every actor");
    for handle in &handles {
        handle.subscribe("A", &ids).await?;
    }

    section("Phase 2: Requests, one wave of notifications each");
    let requests = [
        ActorRequest::Write { writer: 1, value: 1 },
        ActorRequest::Write { writer: 2, value: 2 },
        ActorRequest::Cas { writer: 0, expected: 2, value: 5 },
    ];
    for request in requests {
        let handle = &handles[request.writer()];
        step(&format!("{}: {}", handle.id(), request));
        request.issue(handle).await?;
        for _ in 0..ids.len() {
            match rx.recv().await {
                Some(change) => println!(
                    "    {} {} observed A#{} = {}",
                    "⚡".bright_yellow(),
                    change.node.to_string().bright_magenta(),
                    change.sequence,
                    change.value
                ),
                None => break,
            }
        }
    }

    section("Phase 3: Shut down and inspect");
    let mut values = BTreeMap::new();
    for handle in handles {
        let node = handle.shutdown().await?;
        values.insert(node.id(), node.value("A")?);
    }
    show_values("A", &values);
    let first = values.values().next().copied();
    convergence_result(values.values().all(|v| Some(*v) == first));
    Ok(())
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let result = match cli.command {
        Commands::Demo => run_demo(),
        Commands::Reorder => run_reorder(),
        Commands::Chaos { nodes, ops, seed, json } => run_chaos(nodes, ops, seed, json),
        Commands::Actors => run_actors().await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "scenario aborted");
        fail(e);
    }
}

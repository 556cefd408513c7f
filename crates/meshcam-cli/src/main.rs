//! Camera Mesh Command-Line Interface
//!
//! This CLI provides tools for:
//! - Simulating a camera mesh in memory (election, task placement, failover)
//! - Running a live node over UDP
//! - Inspecting this host's capabilities and the resulting role
//! - Listing transport presets and dumping configuration

mod udp;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use meshcam_core::protocol::create_discovery_message;
use meshcam_core::role::eligibility_score;
use meshcam_core::simulation::MediumStats;
use meshcam_core::{
    assign_role, CapabilityDetector, HardwareProfile, MeshConfig, MeshNode, MeshSimulator, NodeCapabilities,
    NodeEvent, NodeId, PowerSource, Resolution, RtpPreset, SimConfig, Task, TaskId, TaskStatus, TaskType,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use udp::UdpRadio;

#[derive(Parser)]
#[command(name = "meshcam")]
#[command(author, version, about = "Self-organizing camera mesh", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a mesh of camera nodes over a lossy in-memory radio
    Simulate {
        /// Number of nodes to simulate
        #[arg(short, long, default_value = "5")]
        nodes: usize,

        /// Simulated time in seconds
        #[arg(short, long, default_value = "180")]
        duration: u64,

        /// Per-frame loss probability (0.0 - 1.0)
        #[arg(long, default_value = "0.05")]
        loss: f64,

        /// Random seed for the loss model
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Capture/analyze tasks the coordinator hands out after election
        #[arg(short, long, default_value = "4")]
        tasks: usize,

        /// Kill the coordinator halfway through to exercise failover
        #[arg(long)]
        kill_coordinator: bool,

        /// Transport preset
        #[arg(short, long, value_enum, default_value = "default")]
        preset: PresetArg,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a live node, using UDP as the radio
    Run {
        /// Mesh configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Hardware profile file (JSON)
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Node ID (hex, e.g., "a1b2c3d4"); random when omitted
        #[arg(short, long)]
        node_id: Option<String>,

        /// Local UDP address
        #[arg(short, long, default_value = "0.0.0.0:7400")]
        bind: SocketAddr,

        /// Peer UDP address (repeatable); every frame goes to all peers
        #[arg(long = "peer")]
        peers: Vec<SocketAddr>,

        /// Run-loop period in milliseconds
        #[arg(long, default_value = "50")]
        tick_ms: u64,

        /// Transport preset, overriding the config file
        #[arg(short, long, value_enum)]
        preset: Option<PresetArg>,

        /// While coordinator, place a capture task every N seconds
        #[arg(long)]
        capture_every: Option<u64>,
    },

    /// Detect this host's capabilities and the role it would take
    Detect {
        /// Hardware profile file (JSON)
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Node ID (hex)
        #[arg(short, long)]
        node_id: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Encode this host's DISCOVERY message and print it as hex
    EncodeDiscovery {
        /// Hardware profile file (JSON)
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Node ID (hex)
        #[arg(short, long)]
        node_id: Option<String>,
    },

    /// List transport presets
    Presets,

    /// Print a mesh configuration as JSON
    Config {
        /// Transport preset to apply
        #[arg(short, long, value_enum, default_value = "default")]
        preset: PresetArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PresetArg {
    Default,
    LowBandwidth,
    BestEffort,
    HighReliability,
}

impl From<PresetArg> for RtpPreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Default => RtpPreset::Default,
            PresetArg::LowBandwidth => RtpPreset::LowBandwidth,
            PresetArg::BestEffort => RtpPreset::BestEffort,
            PresetArg::HighReliability => RtpPreset::HighReliability,
        }
    }
}

fn parse_node_id(text: Option<&str>) -> Result<NodeId> {
    let Some(text) = text else {
        return Ok(NodeId::random());
    };
    let digits = text.trim_start_matches("0x");
    let value = u32::from_str_radix(digits, 16).with_context(|| format!("Invalid node ID: {}", text))?;
    if value == 0 {
        bail!("Node ID 0 is the broadcast address");
    }
    Ok(NodeId::from_u32(value))
}

fn load_profile(path: Option<&Path>) -> Result<HardwareProfile> {
    let Some(path) = path else {
        return Ok(HardwareProfile::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("Reading profile {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Parsing profile {}", path.display()))
}

fn print_capabilities(caps: &NodeCapabilities) {
    println!("Node ID:        {}", caps.node_id);
    println!("Camera:         {}", caps.has_camera);
    if caps.has_camera {
        println!("  Resolution:   {}x{}", caps.max_resolution.width, caps.max_resolution.height);
    }
    println!("Radio:          {}", caps.has_radio);
    println!("AI accel:       {}", caps.has_ai_accelerator);
    println!("PSRAM:          {}", caps.has_psram);
    println!("SD card:        {}", caps.has_sd_card);
    println!("Cellular:       {}", caps.has_cellular);
    println!("Satellite:      {}", caps.has_satellite);
    println!("Low power:      {}", caps.low_power_profile);
    match caps.battery_percent {
        Some(level) => println!("Battery:        {}%", level),
        None => println!("Battery:        none"),
    }
    println!("Power source:   {:?}", caps.power_source);
    println!("Storage free:   {} bytes", caps.storage_free_bytes);
    println!("Uptime:         {} s", caps.uptime_secs);
}

fn cmd_detect(profile: Option<PathBuf>, node_id: Option<String>, json: bool) -> Result<()> {
    let node_id = parse_node_id(node_id.as_deref())?;
    let detector = CapabilityDetector::new(node_id, load_profile(profile.as_deref())?);
    let caps = detector.detect_capabilities();
    let config = MeshConfig::default();
    let score = eligibility_score(&caps, 0, &config.role.weights);
    let role = assign_role(&caps);

    if json {
        #[derive(Serialize)]
        struct Detected<'a> {
            capabilities: &'a NodeCapabilities,
            eligibility_score: f32,
            role: String,
        }
        let out = Detected {
            capabilities: &caps,
            eligibility_score: score,
            role: role.to_string(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("=== Node Capabilities ===");
    println!();
    print_capabilities(&caps);
    println!();
    println!("Coordinator score:  {:.1}", score);
    println!("Role (if not elected): {}", role);
    Ok(())
}

fn cmd_encode_discovery(profile: Option<PathBuf>, node_id: Option<String>) -> Result<()> {
    let node_id = parse_node_id(node_id.as_deref())?;
    let caps = CapabilityDetector::new(node_id, load_profile(profile.as_deref())?).detect_capabilities();
    let bytes = create_discovery_message(&caps).map_err(|e| anyhow!("Encoding failed: {}", e))?;
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    println!("{}", hex);
    info!(node = %node_id, len = bytes.len(), "Discovery message encoded");
    Ok(())
}

fn cmd_presets() -> Result<()> {
    println!("=== RTP Presets ===");
    println!();
    println!(
        "{:<18} {:>8} {:>10} {:>10} {:>10} {:>9}",
        "Preset", "Retries", "ACK (ms)", "Retry (ms)", "Rate B/s", "Adaptive"
    );
    for preset in RtpPreset::ALL {
        let c = preset.config();
        println!(
            "{:<18} {:>8} {:>10} {:>10} {:>10} {:>9}",
            preset.name(),
            c.max_retries,
            c.ack_timeout_ms,
            c.initial_retry_delay_ms,
            c.max_bytes_per_second,
            c.adaptive_retry
        );
    }
    Ok(())
}

fn cmd_config(preset: PresetArg) -> Result<()> {
    let config = MeshConfig::default().with_preset(preset.into());
    println!("{}", config.to_json()?);
    Ok(())
}

/// Hardware mix for simulated node `index`
fn sim_capabilities(index: usize) -> NodeCapabilities {
    let id = NodeId::from_u32(0x1000 + index as u32);
    let base = NodeCapabilities::empty(id).with_radio().with_uptime(3_600 * index as u32);
    match index % 5 {
        0 => base
            .with_camera(Resolution::FULL_HD)
            .with_ai_accelerator()
            .with_psram()
            .with_battery(95)
            .with_power_source(PowerSource::Solar),
        1 => base.with_battery(80).with_power_source(PowerSource::Solar),
        2 => base
            .with_camera(Resolution::FULL_HD)
            .with_battery(40 + (index as u8 % 50)),
        3 => base
            .with_camera(Resolution::UXGA)
            .with_sd_card(32 * 1024 * 1024 * 1024)
            .with_battery(70),
        _ => base.with_battery(20),
    }
}

#[derive(Serialize)]
struct SimSummary {
    seed: u64,
    duration_ms: u64,
    coordinator: Option<String>,
    roles: BTreeMap<String, String>,
    tasks: BTreeMap<u32, String>,
    frames_sent: u64,
    copies_delivered: u64,
    copies_lost: u64,
    retransmissions: u64,
}

#[allow(clippy::too_many_arguments)]
fn cmd_simulate(
    num_nodes: usize,
    duration_secs: u64,
    loss: f64,
    seed: u64,
    num_tasks: usize,
    kill_coordinator: bool,
    preset: PresetArg,
    json: bool,
) -> Result<()> {
    if num_nodes == 0 {
        bail!("Need at least one node");
    }
    let mesh = MeshConfig::default().with_preset(preset.into());
    let election_ms = mesh.role.discovery_window_ms + 5_000;
    let duration_ms = (duration_secs * 1_000).max(election_ms);
    let config = SimConfig::default()
        .with_seed(seed)
        .with_loss_rate(loss)
        .with_mesh_config(mesh);
    let mut sim = MeshSimulator::new(config);

    for i in 0..num_nodes {
        sim.add_node(sim_capabilities(i))?;
    }

    if !json {
        println!("=== Camera Mesh Simulation ===");
        println!();
        println!("Nodes:    {}", num_nodes);
        println!("Duration: {} s", duration_ms / 1_000);
        println!("Loss:     {:.1}%", loss * 100.0);
        println!("Seed:     {}", seed);
        println!("Preset:   {}", RtpPreset::from(preset).name());
        println!();
    }

    let mut completed = 0usize;
    drive(&mut sim, election_ms, &mut completed, json)?;

    let coordinator = sim.coordinators().first().copied();
    if !json {
        println!("After election ({} s):", sim.now() / 1_000);
        for (id, role) in sim.roles() {
            println!("  {} {}", id, role.map_or("unassigned".to_string(), |r| r.to_string()));
        }
        println!();
    }

    if let Some(coordinator) = coordinator {
        let now = sim.now();
        for k in 0..num_tasks {
            let task_type = if k % 3 == 2 { TaskType::Analyze } else { TaskType::Capture };
            let task = Task::new(TaskId(k as u32 + 1), task_type, 5).with_deadline(60_000);
            let Some(node) = sim.node_mut(coordinator) else { break };
            match node.assign_task(task, None, now) {
                Ok(target) if !json => println!("Task {} ({:?}) -> {}", k + 1, task_type, target),
                Ok(_) => {}
                Err(e) if !json => println!("Task {} ({:?}) not placed: {}", k + 1, task_type, e),
                Err(e) => warn!(task = k + 1, error = %e, "Task not placed"),
            }
        }
        if !json {
            println!();
        }
    } else {
        warn!("No coordinator elected");
    }

    let remaining = duration_ms.saturating_sub(sim.now());
    if kill_coordinator {
        drive(&mut sim, remaining / 2, &mut completed, json)?;
        if let Some(coordinator) = sim.coordinators().first().copied() {
            sim.kill(coordinator);
            if !json {
                println!("[{:>6.1}s] Killed coordinator {}", sim.now() as f64 / 1_000.0, coordinator);
            }
        }
    }
    let remaining = duration_ms.saturating_sub(sim.now());
    drive(&mut sim, remaining, &mut completed, json)?;

    let coordinator = sim.coordinators().first().copied();
    let tasks: BTreeMap<u32, String> = coordinator
        .and_then(|c| sim.node(c))
        .map(|node| {
            (1..=num_tasks as u32)
                .filter_map(|id| node.task_state(TaskId(id)).map(|s| (id, format!("{:?}", s))))
                .collect()
        })
        .unwrap_or_default();
    let medium: MediumStats = sim.medium().stats();
    let now = sim.now();
    let retransmissions = sim
        .node_ids()
        .into_iter()
        .filter_map(|id| sim.node_mut(id).map(|n| n.statistics(now).retransmissions))
        .sum();

    let summary = SimSummary {
        seed,
        duration_ms: sim.now(),
        coordinator: coordinator.map(|c| c.to_string()),
        roles: sim
            .roles()
            .into_iter()
            .map(|(id, role)| (id.to_string(), role.map_or("unassigned".to_string(), |r| r.to_string())))
            .collect(),
        tasks,
        frames_sent: medium.frames_sent,
        copies_delivered: medium.copies_delivered,
        copies_lost: medium.copies_lost,
        retransmissions,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!("=== Summary ===");
    println!("Coordinator:      {}", summary.coordinator.as_deref().unwrap_or("none"));
    for (id, role) in &summary.roles {
        println!("  {} {}", id, role);
    }
    println!("Tasks completed:  {}", completed);
    for (id, state) in &summary.tasks {
        println!("  task {} {}", id, state);
    }
    println!("Frames sent:      {}", summary.frames_sent);
    println!("Copies delivered: {}", summary.copies_delivered);
    println!("Copies lost:      {}", summary.copies_lost);
    println!("Retransmissions:  {}", summary.retransmissions);
    Ok(())
}

/// Advance the simulation, completing every task as soon as it lands
fn drive(sim: &mut MeshSimulator, duration_ms: u64, completed: &mut usize, quiet: bool) -> Result<()> {
    let until = sim.now() + duration_ms;
    while sim.now() < until {
        for (id, event) in sim.step() {
            let now = sim.now();
            match event {
                NodeEvent::TaskAssigned { assign, .. } => {
                    // A capture result is roughly one compressed thumbnail
                    let data = vec![0xA5u8; 2_000];
                    if let Some(node) = sim.node_mut(id) {
                        if let Err(e) = node.report_task_result(assign.task_id, TaskStatus::Complete, &data, now) {
                            warn!(node = %id, task = %assign.task_id, error = %e, "Result not sent");
                        }
                    }
                }
                NodeEvent::Coordinator(meshcam_core::CoordinatorEvent::TaskCompleted { .. }) => {
                    *completed += 1;
                }
                other if !quiet => print_event(now, id, &other),
                _ => {}
            }
        }
    }
    Ok(())
}

fn print_event(now: u64, node: NodeId, event: &NodeEvent) {
    let at = now as f64 / 1_000.0;
    match event {
        NodeEvent::RoleChanged { current, .. } => println!("[{:>6.1}s] {} role {}", at, node, current),
        NodeEvent::CoordinatorChanged { current: Some(c), .. } => {
            println!("[{:>6.1}s] {} follows coordinator {}", at, node, c)
        }
        NodeEvent::SplitBrain { other, demoted } => {
            println!("[{:>6.1}s] {} split brain with {} (demoted: {})", at, node, other, demoted)
        }
        NodeEvent::Coordinator(event) => println!("[{:>6.1}s] {} {:?}", at, node, event),
        NodeEvent::TransmissionError { tx_id, kind } => {
            println!("[{:>6.1}s] {} transmission {} failed: {}", at, node, tx_id, kind)
        }
        _ => {}
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    config: Option<PathBuf>,
    profile: Option<PathBuf>,
    node_id: Option<String>,
    bind: SocketAddr,
    peers: Vec<SocketAddr>,
    tick_ms: u64,
    preset: Option<PresetArg>,
    capture_every: Option<u64>,
) -> Result<()> {
    let mut mesh = match &config {
        Some(path) => MeshConfig::from_json_file(path).with_context(|| format!("Loading config {}", path.display()))?,
        None => MeshConfig::default(),
    };
    if let Some(preset) = preset {
        mesh = mesh.with_preset(preset.into());
    }
    let node_id = match (node_id.as_deref(), mesh.node_id) {
        (None, Some(id)) => id,
        (text, _) => parse_node_id(text)?,
    };
    let mesh = mesh.with_node_id(node_id);
    let profile = load_profile(profile.as_deref())?;
    if peers.is_empty() {
        warn!("No peers configured; this node will only hear itself think");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Starting runtime")?;
    runtime.block_on(run_node(mesh, profile, bind, peers, tick_ms.max(1), capture_every))
}

async fn run_node(
    config: MeshConfig,
    profile: HardwareProfile,
    bind: SocketAddr,
    peers: Vec<SocketAddr>,
    tick_ms: u64,
    capture_every: Option<u64>,
) -> Result<()> {
    let node_id = config.node_id.unwrap_or_else(NodeId::random);
    let radio = UdpRadio::bind(bind, peers.clone())
        .await
        .with_context(|| format!("Binding {}", bind))?;
    let detector = CapabilityDetector::new(node_id, profile);
    let mut node = MeshNode::new(config, radio, detector)?;

    println!("=== Camera Mesh Node ===");
    println!("Node ID:  {}", node.node_id());
    println!("Listen:   {}", node.radio().local_addr()?);
    println!("Peers:    {:?}", peers);
    println!("Press Ctrl+C to stop");
    println!();

    let start = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut next_task_id = 1u32;
    let mut last_capture = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = start.elapsed().as_millis() as u64;
                for event in node.process(now) {
                    if let NodeEvent::TaskAssigned { assign, coordinator } = &event {
                        info!(task = %assign.task_id, %coordinator, "Executing task");
                        let data = format!("{:?} at {} ms", assign.task_type, now).into_bytes();
                        if let Err(e) = node.report_task_result(assign.task_id, TaskStatus::Complete, &data, now) {
                            warn!(task = %assign.task_id, error = %e, "Result not sent");
                        }
                    }
                    print_event(now, node.node_id(), &event);
                }

                if let Some(every) = capture_every {
                    if node.is_coordinator() && now.saturating_sub(last_capture) >= every * 1_000 {
                        last_capture = now;
                        let task = Task::new(TaskId(next_task_id), TaskType::Capture, 5);
                        next_task_id = next_task_id.wrapping_add(1).max(1);
                        match node.assign_task(task, None, now) {
                            Ok(target) => info!(%target, "Capture task placed"),
                            Err(e) => warn!(error = %e, "Capture task not placed"),
                        }
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    let stats = node.statistics(start.elapsed().as_millis() as u64);
    println!();
    println!("Statistics:");
    println!("  Role:         {}", node.role().map_or("unassigned".to_string(), |r| r.to_string()));
    println!("  Coordinator:  {}", node.coordinator().map_or("none".to_string(), |c| c.to_string()));
    println!("  Peers:        {}", node.peers().len());
    println!("  TX Packets:   {}", stats.packets_tx);
    println!("  RX Packets:   {}", stats.packets_rx);
    println!("  Retransmits:  {}", stats.retransmissions);
    println!("  Loss rate:    {:.1}%", stats.loss_rate * 100.0);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Simulate {
            nodes,
            duration,
            loss,
            seed,
            tasks,
            kill_coordinator,
            preset,
            json,
        } => cmd_simulate(nodes, duration, loss, seed, tasks, kill_coordinator, preset, json),
        Commands::Run {
            config,
            profile,
            node_id,
            bind,
            peers,
            tick_ms,
            preset,
            capture_every,
        } => cmd_run(config, profile, node_id, bind, peers, tick_ms, preset, capture_every),
        Commands::Detect { profile, node_id, json } => cmd_detect(profile, node_id, json),
        Commands::EncodeDiscovery { profile, node_id } => cmd_encode_discovery(profile, node_id),
        Commands::Presets => cmd_presets(),
        Commands::Config { preset } => cmd_config(preset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_id() {
        assert_eq!(parse_node_id(Some("0x00001a2b")).unwrap(), NodeId::from_u32(0x1a2b));
        assert_eq!(parse_node_id(Some("ff")).unwrap(), NodeId::from_u32(0xff));
        assert!(parse_node_id(Some("0")).is_err());
        assert!(parse_node_id(Some("zz")).is_err());
        assert!(!parse_node_id(None).unwrap().is_broadcast());
    }

    #[test]
    fn test_sim_capabilities_cover_roles() {
        let roles: Vec<_> = (0..5).map(|i| assign_role(&sim_capabilities(i))).collect();
        assert!(roles.contains(&meshcam_core::Role::Relay));
        assert!(roles.contains(&meshcam_core::Role::Stealth));
        assert!(roles.contains(&meshcam_core::Role::AiProcessor));
    }
}

//! Node configuration
//!
//! Every struct here deserializes with `#[serde(default)]`, so a config file
//! only needs to mention the values it changes.

use crate::error::{MeshError, MeshResult};
use crate::protocol::packet::NodeId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Named RTP tuning profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RtpPreset {
    #[default]
    Default,
    LowBandwidth,
    BestEffort,
    HighReliability,
}

impl RtpPreset {
    pub const ALL: [RtpPreset; 4] = [
        RtpPreset::Default,
        RtpPreset::LowBandwidth,
        RtpPreset::BestEffort,
        RtpPreset::HighReliability,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RtpPreset::Default => "default",
            RtpPreset::LowBandwidth => "low-bandwidth",
            RtpPreset::BestEffort => "best-effort",
            RtpPreset::HighReliability => "high-reliability",
        }
    }

    pub fn config(&self) -> RtpConfig {
        match self {
            RtpPreset::Default => RtpConfig::default(),
            RtpPreset::LowBandwidth => RtpConfig::low_bandwidth(),
            RtpPreset::BestEffort => RtpConfig::best_effort(),
            RtpPreset::HighReliability => RtpConfig::high_reliability(),
        }
    }
}

/// Reliable transport tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtpConfig {
    /// Largest payload carried by a single frame; larger payloads are fragmented
    pub max_payload_size: usize,
    /// Transmissions that may wait in the queue
    pub max_queue_size: usize,
    /// Total send attempts per frame (1-10)
    pub max_retries: u8,
    /// Time to wait for an ACK before retrying
    pub ack_timeout_ms: u64,
    /// Backoff before the second attempt; doubles each retry
    pub initial_retry_delay_ms: u64,
    /// Upper bound on the backoff
    pub max_retry_delay_ms: u64,
    /// Scale the ACK timeout from measured round-trip time
    pub adaptive_retry: bool,
    /// Token bucket refill rate
    pub max_bytes_per_second: u32,
    /// Adaptive bandwidth never drops below this
    pub min_bytes_per_second: u32,
    /// Adaptive bandwidth never rises above this
    pub max_bytes_per_second_ceiling: u32,
    /// Adjust the rate from observed loss
    pub adaptive_bandwidth: bool,
    /// How often loss is evaluated for rate adjustment
    pub bandwidth_eval_interval_ms: u64,
    /// Partial reassembly is discarded after this long
    pub reassembly_timeout_ms: u64,
    /// Frames sent per `process()` call at most
    pub max_packets_per_tick: usize,
    /// Per-sender duplicate window, in sequence numbers (multiple of 64)
    pub dedup_window: u16,
    /// Final statuses kept after a transmission is freed
    pub status_history: usize,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 256,
            max_queue_size: 64,
            max_retries: 5,
            ack_timeout_ms: 5000,
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            adaptive_retry: false,
            max_bytes_per_second: 2048,
            min_bytes_per_second: 64,
            max_bytes_per_second_ceiling: 4096,
            adaptive_bandwidth: true,
            bandwidth_eval_interval_ms: 5000,
            reassembly_timeout_ms: 30_000,
            max_packets_per_tick: 8,
            dedup_window: 256,
            status_history: 64,
        }
    }
}

impl RtpConfig {
    /// Hard upper bound on `max_retries`
    pub const MAX_RETRIES_LIMIT: u8 = 10;

    /// Slow links: patient retries, small rate
    pub fn low_bandwidth() -> Self {
        Self {
            max_retries: 7,
            initial_retry_delay_ms: 2000,
            max_bytes_per_second: 512,
            max_bytes_per_second_ceiling: 1024,
            ..Default::default()
        }
    }

    /// Throughput over delivery
    pub fn best_effort() -> Self {
        Self {
            max_bytes_per_second: 10_240,
            max_bytes_per_second_ceiling: 20_480,
            max_retries: 2,
            ..Default::default()
        }
    }

    /// Delivery over latency
    pub fn high_reliability() -> Self {
        Self {
            max_retries: 10,
            ack_timeout_ms: 10_000,
            adaptive_retry: true,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_ack_timeout(mut self, ms: u64) -> Self {
        self.ack_timeout_ms = ms;
        self
    }

    pub fn with_retry_delay(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_retry_delay_ms = initial_ms;
        self.max_retry_delay_ms = max_ms;
        self
    }

    pub fn with_bandwidth(mut self, bytes_per_second: u32) -> Self {
        self.max_bytes_per_second = bytes_per_second;
        self.max_bytes_per_second_ceiling = self.max_bytes_per_second_ceiling.max(bytes_per_second);
        self
    }

    pub fn with_adaptive_bandwidth(mut self, enabled: bool) -> Self {
        self.adaptive_bandwidth = enabled;
        self
    }

    pub fn with_max_payload_size(mut self, bytes: usize) -> Self {
        self.max_payload_size = bytes;
        self
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn validate(&self) -> MeshResult<()> {
        if self.max_retries == 0 || self.max_retries > Self::MAX_RETRIES_LIMIT {
            return Err(MeshError::Config(format!(
                "max_retries must be 1..={}, got {}",
                Self::MAX_RETRIES_LIMIT,
                self.max_retries
            )));
        }
        if self.max_payload_size == 0 {
            return Err(MeshError::Config("max_payload_size must be positive".into()));
        }
        if self.max_queue_size == 0 {
            return Err(MeshError::Config("max_queue_size must be positive".into()));
        }
        if self.min_bytes_per_second == 0
            || self.min_bytes_per_second > self.max_bytes_per_second
            || self.max_bytes_per_second > self.max_bytes_per_second_ceiling
        {
            return Err(MeshError::Config(
                "bandwidth must satisfy 0 < min <= max <= ceiling".into(),
            ));
        }
        if self.dedup_window == 0 || self.dedup_window % 64 != 0 {
            return Err(MeshError::Config(format!(
                "dedup_window must be a positive multiple of 64, got {}",
                self.dedup_window
            )));
        }
        Ok(())
    }
}

/// Weights of the coordinator-eligibility score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityWeights {
    /// Points per battery percent
    pub battery_per_percent: f32,
    pub ai_accelerator_bonus: f32,
    /// Reached at `storage_saturation_bytes`
    pub storage_max_bonus: f32,
    pub storage_saturation_bytes: u64,
    /// Reached at `uptime_saturation_secs`
    pub uptime_max_bonus: f32,
    pub uptime_saturation_secs: u32,
    pub hop_penalty: f32,
}

impl Default for EligibilityWeights {
    fn default() -> Self {
        Self {
            battery_per_percent: 0.4,
            ai_accelerator_bonus: 20.0,
            storage_max_bonus: 10.0,
            storage_saturation_bytes: 64 * 1024 * 1024,
            uptime_max_bonus: 20.0,
            uptime_saturation_secs: 24 * 3600,
            hop_penalty: 5.0,
        }
    }
}

/// Election and role timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    /// Discovery window before the election is decided
    pub discovery_window_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Missed heartbeat intervals before the coordinator is presumed lost
    pub coordinator_timeout_factor: u32,
    pub capability_poll_interval_ms: u64,
    pub weights: EligibilityWeights,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            discovery_window_ms: 30_000,
            heartbeat_interval_ms: 10_000,
            coordinator_timeout_factor: 3,
            capability_poll_interval_ms: 5_000,
            weights: EligibilityWeights::default(),
        }
    }
}

impl RoleConfig {
    /// Silence after which the coordinator is considered gone
    pub fn coordinator_timeout_ms(&self) -> u64 {
        self.heartbeat_interval_ms
            .saturating_mul(self.coordinator_timeout_factor as u64)
    }
}

/// Weights of the task placement score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionWeights {
    /// Awarded for each capability the task type benefits from
    pub affinity_per_capability: f32,
    /// Per megapixel of sensor resolution, for capture
    pub resolution_per_megapixel: f32,
    pub resolution_max_bonus: f32,
    /// Reached at `storage_saturation_bytes`, for capture
    pub storage_max_bonus: f32,
    pub storage_saturation_bytes: u64,
    pub battery_per_percent: f32,
    /// Applied to (100 + RSSI)
    pub rssi_weight: f32,
    pub load_penalty: f32,
    pub hop_penalty: f32,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            affinity_per_capability: 30.0,
            resolution_per_megapixel: 2.0,
            resolution_max_bonus: 10.0,
            storage_max_bonus: 10.0,
            storage_saturation_bytes: 1024 * 1024 * 1024,
            battery_per_percent: 0.2,
            rssi_weight: 0.1,
            load_penalty: 10.0,
            hop_penalty: 5.0,
        }
    }
}

/// Board coordinator behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub sweep_interval_ms: u64,
    /// Silence after which a node is marked inactive
    pub node_timeout_ms: u64,
    pub rebalance_interval_ms: u64,
    /// Nodes above this multiple of the average load shed tasks
    pub rebalance_threshold: f32,
    /// Only tasks below this priority migrate
    pub rebalance_max_priority: u8,
    /// Completed tasks stay in the ledger this long
    pub completed_grace_ms: u64,
    /// Retries after a FAILED result
    pub task_retries: u8,
    /// The coordinator may run tasks itself
    pub coordinator_takes_tasks: bool,
    /// Final task outcomes kept after removal from the ledger
    pub task_history: usize,
    pub selection: SelectionWeights,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 10_000,
            node_timeout_ms: 60_000,
            rebalance_interval_ms: 30_000,
            rebalance_threshold: 1.5,
            rebalance_max_priority: 3,
            completed_grace_ms: 60_000,
            task_retries: 1,
            coordinator_takes_tasks: true,
            task_history: 128,
            selection: SelectionWeights::default(),
        }
    }
}

/// Flood relay behavior of RELAY nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Frames that have travelled this many hops are not forwarded again
    pub max_hops: u8,
    pub forward_cache_ttl_ms: u64,
    pub forward_cache_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_hops: 3,
            forward_cache_ttl_ms: 60_000,
            forward_cache_size: 256,
        }
    }
}

/// Complete node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// This node's ID (random if None)
    pub node_id: Option<NodeId>,
    pub rtp: RtpConfig,
    pub role: RoleConfig,
    pub coordinator: CoordinatorConfig,
    pub relay: RelayConfig,
    /// Peers tracked in the peer table
    pub max_peers: usize,
    /// Frames pulled from the radio per tick
    pub radio_drain_limit: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            rtp: RtpConfig::default(),
            role: RoleConfig::default(),
            coordinator: CoordinatorConfig::default(),
            relay: RelayConfig::default(),
            max_peers: 64,
            radio_drain_limit: 32,
        }
    }
}

impl MeshConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; missing keys take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> MeshResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> MeshResult<Self> {
        let config: MeshConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> MeshResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> MeshResult<()> {
        self.rtp.validate()?;
        if self.role.heartbeat_interval_ms == 0 || self.role.coordinator_timeout_factor == 0 {
            return Err(MeshError::Config("heartbeat timing must be positive".into()));
        }
        if self.coordinator.rebalance_threshold < 1.0 {
            return Err(MeshError::Config("rebalance_threshold must be >= 1.0".into()));
        }
        if self.max_peers == 0 || self.radio_drain_limit == 0 {
            return Err(MeshError::Config("max_peers and radio_drain_limit must be positive".into()));
        }
        if self.relay.max_hops > crate::protocol::packet::PacketFlags::MAX_HOPS {
            return Err(MeshError::Config("relay max_hops cannot exceed 7".into()));
        }
        Ok(())
    }

    pub fn with_node_id(mut self, id: NodeId) -> Self {
        self.node_id = Some(id);
        self
    }

    pub fn with_rtp(mut self, rtp: RtpConfig) -> Self {
        self.rtp = rtp;
        self
    }

    pub fn with_preset(mut self, preset: RtpPreset) -> Self {
        self.rtp = preset.config();
        self
    }

    pub fn with_discovery_window(mut self, ms: u64) -> Self {
        self.role.discovery_window_ms = ms;
        self
    }

    pub fn with_heartbeat_interval(mut self, ms: u64) -> Self {
        self.role.heartbeat_interval_ms = ms;
        self
    }

    pub fn with_coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.coordinator = coordinator;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::new();
        assert_eq!(config.rtp.max_retries, 5);
        assert_eq!(config.rtp.ack_timeout_ms, 5000);
        assert_eq!(config.rtp.max_payload_size, 256);
        assert_eq!(config.rtp.dedup_window, 256);
        assert_eq!(config.role.discovery_window_ms, 30_000);
        assert_eq!(config.role.coordinator_timeout_ms(), 30_000);
        assert_eq!(config.coordinator.node_timeout_ms, 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let low = RtpConfig::low_bandwidth();
        assert_eq!(low.max_retries, 7);
        assert_eq!(low.initial_retry_delay_ms, 2000);
        assert_eq!(low.max_bytes_per_second, 512);

        let best = RtpConfig::best_effort();
        assert_eq!(best.max_bytes_per_second, 10_240);
        assert_eq!(best.max_retries, 2);

        let high = RtpConfig::high_reliability();
        assert_eq!(high.max_retries, 10);
        assert_eq!(high.ack_timeout_ms, 10_000);
        assert!(high.adaptive_retry);

        for preset in RtpPreset::ALL {
            assert!(preset.config().validate().is_ok(), "{}", preset.name());
        }
    }

    #[test]
    fn test_partial_json() {
        let config = MeshConfig::from_json_str(
            r#"{ "node_id": 42, "rtp": { "max_retries": 3 }, "role": { "heartbeat_interval_ms": 2000 } }"#,
        )
        .unwrap();
        assert_eq!(config.node_id, Some(NodeId::from_u32(42)));
        assert_eq!(config.rtp.max_retries, 3);
        assert_eq!(config.rtp.ack_timeout_ms, 5000);
        assert_eq!(config.role.heartbeat_interval_ms, 2000);
        assert_eq!(config.max_peers, 64);
    }

    #[test]
    fn test_invalid_retries_rejected() {
        let err = MeshConfig::from_json_str(r#"{ "rtp": { "max_retries": 11 } }"#).unwrap_err();
        assert!(matches!(err, MeshError::Config(_)));
    }

    #[test]
    fn test_json_round_trip_file() {
        let path = std::env::temp_dir().join(format!("meshcam-config-{}.json", std::process::id()));
        let config = MeshConfig::new().with_preset(RtpPreset::LowBandwidth);
        std::fs::write(&path, config.to_json().unwrap()).unwrap();
        let loaded = MeshConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(path);
    }
}

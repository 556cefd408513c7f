//! Hardware capability detection
//!
//! A node's capabilities come from two places: a [`HardwareProfile`] that
//! declares what the host cannot discover on its own (accelerators, PSRAM,
//! attached radios) and a [`SystemProbe`] that reads live facts such as battery
//! level and free storage. [`CapabilityDetector`] merges the two.
//!
//! Detection never fails. Anything that cannot be determined is reported as
//! absent: no camera, unknown battery, battery power, zero free bytes.

use crate::protocol::packet::NodeId;
use crate::traits::CapabilityProvider;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Battery change (percentage points) that triggers re-advertisement
pub const READVERTISE_BATTERY_DELTA: u8 = 20;

/// How the node is powered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSource {
    #[default]
    Battery,
    Solar,
    Mains,
}

impl PowerSource {
    /// Wire code
    pub fn as_byte(&self) -> u8 {
        match self {
            PowerSource::Battery => 0,
            PowerSource::Solar => 1,
            PowerSource::Mains => 2,
        }
    }

    /// Decode from wire code
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PowerSource::Battery),
            1 => Some(PowerSource::Solar),
            2 => Some(PowerSource::Mains),
            _ => None,
        }
    }
}

/// Sensor resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u16,
    pub height: u16,
}

impl Resolution {
    pub const NONE: Resolution = Resolution { width: 0, height: 0 };
    pub const FULL_HD: Resolution = Resolution { width: 1920, height: 1080 };
    pub const UXGA: Resolution = Resolution { width: 1600, height: 1200 };

    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// True when both dimensions reach `other`
    pub fn at_least(&self, other: Resolution) -> bool {
        self.width >= other.width && self.height >= other.height
    }

    /// Total pixel count
    pub fn pixels(&self) -> u32 {
        self.width as u32 * self.height as u32
    }
}

/// Snapshot of what a node can do, advertised in every discovery and heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapabilities {
    pub node_id: NodeId,
    pub has_camera: bool,
    pub has_radio: bool,
    pub has_ai_accelerator: bool,
    pub has_psram: bool,
    pub has_sd_card: bool,
    pub has_cellular: bool,
    pub has_satellite: bool,
    pub low_power_profile: bool,
    /// 0-100, `None` when unknown
    pub battery_percent: Option<u8>,
    pub power_source: PowerSource,
    pub storage_free_bytes: u64,
    pub max_resolution: Resolution,
    /// dBm of the last received frame
    pub signal_rssi: i16,
    pub uptime_secs: u32,
}

impl NodeCapabilities {
    /// A node with nothing detected
    pub fn empty(node_id: NodeId) -> Self {
        Self {
            node_id,
            has_camera: false,
            has_radio: false,
            has_ai_accelerator: false,
            has_psram: false,
            has_sd_card: false,
            has_cellular: false,
            has_satellite: false,
            low_power_profile: false,
            battery_percent: None,
            power_source: PowerSource::Battery,
            storage_free_bytes: 0,
            max_resolution: Resolution::NONE,
            signal_rssi: -120,
            uptime_secs: 0,
        }
    }

    pub fn with_camera(mut self, resolution: Resolution) -> Self {
        self.has_camera = true;
        self.max_resolution = resolution;
        self
    }

    pub fn with_radio(mut self) -> Self {
        self.has_radio = true;
        self
    }

    pub fn with_ai_accelerator(mut self) -> Self {
        self.has_ai_accelerator = true;
        self
    }

    pub fn with_psram(mut self) -> Self {
        self.has_psram = true;
        self
    }

    pub fn with_sd_card(mut self, free_bytes: u64) -> Self {
        self.has_sd_card = true;
        self.storage_free_bytes = free_bytes;
        self
    }

    pub fn with_storage(mut self, free_bytes: u64) -> Self {
        self.storage_free_bytes = free_bytes;
        self
    }

    pub fn with_battery(mut self, percent: u8) -> Self {
        self.battery_percent = Some(percent.min(100));
        self
    }

    pub fn with_power_source(mut self, source: PowerSource) -> Self {
        self.power_source = source;
        self
    }

    pub fn with_cellular(mut self) -> Self {
        self.has_cellular = true;
        self
    }

    pub fn with_satellite(mut self) -> Self {
        self.has_satellite = true;
        self
    }

    pub fn with_low_power_profile(mut self) -> Self {
        self.low_power_profile = true;
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.signal_rssi = rssi;
        self
    }

    pub fn with_uptime(mut self, secs: u32) -> Self {
        self.uptime_secs = secs;
        self
    }

    /// Battery level used for scoring: mains counts as full, unknown as empty
    pub fn effective_battery(&self) -> u8 {
        match (self.power_source, self.battery_percent) {
            (PowerSource::Mains, _) => 100,
            (_, Some(percent)) => percent.min(100),
            (_, None) => 0,
        }
    }

    /// The only long-haul links are cellular or satellite
    pub fn is_backhaul_only(&self) -> bool {
        !self.has_radio && (self.has_cellular || self.has_satellite)
    }
}

/// Check whether `current` differs enough from `previous` to re-announce
pub fn needs_readvertise(previous: &NodeCapabilities, current: &NodeCapabilities) -> bool {
    let battery_moved = match (previous.battery_percent, current.battery_percent) {
        (Some(a), Some(b)) => a.abs_diff(b) >= READVERTISE_BATTERY_DELTA,
        (None, None) => false,
        _ => true,
    };

    battery_moved
        || previous.power_source != current.power_source
        || previous.has_camera != current.has_camera
        || previous.has_ai_accelerator != current.has_ai_accelerator
        || previous.has_radio != current.has_radio
        || previous.low_power_profile != current.low_power_profile
}

/// Static hardware facts, typically loaded from the node's config file.
///
/// Every field is optional; a missing field means the capability is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareProfile {
    /// Overrides camera probing when set
    pub has_camera: Option<bool>,
    pub has_radio: Option<bool>,
    pub has_ai_accelerator: Option<bool>,
    pub has_psram: Option<bool>,
    pub has_sd_card: Option<bool>,
    pub has_cellular: Option<bool>,
    pub has_satellite: Option<bool>,
    pub low_power_profile: Option<bool>,
    pub max_resolution: Option<Resolution>,
    /// Overrides the probed supply (solar cannot be probed)
    pub power_source: Option<PowerSource>,
    /// Directory whose filesystem holds captured media
    pub storage_path: Option<PathBuf>,
}

/// Reads dynamic host facts from the filesystem.
///
/// All paths are resolved below `root` so tests can point the probe at a
/// fake sysfs tree.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    root: PathBuf,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SystemProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn read_trimmed(path: &Path) -> Option<String> {
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }

    /// Battery level and supply type from `/sys/class/power_supply`
    pub fn power(&self) -> (Option<u8>, PowerSource) {
        let mut battery = None;
        let mut source = PowerSource::Battery;

        let Ok(entries) = fs::read_dir(self.path("sys/class/power_supply")) else {
            return (None, PowerSource::Battery);
        };

        for entry in entries.flatten() {
            let dir = entry.path();
            match Self::read_trimmed(&dir.join("type")).as_deref() {
                Some("Battery") => {
                    if let Some(level) = Self::read_trimmed(&dir.join("capacity"))
                        .and_then(|s| s.parse::<u8>().ok())
                        .filter(|level| *level <= 100)
                    {
                        battery = Some(level);
                    }
                }
                Some("Mains") | Some("USB") => {
                    if Self::read_trimmed(&dir.join("online")).as_deref() == Some("1") {
                        source = PowerSource::Mains;
                    }
                }
                _ => {}
            }
        }

        (battery, source)
    }

    /// Any V4L2 capture device present
    pub fn camera_present(&self) -> bool {
        let Ok(entries) = fs::read_dir(self.path("dev")) else {
            return false;
        };
        entries
            .flatten()
            .any(|e| e.file_name().to_string_lossy().starts_with("video"))
    }

    /// Seconds since boot from `/proc/uptime`
    pub fn uptime_secs(&self) -> u32 {
        Self::read_trimmed(&self.path("proc/uptime"))
            .and_then(|s| s.split_whitespace().next().map(str::to_string))
            .and_then(|s| s.parse::<f64>().ok())
            .map(|secs| secs.clamp(0.0, u32::MAX as f64) as u32)
            .unwrap_or(0)
    }

    /// Bytes available to unprivileged users on the filesystem holding `path`
    #[cfg(unix)]
    pub fn storage_free(&self, path: &Path) -> u64 {
        match nix::sys::statvfs::statvfs(path) {
            Ok(stat) => (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "statvfs failed");
                0
            }
        }
    }

    #[cfg(not(unix))]
    pub fn storage_free(&self, _path: &Path) -> u64 {
        0
    }
}

/// Produces [`NodeCapabilities`] from a profile and live probes
#[derive(Debug, Clone)]
pub struct CapabilityDetector {
    node_id: NodeId,
    profile: HardwareProfile,
    probe: SystemProbe,
}

impl CapabilityDetector {
    pub fn new(node_id: NodeId, profile: HardwareProfile) -> Self {
        Self {
            node_id,
            profile,
            probe: SystemProbe::default(),
        }
    }

    /// Use a probe rooted somewhere other than `/`
    pub fn with_probe(mut self, probe: SystemProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    /// Probe the host. Never fails; unknowns are reported as absent.
    pub fn detect_capabilities(&self) -> NodeCapabilities {
        let profile = &self.profile;
        let (battery, probed_source) = self.probe.power();
        let has_camera = profile
            .has_camera
            .unwrap_or_else(|| self.probe.camera_present());
        let storage_free_bytes = profile
            .storage_path
            .as_deref()
            .map(|path| self.probe.storage_free(path))
            .unwrap_or(0);

        let caps = NodeCapabilities {
            node_id: self.node_id,
            has_camera,
            has_radio: profile.has_radio.unwrap_or(false),
            has_ai_accelerator: profile.has_ai_accelerator.unwrap_or(false),
            has_psram: profile.has_psram.unwrap_or(false),
            has_sd_card: profile.has_sd_card.unwrap_or(false),
            has_cellular: profile.has_cellular.unwrap_or(false),
            has_satellite: profile.has_satellite.unwrap_or(false),
            low_power_profile: profile.low_power_profile.unwrap_or(false),
            battery_percent: battery,
            power_source: profile.power_source.unwrap_or(probed_source),
            storage_free_bytes,
            max_resolution: if has_camera {
                profile.max_resolution.unwrap_or(Resolution::NONE)
            } else {
                Resolution::NONE
            },
            signal_rssi: -120,
            uptime_secs: self.probe.uptime_secs(),
        };

        trace!(node = %self.node_id, ?caps, "Capabilities probed");
        caps
    }
}

impl CapabilityProvider for CapabilityDetector {
    fn current_capabilities(&mut self) -> NodeCapabilities {
        let caps = self.detect_capabilities();
        debug!(
            node = %caps.node_id,
            battery = ?caps.battery_percent,
            power = ?caps.power_source,
            "Capability refresh"
        );
        caps
    }
}

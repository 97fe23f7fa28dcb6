//! Configuration for the edgecap node service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use edgecap_core::{
    CaptureTiming, Identity, OverflowPolicy, PipelineConfig, RetryPolicy, parse_route,
};

// ── ConfigError ──────────────────────────────────────────────────

/// Startup configuration failures. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} is missing")]
    Missing(PathBuf),

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ── Sections ─────────────────────────────────────────────────────

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identity.
    pub node: NodeSection,
    /// Delivery endpoint.
    pub server: ServerConfig,
    /// Trigger sensor.
    pub sensor: SensorConfig,
    /// Capture-in-progress indicator.
    pub indicator: IndicatorConfig,
    /// Frame source.
    pub camera: CameraConfig,
    /// Capture loop and worker polling.
    pub timing: TimingConfig,
    /// Retry tier backoff and budget.
    pub retry: RetryConfig,
    /// Queue caps.
    pub queue: QueueConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Identifier stamped on every payload.
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Absolute http(s) URL payloads are posted to.
    pub route: String,
    /// Upper bound for one delivery attempt, in milliseconds.
    pub request_timeout_ms: u64,
}

/// Where the trigger signal comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// sysfs GPIO pin (`/sys/class/gpio/gpio<pin>/value`).
    Gpio,
    /// Any file holding `0` or `1`.
    File,
    /// Always triggered (bench testing).
    Always,
    /// Never triggered.
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub kind: SensorKind,
    /// GPIO pin number for `kind = "gpio"`.
    pub pin: u32,
    /// Value file for `kind = "file"`.
    pub path: String,
    /// Treat a low level as "triggered" (the PIR wiring pulls low on motion).
    pub active_low: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Drive an LED on this GPIO pin while capturing.
    pub enabled: bool,
    pub pin: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraKind {
    /// Read the latest frame from a file written by an external grabber.
    File,
    /// Deterministic test pattern.
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub kind: CameraKind,
    /// Frame file for `kind = "file"`.
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Shape descriptor override; derived from the dimensions if empty.
    pub shape: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Sensor poll interval while idle.
    pub idle_ms: u64,
    /// Pause after each capture.
    pub cooldown_ms: u64,
    /// Worker poll interval on an empty queue.
    pub worker_idle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Throttle before every retry.
    pub delay_ms: u64,
    /// Cooldown after a failed retry.
    pub cooldown_ms: u64,
    /// Cooldown growth per consecutive failure (1.0 = fixed).
    pub multiplier: f64,
    pub max_cooldown_ms: u64,
    /// Give up after this many attempts; 0 = never.
    pub max_attempts: u32,
    /// Give up this long after capture; 0 = never.
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowConfig {
    DropOldest,
    RejectNewest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Tier-1 cap; 0 = unbounded.
    pub tier1_capacity: usize,
    /// Tier-2 cap; 0 = unbounded.
    pub tier2_capacity: usize,
    pub overflow: OverflowConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
    /// Seconds between pipeline stats lines; 0 disables them.
    pub stats_interval_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSection::default(),
            server: ServerConfig::default(),
            sensor: SensorConfig::default(),
            indicator: IndicatorConfig::default(),
            camera: CameraConfig::default(),
            timing: TimingConfig::default(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NodeSection {
    fn default() -> Self {
        Self { id: "D1".into() }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            route: "http://127.0.0.1:5000/api/v1.0/capture".into(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::Gpio,
            pin: 4,
            path: String::new(),
            active_low: true,
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pin: 23,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            kind: CameraKind::Synthetic,
            path: String::new(),
            width: 640,
            height: 480,
            channels: 3,
            shape: String::new(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            idle_ms: 250,
            cooldown_ms: 2_000,
            worker_idle_ms: 100,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: 5_000,
            cooldown_ms: 25_000,
            multiplier: 1.0,
            max_cooldown_ms: 300_000,
            max_attempts: 0,
            max_age_secs: 0,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tier1_capacity: 0,
            tier2_capacity: 0,
            overflow: OverflowConfig::DropOldest,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
            stats_interval_secs: 60,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Unlike most settings files a missing config is an error: the node
    /// has no sensible default destination.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::Missing(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply command-line overrides.
    pub fn apply_overrides(&mut self, node_id: Option<String>, route: Option<String>) {
        if let Some(id) = node_id {
            self.node.id = id;
        }
        if let Some(route) = route {
            self.server.route = route;
        }
    }

    /// Check everything the pipeline cannot recover from at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.id.trim().is_empty() {
            return Err(invalid("node.id", "must not be empty"));
        }
        parse_route(&self.server.route).map_err(|e| invalid("server.route", e.to_string()))?;
        if self.server.request_timeout_ms == 0 {
            return Err(invalid("server.request_timeout_ms", "must be positive"));
        }
        if self.sensor.kind == SensorKind::File && self.sensor.path.is_empty() {
            return Err(invalid("sensor.path", "required for kind = \"file\""));
        }
        match self.camera.kind {
            CameraKind::File if self.camera.path.is_empty() => {
                return Err(invalid("camera.path", "required for kind = \"file\""));
            }
            CameraKind::Synthetic
                if self.camera.width == 0 || self.camera.height == 0 || self.camera.channels == 0 =>
            {
                return Err(invalid("camera", "width, height and channels must be positive"));
            }
            _ => {}
        }
        if self.timing.idle_ms == 0 {
            return Err(invalid("timing.idle_ms", "must be positive"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(invalid("retry.multiplier", "must be a finite number >= 1.0"));
        }
        if self.retry.max_attempts == 1 {
            return Err(invalid(
                "retry.max_attempts",
                "must be 0 (unbounded) or at least 2",
            ));
        }
        Ok(())
    }

    /// Identity snapshot for the pipeline.
    pub fn identity(&self) -> Result<Identity, ConfigError> {
        Identity::new(self.node.id.clone(), &self.server.route)
            .map_err(|e| invalid("server.route", e.to_string()))
    }

    /// Shape descriptor for captured frames, e.g. `"(480, 640, 3)"`.
    pub fn shape(&self) -> String {
        if self.camera.shape.is_empty() {
            format!(
                "({}, {}, {})",
                self.camera.height, self.camera.width, self.camera.channels
            )
        } else {
            self.camera.shape.clone()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms.max(1))
    }

    /// Convert into the core's `PipelineConfig`.
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        let nonzero = |n: usize| (n > 0).then_some(n);
        let cooldown = Duration::from_millis(self.retry.cooldown_ms);
        PipelineConfig {
            capture: CaptureTiming {
                idle_interval: Duration::from_millis(self.timing.idle_ms.max(10)),
                cooldown: Duration::from_millis(self.timing.cooldown_ms),
            },
            worker_idle_poll: Duration::from_millis(self.timing.worker_idle_ms.clamp(10, 5_000)),
            retry: RetryPolicy {
                retry_delay: Duration::from_millis(self.retry.delay_ms),
                cooldown,
                multiplier: self.retry.multiplier.max(1.0),
                max_cooldown: Duration::from_millis(self.retry.max_cooldown_ms).max(cooldown),
                max_attempts: (self.retry.max_attempts > 0).then_some(self.retry.max_attempts),
                max_age: (self.retry.max_age_secs > 0)
                    .then(|| Duration::from_secs(self.retry.max_age_secs)),
            },
            tier1_capacity: nonzero(self.queue.tier1_capacity),
            tier2_capacity: nonzero(self.queue.tier2_capacity),
            overflow: match self.queue.overflow {
                OverflowConfig::DropOldest => OverflowPolicy::DropOldest,
                OverflowConfig::RejectNewest => OverflowPolicy::RejectNewest,
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

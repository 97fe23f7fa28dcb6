//! Hardware adapters for the capture loop.
//!
//! GPIO goes through the Linux sysfs interface: a pin is exported once at
//! startup and its `value` file is then read (sensor) or written
//! (indicator). Frames come either from a file that an external grabber
//! keeps overwriting or from a synthetic test pattern.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use edgecap_core::{Artifact, Camera, EdgecapError, Indicator, NoIndicator, Sensor};

use crate::config::{CameraKind, NodeConfig, SensorKind};

const GPIO_ROOT: &str = "/sys/class/gpio";

// ── GPIO ─────────────────────────────────────────────────────────

/// Direction written to a sysfs GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// Path of the `value` file for a sysfs pin.
pub fn gpio_value_path(pin: u32) -> PathBuf {
    PathBuf::from(format!("{GPIO_ROOT}/gpio{pin}/value"))
}

/// Export `pin` (if needed) and set its direction.
pub fn export_gpio(pin: u32, direction: Direction) -> Result<PathBuf, EdgecapError> {
    let value = gpio_value_path(pin);
    let pin_dir = value.parent().unwrap_or(Path::new(GPIO_ROOT));
    if !pin_dir.exists() {
        std::fs::write(format!("{GPIO_ROOT}/export"), pin.to_string())?;
        debug!(pin, "gpio exported");
    }
    std::fs::write(pin_dir.join("direction"), direction.as_str())?;
    Ok(value)
}

// ── Sensors ──────────────────────────────────────────────────────

/// Reads `0`/`1` from a sysfs-style value file.
pub struct ValueFileSensor {
    path: PathBuf,
    active_low: bool,
}

impl ValueFileSensor {
    pub fn new(path: impl Into<PathBuf>, active_low: bool) -> Self {
        Self {
            path: path.into(),
            active_low,
        }
    }

    fn parse(&self, raw: &str) -> Result<bool, EdgecapError> {
        let high = match raw.trim() {
            "1" => true,
            "0" => false,
            other => {
                return Err(EdgecapError::Sense(format!(
                    "{}: unexpected value {other:?}",
                    self.path.display()
                )));
            }
        };
        Ok(high != self.active_low)
    }
}

#[async_trait]
impl Sensor for ValueFileSensor {
    async fn sense(&mut self) -> Result<bool, EdgecapError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| EdgecapError::Sense(format!("{}: {e}", self.path.display())))?;
        self.parse(&raw)
    }
}

/// A sensor stuck at one level.
pub struct StaticSensor(pub bool);

#[async_trait]
impl Sensor for StaticSensor {
    async fn sense(&mut self) -> Result<bool, EdgecapError> {
        Ok(self.0)
    }
}

// ── Indicator ────────────────────────────────────────────────────

/// Writes `1`/`0` to a value file, e.g. an LED pin.
pub struct ValueFileIndicator {
    path: PathBuf,
    failed: bool,
}

impl ValueFileIndicator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            failed: false,
        }
    }
}

impl Indicator for ValueFileIndicator {
    fn set(&mut self, on: bool) {
        let value = if on { "1" } else { "0" };
        match std::fs::write(&self.path, value) {
            Ok(()) => self.failed = false,
            // Only the first failure of a streak is logged.
            Err(e) if !self.failed => {
                self.failed = true;
                warn!(path = %self.path.display(), error = %e, "indicator write failed");
            }
            Err(_) => {}
        }
    }
}

// ── Cameras ──────────────────────────────────────────────────────

/// Returns the current contents of a frame file.
pub struct FrameFileCamera {
    path: PathBuf,
    shape: String,
}

impl FrameFileCamera {
    pub fn new(path: impl Into<PathBuf>, shape: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            shape: shape.into(),
        }
    }
}

#[async_trait]
impl Camera for FrameFileCamera {
    async fn capture(&mut self) -> Result<Artifact, EdgecapError> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| EdgecapError::Capture(format!("{}: {e}", self.path.display())))?;
        if data.is_empty() {
            return Err(EdgecapError::Capture(format!(
                "{}: frame file is empty",
                self.path.display()
            )));
        }
        Ok(Artifact::new(data, self.shape.clone()))
    }
}

/// Generates a `height × width × channels` gradient that shifts every
/// frame, so consecutive captures have distinct digests.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    channels: u32,
    shape: String,
    frame: u64,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, channels: u32, shape: impl Into<String>) -> Self {
        Self {
            width,
            height,
            channels,
            shape: shape.into(),
            frame: 0,
        }
    }

    fn render(&self) -> Bytes {
        let (w, h, c) = (
            self.width as usize,
            self.height as usize,
            self.channels as usize,
        );
        let mut buf = Vec::with_capacity(w * h * c);
        for y in 0..h {
            for x in 0..w {
                for ch in 0..c {
                    buf.push((x + y + ch * 85 + self.frame as usize) as u8);
                }
            }
        }
        Bytes::from(buf)
    }
}

#[async_trait]
impl Camera for SyntheticCamera {
    async fn capture(&mut self) -> Result<Artifact, EdgecapError> {
        let data = self.render();
        self.frame = self.frame.wrapping_add(1);
        Ok(Artifact::new(data, self.shape.clone()))
    }
}

// ── Factories ────────────────────────────────────────────────────

/// Build the trigger sensor, exporting its GPIO pin if needed.
pub fn build_sensor(config: &NodeConfig) -> Result<Box<dyn Sensor>, EdgecapError> {
    let s = &config.sensor;
    Ok(match s.kind {
        SensorKind::Gpio => {
            let path = export_gpio(s.pin, Direction::In)?;
            Box::new(ValueFileSensor::new(path, s.active_low))
        }
        SensorKind::File => Box::new(ValueFileSensor::new(Path::new(&s.path), s.active_low)),
        SensorKind::Always => Box::new(StaticSensor(true)),
        SensorKind::Never => Box::new(StaticSensor(false)),
    })
}

pub fn build_camera(config: &NodeConfig) -> Box<dyn Camera> {
    let c = &config.camera;
    match c.kind {
        CameraKind::File => Box::new(FrameFileCamera::new(&c.path, config.shape())),
        CameraKind::Synthetic => Box::new(SyntheticCamera::new(
            c.width,
            c.height,
            c.channels,
            config.shape(),
        )),
    }
}

pub fn build_indicator(config: &NodeConfig) -> Result<Box<dyn Indicator>, EdgecapError> {
    if !config.indicator.enabled {
        return Ok(Box::new(NoIndicator));
    }
    let path = export_gpio(config.indicator.pin, Direction::Out)?;
    Ok(Box::new(ValueFileIndicator::new(path)))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("edgecap-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn gpio_paths() {
        assert_eq!(
            gpio_value_path(21),
            PathBuf::from("/sys/class/gpio/gpio21/value")
        );
    }

    #[tokio::test]
    async fn value_file_sensor_honours_polarity() {
        let path = temp_file("pir", b"0\n");
        let mut active_low = ValueFileSensor::new(&path, true);
        let mut active_high = ValueFileSensor::new(&path, false);
        assert!(active_low.sense().await.unwrap());
        assert!(!active_high.sense().await.unwrap());

        std::fs::write(&path, "1\n").unwrap();
        assert!(!active_low.sense().await.unwrap());
        assert!(active_high.sense().await.unwrap());
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn value_file_sensor_rejects_garbage() {
        let path = temp_file("garbage", b"maybe");
        let mut sensor = ValueFileSensor::new(&path, false);
        assert!(matches!(sensor.sense().await, Err(EdgecapError::Sense(_))));
        std::fs::remove_file(&path).ok();

        let mut missing = ValueFileSensor::new("/nonexistent/edgecap/value", false);
        assert!(missing.sense().await.is_err());
    }

    #[test]
    fn indicator_writes_levels() {
        let path = temp_file("led", b"");
        let mut led = ValueFileIndicator::new(&path);
        led.set(true);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1");
        led.set(false);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn frame_file_camera_reads_bytes() {
        let path = temp_file("frame", &[1, 2, 3, 4, 5, 6]);
        let mut cam = FrameFileCamera::new(&path, "(1, 2, 3)");
        let artifact = cam.capture().await.unwrap();
        assert_eq!(&artifact.data[..], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(artifact.shape, "(1, 2, 3)");

        std::fs::write(&path, b"").unwrap();
        assert!(matches!(cam.capture().await, Err(EdgecapError::Capture(_))));
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn synthetic_camera_frames_differ() {
        let mut cam = SyntheticCamera::new(4, 3, 3, "(3, 4, 3)");
        let a = cam.capture().await.unwrap();
        let b = cam.capture().await.unwrap();
        assert_eq!(a.data.len(), 4 * 3 * 3);
        assert_ne!(a.digest(), b.digest());
    }

    #[tokio::test]
    async fn default_polarity_triggers_on_low_level() {
        let path = temp_file("pir-default", b"0\n");
        let mut cfg = NodeConfig::default();
        cfg.sensor.kind = SensorKind::File;
        cfg.sensor.path = path.display().to_string();

        let mut sensor = build_sensor(&cfg).unwrap();
        assert!(sensor.sense().await.unwrap());
        std::fs::write(&path, "1\n").unwrap();
        assert!(!sensor.sense().await.unwrap());
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn static_sensors() {
        let mut cfg = NodeConfig::default();
        cfg.sensor.kind = SensorKind::Always;
        let mut s = build_sensor(&cfg).unwrap();
        assert!(s.sense().await.unwrap());

        cfg.sensor.kind = SensorKind::Never;
        let mut s = build_sensor(&cfg).unwrap();
        assert!(!s.sense().await.unwrap());
    }
}

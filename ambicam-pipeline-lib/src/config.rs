//! Pipeline configuration, persisted as JSON.
//!
//! [`ConfigStore`] is the only place the configuration is mutated at runtime.
//! Every mutation goes through [`ConfigStore::mutate`], which validates,
//! persists, and bumps the geometry generation when a field that affects
//! LED positions changed, so cached [`crate::geometry::LedIndexMap`]s are
//! rebuilt on next use.

use log::{debug, info, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Configurable log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub const fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
            Self::Trace => LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Screen-space rectangle in camera pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl Rect {
    #[must_use]
    pub const fn new(left: u32, right: u32, top: u32, bottom: u32) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }

    /// Pixel coordinate of the given edge (x for left/right, y for top/bottom).
    #[must_use]
    pub const fn edge(&self, side: Side) -> u32 {
        match side {
            Side::Top => self.top,
            Side::Bottom => self.bottom,
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    /// Swap inverted edges so that `left <= right` and `top <= bottom`.
    fn normalize(&mut self, name: &str) {
        if self.left > self.right {
            warn!("{name}: left {} > right {}, swapping", self.left, self.right);
            std::mem::swap(&mut self.left, &mut self.right);
        }
        if self.top > self.bottom {
            warn!("{name}: top {} > bottom {}, swapping", self.top, self.bottom);
            std::mem::swap(&mut self.top, &mut self.bottom);
        }
    }
}

/// Side of the display a run of LEDs is mounted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Top,
    Bottom,
    Left,
    Right,
}

impl Side {
    /// Whether LEDs on this side are spread along the X axis.
    #[must_use]
    pub const fn is_horizontal(self) -> bool {
        matches!(self, Self::Top | Self::Bottom)
    }
}

/// One run of LEDs along a side of the display.
///
/// `from` and `to` are fractions of the window span; `to < from` runs the
/// LEDs backwards, which is how a strip that wraps around the screen is
/// usually described.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedSegment {
    pub side: Side,
    pub from: f32,
    pub to: f32,
    #[serde(alias = "leds")]
    pub count: usize,
    /// Also sample this run in the check window for white balance
    #[serde(default)]
    pub check: bool,
}

/// Per-channel color weights, overall brightness and white-balance history size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorSettings {
    #[serde(default = "default_weight")]
    pub red: f32,
    #[serde(default = "default_weight")]
    pub green: f32,
    #[serde(default = "default_weight")]
    pub blue: f32,
    #[serde(default = "default_weight")]
    pub brightness: f32,
    /// Capacity of the white-balance rolling history
    #[serde(rename = "queueSize", default = "default_queue_size")]
    pub queue_size: usize,
}

const fn default_weight() -> f32 {
    1.0
}

const fn default_queue_size() -> usize {
    150
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            red: default_weight(),
            green: default_weight(),
            blue: default_weight(),
            brightness: default_weight(),
            queue_size: default_queue_size(),
        }
    }
}

/// Capture and output cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FpsSettings {
    /// Target capture rate in frames per second (0 = as fast as the source delivers)
    #[serde(default = "default_capture_fps")]
    pub capture: f32,
    /// Number of interpolated frames sent between two captured frames (0 = off)
    #[serde(default)]
    pub interpolation: u32,
}

const fn default_capture_fps() -> f32 {
    30.0
}

impl Default for FpsSettings {
    fn default() -> Self {
        Self {
            capture: default_capture_fps(),
            interpolation: 0,
        }
    }
}

/// Camera resolution requested from frame sources that can honor it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Whether white-balance correction or channel weighting is applied first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionOrder {
    #[default]
    WbFirst,
    WeightsFirst,
}

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Built-in animated test pattern at the configured resolution
    #[default]
    TestPattern,
    /// Binary PPM (P6) file, re-read on every capture tick
    Ppm { path: PathBuf },
}

/// Which LED controller to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerConfig {
    /// Log frames instead of sending them
    #[default]
    Dummy,
    /// Adalight binary frames over TCP (e.g. to a serial bridge)
    Bridge { host: String, port: u16 },
    /// Prismatik `setcolor:` line protocol over TCP
    Prismatik {
        host: String,
        port: u16,
        /// Send `lock` on connect and `unlock`/`exit` on disconnect
        #[serde(default = "default_handshake")]
        handshake: bool,
    },
}

const fn default_handshake() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_window")]
    pub window: Rect,
    #[serde(rename = "checkWindow", default = "default_check_window")]
    pub check_window: Rect,
    #[serde(default = "default_leds")]
    pub leds: Vec<LedSegment>,
    /// Gaussian blur kernel size in pixels (0 = disabled, even sizes are rounded up)
    #[serde(default)]
    pub blur: u32,
    /// Temporal smoothing factor in [0, 1] (0 = off)
    #[serde(default)]
    pub smoothing: f32,
    #[serde(default)]
    pub colors: ColorSettings,
    #[serde(default)]
    pub fps: FpsSettings,
    #[serde(default)]
    pub auto_wb: bool,
    #[serde(default)]
    pub correction_order: CorrectionOrder,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log_level: LogLevel,
}

const fn default_window() -> Rect {
    Rect::new(40, 600, 40, 440)
}

const fn default_check_window() -> Rect {
    Rect::new(80, 560, 80, 400)
}

fn default_leds() -> Vec<LedSegment> {
    // Clockwise from the bottom-left corner
    vec![
        LedSegment {
            side: Side::Left,
            from: 1.0,
            to: 0.0,
            count: 16,
            check: false,
        },
        LedSegment {
            side: Side::Top,
            from: 0.0,
            to: 1.0,
            count: 28,
            check: false,
        },
        LedSegment {
            side: Side::Right,
            from: 0.0,
            to: 1.0,
            count: 16,
            check: false,
        },
        LedSegment {
            side: Side::Bottom,
            from: 1.0,
            to: 0.0,
            count: 28,
            check: false,
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: default_window(),
            check_window: default_check_window(),
            leds: default_leds(),
            blur: 0,
            smoothing: 0.0,
            colors: ColorSettings::default(),
            fps: FpsSettings::default(),
            auto_wb: false,
            correction_order: CorrectionOrder::default(),
            resolution: Resolution::default(),
            source: SourceConfig::default(),
            server: ServerConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    /// Total number of LEDs across all segments.
    #[must_use]
    pub fn led_count(&self) -> usize {
        self.leds.iter().map(|s| s.count).sum()
    }

    /// Clamp values to valid ranges and fix invalid values
    pub fn validate(&mut self) {
        self.window.normalize("window");
        self.check_window.normalize("checkWindow");

        for (i, segment) in self.leds.iter_mut().enumerate() {
            let (from, to) = (segment.from.clamp(0.0, 1.0), segment.to.clamp(0.0, 1.0));
            if (from, to) != (segment.from, segment.to) {
                warn!(
                    "LED segment {i}: clamping from/to {}/{} to {from}/{to}",
                    segment.from, segment.to
                );
                segment.from = from;
                segment.to = to;
            }
        }

        if self.blur > 0 && self.blur % 2 == 0 {
            warn!("Blur kernel size {} is even, using {}", self.blur, self.blur + 1);
            self.blur += 1;
        }

        if !(0.0..=1.0).contains(&self.smoothing) {
            let clamped = if self.smoothing.is_nan() {
                0.0
            } else {
                self.smoothing.clamp(0.0, 1.0)
            };
            warn!("Clamping smoothing from {} to {clamped}", self.smoothing);
            self.smoothing = clamped;
        }

        for (name, value) in [
            ("red", &mut self.colors.red),
            ("green", &mut self.colors.green),
            ("blue", &mut self.colors.blue),
            ("brightness", &mut self.colors.brightness),
        ] {
            if !(*value >= 0.0) {
                warn!("Color setting {name} is {value}, resetting to 0");
                *value = 0.0;
            }
        }

        if self.colors.queue_size == 0 {
            warn!("queueSize is 0, resetting to {}", default_queue_size());
            self.colors.queue_size = default_queue_size();
        }

        if !(self.fps.capture >= 0.0) {
            warn!("Capture fps {} is invalid, disabling capture pacing", self.fps.capture);
            self.fps.capture = 0.0;
        }
    }
}

/// Partial configuration update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<Rect>,
    #[serde(
        rename = "checkWindow",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub check_window: Option<Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leds: Option<Vec<LedSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<ColorSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<FpsSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_wb: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction_order: Option<CorrectionOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
}

impl ConfigPatch {
    /// Whether applying this patch can move LED sample positions.
    #[must_use]
    pub fn touches_geometry(&self) -> bool {
        self.window.is_some() || self.check_window.is_some() || self.leds.is_some()
    }

    /// Apply to `config`. Returns `true` if a geometry-affecting field changed.
    pub fn apply(self, config: &mut Config) -> bool {
        let before = self
            .touches_geometry()
            .then(|| (config.window, config.check_window, config.leds.clone()));

        if let Some(v) = self.window {
            config.window = v;
        }
        if let Some(v) = self.check_window {
            config.check_window = v;
        }
        if let Some(v) = self.leds {
            config.leds = v;
        }
        if let Some(v) = self.blur {
            config.blur = v;
        }
        if let Some(v) = self.smoothing {
            config.smoothing = v;
        }
        if let Some(v) = self.colors {
            config.colors = v;
        }
        if let Some(v) = self.fps {
            config.fps = v;
        }
        if let Some(v) = self.auto_wb {
            config.auto_wb = v;
        }
        if let Some(v) = self.correction_order {
            config.correction_order = v;
        }
        if let Some(v) = self.resolution {
            config.resolution = v;
        }
        if let Some(v) = self.source {
            config.source = v;
        }
        if let Some(v) = self.server {
            config.server = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }

        config.validate();
        before.is_some_and(|(window, check_window, leds)| {
            window != config.window || check_window != config.check_window || leds != config.leds
        })
    }
}

/// Errors from loading or saving the configuration file.
#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum ConfigError {
    #[display("config file I/O error: {_0}")]
    Io(std::io::Error),
    #[display("invalid config JSON: {_0}")]
    Json(serde_json::Error),
}

/// Shared, mutable configuration with last-write-wins persistence.
pub struct ConfigStore {
    path: Option<PathBuf>,
    config: Mutex<Config>,
    geometry_generation: AtomicU64,
}

impl ConfigStore {
    /// Create an in-memory store. With `path = None` nothing is persisted.
    #[must_use]
    pub fn new(mut config: Config, path: Option<PathBuf>) -> Self {
        config.validate();
        Self {
            path,
            config: Mutex::new(config),
            geometry_generation: AtomicU64::new(0),
        }
    }

    /// Load from `path`, falling back to defaults if the file is missing or invalid.
    ///
    /// Later mutations are saved back to `path` either way.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match Self::load(&path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {e}, using defaults",
                    path.display()
                );
                Config::default()
            }
        };
        Self::new(config, Some(path))
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        debug!("Loading config from {}", path.display());
        let bytes = std::fs::read(path)?;
        let mut config: Config = serde_json::from_slice(&bytes)?;
        config.validate();
        debug!(
            "Config parsed: {} LEDs in {} segments, server={:?}",
            config.led_count(),
            config.leds.len(),
            config.server
        );
        Ok(config)
    }

    /// Copy of the current configuration.
    #[must_use]
    pub fn snapshot(&self) -> Config {
        self.config.lock().unwrap().clone()
    }

    /// Read a value from the current configuration without cloning all of it.
    pub fn read<R>(&self, f: impl FnOnce(&Config) -> R) -> R {
        f(&self.config.lock().unwrap())
    }

    /// Incremented whenever window, check window or LED layout changes.
    #[must_use]
    pub fn geometry_generation(&self) -> u64 {
        self.geometry_generation.load(Ordering::Acquire)
    }

    /// Apply a partial update and persist it immediately.
    ///
    /// The in-memory configuration is updated even if saving fails.
    pub fn mutate(&self, patch: ConfigPatch) -> Result<(), ConfigError> {
        let mut cfg = self.config.lock().unwrap();
        if patch.apply(&mut cfg) {
            let generation = self.geometry_generation.fetch_add(1, Ordering::AcqRel) + 1;
            debug!("Geometry changed, generation {generation}");
        }
        self.save_locked(&cfg)
    }

    fn save_locked(&self, cfg: &Config) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(cfg)?;
        debug!("Config JSON size: {} bytes", json.len());
        std::fs::write(path, json)?;
        info!("Config saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_persisted_shape() {
        let json = r#"{
            "window": {"left": 10, "right": 630, "top": 20, "bottom": 460},
            "checkWindow": {"left": 50, "right": 590, "top": 60, "bottom": 420},
            "leds": [
                {"side": "top", "from": 0.0, "to": 1.0, "count": 30, "check": true},
                {"side": "right", "from": 0.0, "to": 1.0, "leds": 20}
            ],
            "blur": 5,
            "smoothing": 0.5,
            "colors": {"red": 1.0, "green": 0.8, "blue": 0.9, "brightness": 0.7, "queueSize": 40},
            "fps": {"capture": 15, "interpolation": 4},
            "auto_wb": true,
            "server": {"type": "bridge", "host": "10.0.0.2", "port": 5000}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.window, Rect::new(10, 630, 20, 460));
        assert_eq!(config.led_count(), 50);
        assert!(config.leds[0].check);
        assert!(!config.leds[1].check);
        assert_eq!(config.colors.queue_size, 40);
        assert_eq!(config.fps.interpolation, 4);
        assert!(config.auto_wb);
        assert_eq!(
            config.server,
            ServerConfig::Bridge {
                host: "10.0.0.2".to_string(),
                port: 5000
            }
        );
        assert_eq!(config.source, SourceConfig::TestPattern);
        assert_eq!(config.correction_order, CorrectionOrder::WbFirst);
    }

    #[test]
    fn test_prismatik_handshake_defaults_on() {
        let server: ServerConfig =
            serde_json::from_str(r#"{"type": "prismatik", "host": "localhost", "port": 3636}"#)
                .unwrap();
        assert_eq!(
            server,
            ServerConfig::Prismatik {
                host: "localhost".to_string(),
                port: 3636,
                handshake: true
            }
        );
    }

    #[test]
    fn test_validate_clamps() {
        let mut config = Config {
            window: Rect::new(600, 40, 440, 40),
            blur: 4,
            smoothing: 1.5,
            ..Config::default()
        };
        config.colors.brightness = -1.0;
        config.colors.queue_size = 0;
        config.leds[0].from = 2.0;
        config.validate();

        assert_eq!(config.window, Rect::new(40, 600, 40, 440));
        assert_eq!(config.blur, 5);
        assert!((config.smoothing - 1.0).abs() < f32::EPSILON);
        assert!(config.colors.brightness.abs() < f32::EPSILON);
        assert_eq!(config.colors.queue_size, 150);
        assert!((config.leds[0].from - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_patch_geometry_generation() {
        let store = ConfigStore::new(Config::default(), None);
        assert_eq!(store.geometry_generation(), 0);

        store
            .mutate(ConfigPatch {
                smoothing: Some(0.3),
                ..ConfigPatch::default()
            })
            .unwrap();
        assert_eq!(store.geometry_generation(), 0);
        assert!((store.read(|c| c.smoothing) - 0.3).abs() < f32::EPSILON);

        store
            .mutate(ConfigPatch {
                window: Some(Rect::new(0, 100, 0, 100)),
                ..ConfigPatch::default()
            })
            .unwrap();
        assert_eq!(store.geometry_generation(), 1);

        // Same value again is not a geometry change
        store
            .mutate(ConfigPatch {
                window: Some(Rect::new(0, 100, 0, 100)),
                ..ConfigPatch::default()
            })
            .unwrap();
        assert_eq!(store.geometry_generation(), 1);
    }

    #[test]
    fn test_patch_from_json() {
        let patch: ConfigPatch =
            serde_json::from_str(r#"{"checkWindow": {"left": 1, "right": 2, "top": 3, "bottom": 4}}"#)
                .unwrap();
        assert!(patch.touches_geometry());
        let patch: ConfigPatch = serde_json::from_str(r#"{"blur": 3}"#).unwrap();
        assert!(!patch.touches_geometry());
    }

    #[test]
    fn test_apply_reports_layout_change() {
        let mut config = Config::default();
        let colors_only: ConfigPatch = serde_json::from_str(r#"{"colors": {"red": 0.5}}"#).unwrap();
        assert!(!colors_only.apply(&mut config));
        assert!((config.colors.red - 0.5).abs() < f32::EPSILON);

        let mut leds = config.leds.clone();
        leds[0].check = !leds[0].check;
        let relayout = ConfigPatch {
            leds: Some(leds),
            ..ConfigPatch::default()
        };
        assert!(relayout.clone().apply(&mut config));
        assert!(!relayout.apply(&mut config));
    }

    #[test]
    fn test_mutate_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load_or_default(&path);
        assert_eq!(store.snapshot(), Config::default());

        store
            .mutate(ConfigPatch {
                blur: Some(7),
                auto_wb: Some(true),
                ..ConfigPatch::default()
            })
            .unwrap();

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.blur, 7);
        assert!(reloaded.auto_wb);
        assert_eq!(reloaded, store.snapshot());
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(ConfigStore::load(&path), Err(ConfigError::Json(_))));
        // Falls back to defaults
        assert_eq!(ConfigStore::load_or_default(&path).snapshot(), Config::default());
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Warn.as_level_filter(), LevelFilter::Warn);
    }
}

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::policy::ClassLabelPolicy;

const DEFAULT_STORE_PATH: &str = "violations.csv";
const DEFAULT_CAMERA_DEVICE: &str = "stub://camera0";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_MODEL_PATH: &str = "weights/best.onnx";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_FRAME_DELAY_MS: u64 = 30;
const DEFAULT_API_ADDR: &str = "127.0.0.1:8800";

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    store: Option<StoreConfigFile>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    #[serde(rename = "loop")]
    frame_loop: Option<LoopConfigFile>,
    policy: Option<BTreeMap<String, String>>,
    policy_path: Option<PathBuf>,
    dedup: Option<DedupConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    path: Option<PathBuf>,
    backend: Option<String>,
    sync: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    script: Option<Vec<Vec<u32>>>,
}

#[derive(Debug, Deserialize, Default)]
struct LoopConfigFile {
    frame_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DedupConfigFile {
    window_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub store: StoreSettings,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    /// Pause at the end of every loop iteration.
    pub frame_delay: Duration,
    pub policy: ClassLabelPolicy,
    /// Suppress repeats of a label inside this window. `None` logs every
    /// qualifying frame.
    pub dedup_window: Option<Duration>,
    pub api_addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Csv,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(StoreBackend::Csv),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(anyhow!("unknown store backend '{}' (csv|sqlite)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub path: PathBuf,
    pub backend: StoreBackend,
    pub sync: bool,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Stub,
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(DetectorKind::Stub),
            "tract" => Ok(DetectorKind::Tract),
            other => Err(anyhow!("unknown detector backend '{}' (stub|tract)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    /// Per-frame class ids replayed by the stub detector.
    pub script: Vec<Vec<u32>>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            store: StoreSettings {
                path: PathBuf::from(DEFAULT_STORE_PATH),
                backend: StoreBackend::Csv,
                sync: false,
            },
            camera: CameraSettings {
                device: DEFAULT_CAMERA_DEVICE.to_string(),
                width: DEFAULT_CAMERA_WIDTH,
                height: DEFAULT_CAMERA_HEIGHT,
                target_fps: DEFAULT_CAMERA_FPS,
            },
            detector: DetectorSettings {
                backend: DetectorKind::Stub,
                model_path: PathBuf::from(DEFAULT_MODEL_PATH),
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                script: Vec::new(),
            },
            frame_delay: Duration::from_millis(DEFAULT_FRAME_DELAY_MS),
            policy: ClassLabelPolicy::default(),
            dedup_window: None,
            api_addr: DEFAULT_API_ADDR.to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load from the file named by `PPEYE_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PPEYE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => MonitorConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let store = file.store.unwrap_or_default();
        let store = StoreSettings {
            path: store.path.unwrap_or(defaults.store.path),
            backend: match store.backend {
                Some(raw) => raw.parse()?,
                None => defaults.store.backend,
            },
            sync: store.sync.unwrap_or(defaults.store.sync),
        };

        let camera = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            device: camera.device.unwrap_or(defaults.camera.device),
            width: camera.width.unwrap_or(defaults.camera.width),
            height: camera.height.unwrap_or(defaults.camera.height),
            target_fps: camera.target_fps.unwrap_or(defaults.camera.target_fps),
        };

        let detector = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: match detector.backend {
                Some(raw) => raw.parse()?,
                None => defaults.detector.backend,
            },
            model_path: detector.model_path.unwrap_or(defaults.detector.model_path),
            confidence_threshold: detector
                .confidence_threshold
                .unwrap_or(defaults.detector.confidence_threshold),
            script: detector.script.unwrap_or_default(),
        };

        let frame_delay = file
            .frame_loop
            .and_then(|frame_loop| frame_loop.frame_delay_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.frame_delay);

        let policy = match (file.policy, file.policy_path) {
            (Some(_), Some(_)) => {
                return Err(anyhow!("set either policy or policy_path, not both"));
            }
            (Some(table), None) => ClassLabelPolicy::from_string_keys(&table)?,
            (None, Some(path)) => ClassLabelPolicy::load(&path)?,
            (None, None) => defaults.policy,
        };

        let dedup_window = file
            .dedup
            .and_then(|dedup| dedup.window_secs)
            .map(Duration::from_secs);

        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or(defaults.api_addr);

        Ok(Self {
            store,
            camera,
            detector,
            frame_delay,
            policy,
            dedup_window,
            api_addr,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("PPEYE_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(backend) = non_empty_env("PPEYE_STORE_BACKEND") {
            self.store.backend = backend.parse()?;
        }
        if let Some(device) = non_empty_env("PPEYE_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(path) = non_empty_env("PPEYE_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(backend) = non_empty_env("PPEYE_DETECTOR_BACKEND") {
            self.detector.backend = backend.parse()?;
        }
        if let Some(delay) = non_empty_env("PPEYE_FRAME_DELAY_MS") {
            let ms: u64 = delay
                .parse()
                .map_err(|_| anyhow!("PPEYE_FRAME_DELAY_MS must be an integer number of ms"))?;
            self.frame_delay = Duration::from_millis(ms);
        }
        if let Some(window) = non_empty_env("PPEYE_DEDUP_WINDOW_SECS") {
            let seconds: u64 = window.parse().map_err(|_| {
                anyhow!("PPEYE_DEDUP_WINDOW_SECS must be an integer number of seconds")
            })?;
            self.dedup_window = Some(Duration::from_secs(seconds));
        }
        if let Some(addr) = non_empty_env("PPEYE_API_ADDR") {
            self.api_addr = addr;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.store.path.as_os_str().is_empty() {
            return Err(anyhow!("store path must not be empty"));
        }
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be non-zero"));
        }
        let threshold = self.detector.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence threshold {} outside 0..=1",
                threshold
            ));
        }
        if self.dedup_window.is_some_and(|window| window.is_zero()) {
            return Err(anyhow!("dedup window must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

use anyhow::{ensure, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::dispatch::{DispatchSettings, MachineSpec};
use crate::machines::Vendor;
use crate::workflow::Method;

/// Main configuration structure for fabflow
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FabflowConfig {
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Dispatch loop and machine I/O settings
    pub dispatch: DispatchConfig,
    /// Artifact download settings
    pub artifacts: ArtifactConfig,
    /// Machines known to the dispatcher
    pub fleet: Vec<MachineConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or `EnvFilter` directive, overridden by `RUST_LOG`
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Per-machine status poll timeout
    pub poll_timeout_ms: u64,
    /// Timeout for uploads, starts and other machine commands
    pub io_timeout_seconds: u64,
    /// Pause between scheduled dispatch passes
    pub interval_seconds: u64,
    /// Methods that get a dispatch loop
    pub methods: Vec<Method>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ArtifactConfig {
    /// Bound on one HTTP artifact download
    pub fetch_timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
    pub cache_capacity: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MachineConfig {
    pub id: String,
    pub name: String,
    pub method: Method,
    pub vendor: Vendor,
    /// Work envelope in mm (x, y, z)
    pub build_volume_mm: Option<[f64; 3]>,
}

impl MachineConfig {
    fn new(id: &str, name: &str, method: Method, vendor: Vendor, volume: [f64; 3]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            method,
            vendor,
            build_volume_mm: Some(volume),
        }
    }

    pub fn to_spec(&self) -> MachineSpec {
        let spec = MachineSpec::new(self.id.clone(), self.method, self.vendor).with_name(&self.name);
        match self.build_volume_mm {
            Some(volume) => spec.with_build_volume(volume),
            None => spec,
        }
    }
}

impl Default for FabflowConfig {
    fn default() -> Self {
        Self {
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
            },
            dispatch: DispatchConfig {
                poll_timeout_ms: 5000,
                io_timeout_seconds: 120,
                interval_seconds: 30,
                methods: Method::ALL.to_vec(),
            },
            artifacts: ArtifactConfig {
                fetch_timeout_seconds: 60,
                cache_ttl_seconds: 600,
                cache_capacity: 64,
            },
            fleet: vec![
                MachineConfig::new(
                    "p1s-1",
                    "Bambu P1S #1",
                    Method::Fdm,
                    Vendor::Bambu,
                    [256.0, 256.0, 256.0],
                ),
                MachineConfig::new(
                    "p1s-2",
                    "Bambu P1S #2",
                    Method::Fdm,
                    Vendor::Bambu,
                    [256.0, 256.0, 256.0],
                ),
                MachineConfig::new(
                    "sls-1",
                    "SLS station",
                    Method::Sls,
                    Vendor::Generic,
                    [350.0, 350.0, 600.0],
                ),
                MachineConfig::new(
                    "cfc-1",
                    "Continuous fiber station",
                    Method::Cfc,
                    Vendor::Generic,
                    [320.0, 132.0, 154.0],
                ),
                MachineConfig::new(
                    "cnc-1",
                    "CNC mill",
                    Method::Cnc,
                    Vendor::Generic,
                    [400.0, 300.0, 200.0],
                ),
            ],
        }
    }
}

impl FabflowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (fabflow.toml, .fabflow-rc)
    /// 3. Environment variables (prefixed with FABFLOW_, nested keys split on `__`)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if Path::new("fabflow.toml").exists() {
            builder = builder.add_source(File::with_name("fabflow"));
        }

        if Path::new(".fabflow-rc").exists() {
            builder = builder.add_source(File::new(".fabflow-rc", config::FileFormat::Toml));
        }

        builder = builder.add_source(env_source());
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with one explicit TOML file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path.as_ref()).format(config::FileFormat::Toml))
            .add_source(env_source())
            .build()?;
        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject durations the dispatch loops and I/O timeouts cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("dispatch.poll_timeout_ms", self.dispatch.poll_timeout_ms),
            ("dispatch.io_timeout_seconds", self.dispatch.io_timeout_seconds),
            ("dispatch.interval_seconds", self.dispatch.interval_seconds),
            ("artifacts.fetch_timeout_seconds", self.artifacts.fetch_timeout_seconds),
        ] {
            ensure!(value > 0, "{key} must be greater than zero");
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            poll_timeout: Duration::from_millis(self.dispatch.poll_timeout_ms),
            io_timeout: Duration::from_secs(self.dispatch.io_timeout_seconds),
        }
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch.interval_seconds)
    }

    pub fn artifact_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.artifacts.fetch_timeout_seconds)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("FABFLOW")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<FabflowConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = FabflowConfig::load_env_file();
        FabflowConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static FabflowConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

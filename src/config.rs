// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MIN_DEPTH: u8 = 1;
pub const MAX_DEPTH: u8 = 5;
pub const DEFAULT_DEPTH: u8 = 3;

pub const DEFAULT_PORTS: [u16; 4] = [80, 443, 8080, 8443];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuzzEngine {
    /// Block-structured requests, one stateful walk per verb.
    Structured,
    /// Independent randomized requests, budget scales with depth.
    Property,
}

impl FuzzEngine {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "structured" | "boofuzz" | "block" | "1" => Some(Self::Structured),
            "property" | "hypothesis" | "random" | "2" => Some(Self::Property),
            _ => None,
        }
    }

    pub fn log_file_name(&self) -> &'static str {
        match self {
            Self::Structured => "fuzz.log",
            Self::Property => "fuzz2.log",
        }
    }
}

impl std::fmt::Display for FuzzEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structured => write!(f, "structured"),
            Self::Property => write!(f, "property"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStrategy {
    None,
    Generative,
    Resample,
}

impl GenerationStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "none" | "raw" | "1" => Some(Self::None),
            "generative" | "kde" | "2" => Some(Self::Generative),
            "resample" | "3" => Some(Self::Resample),
            _ => None,
        }
    }
}

impl std::fmt::Display for GenerationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Generative => write!(f, "generative"),
            Self::Resample => write!(f, "resample"),
        }
    }
}

/// Status thresholds that decide whether a response counts as an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyPolicy {
    pub server_error_floor: u16,
    pub informational_floor: u16,
}

impl Default for AnomalyPolicy {
    fn default() -> Self {
        Self {
            server_error_floor: 500,
            informational_floor: 100,
        }
    }
}

impl AnomalyPolicy {
    pub fn is_anomalous(&self, status: u16) -> bool {
        status >= self.server_error_floor || status < self.informational_floor
    }

    pub fn is_suspicious(&self, status: u16) -> bool {
        status >= self.server_error_floor
    }
}

#[derive(Debug, Clone)]
pub struct FuzzConfig {
    max_depth: u8,
    engine: Option<FuzzEngine>,
    generation: GenerationStrategy,
    num_examples: usize,
    num_cases: usize,
    trial_timeout: Duration,
    replay_timeout: Duration,
    connect_timeout: Duration,
    ports: Vec<u16>,
    output_dir: PathBuf,
    generated_dir: PathBuf,
    cve_database: PathBuf,
    rate_limit: u32,
    seed: Option<u64>,
    trial_pause: Duration,
    anomaly_policy: AnomalyPolicy,
    quiet: bool,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FuzzConfig {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_DEPTH,
            engine: Some(FuzzEngine::Structured),
            generation: GenerationStrategy::None,
            num_examples: 50,
            num_cases: 10,
            trial_timeout: Duration::from_secs(2),
            replay_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(1),
            ports: DEFAULT_PORTS.to_vec(),
            output_dir: PathBuf::from("fuzz_output"),
            generated_dir: PathBuf::from("generated_output"),
            cve_database: PathBuf::from("data/cve_database.json"),
            rate_limit: 20,
            seed: None,
            trial_pause: Duration::from_millis(200),
            anomaly_policy: AnomalyPolicy::default(),
            quiet: false,
        }
    }

    /// Out-of-range depths fall back to the default instead of failing.
    pub fn set_max_depth(&mut self, depth: u8) {
        if (MIN_DEPTH..=MAX_DEPTH).contains(&depth) {
            self.max_depth = depth;
        } else {
            warn!(
                "Invalid max depth {} (expected {}-{}). Using default depth of {}.",
                depth, MIN_DEPTH, MAX_DEPTH, DEFAULT_DEPTH
            );
            self.max_depth = DEFAULT_DEPTH;
        }
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    /// An unknown engine name disables the fuzz stage for the run.
    pub fn set_engine_name(&mut self, name: &str) {
        self.engine = FuzzEngine::from_name(name);
        if self.engine.is_none() {
            warn!("Invalid fuzzing engine selection '{}'. Fuzzing will be skipped.", name);
        }
    }

    pub fn set_engine(&mut self, engine: FuzzEngine) {
        self.engine = Some(engine);
    }

    pub fn engine(&self) -> Option<FuzzEngine> {
        self.engine
    }

    pub fn set_generation_name(&mut self, name: &str) {
        self.generation = match GenerationStrategy::from_name(name) {
            Some(strategy) => strategy,
            None => {
                warn!(
                    "Invalid generation strategy '{}'. Using raw fuzzing results only.",
                    name
                );
                GenerationStrategy::None
            }
        };
    }

    pub fn set_generation(&mut self, generation: GenerationStrategy) {
        self.generation = generation;
    }

    pub fn generation(&self) -> GenerationStrategy {
        self.generation
    }

    pub fn set_num_examples(&mut self, num_examples: usize) {
        self.num_examples = num_examples;
    }

    pub fn num_examples(&self) -> usize {
        self.num_examples
    }

    pub fn set_num_cases(&mut self, num_cases: usize) {
        self.num_cases = num_cases;
    }

    pub fn num_cases(&self) -> usize {
        self.num_cases
    }

    pub fn set_trial_timeout(&mut self, timeout: Duration) {
        self.trial_timeout = timeout;
    }

    pub fn trial_timeout(&self) -> Duration {
        self.trial_timeout
    }

    pub fn set_replay_timeout(&mut self, timeout: Duration) {
        self.replay_timeout = timeout;
    }

    pub fn replay_timeout(&self) -> Duration {
        self.replay_timeout
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn set_ports(&mut self, ports: Vec<u16>) {
        self.ports = ports;
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn set_output_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.output_dir = dir.as_ref().to_path_buf();
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn set_generated_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.generated_dir = dir.as_ref().to_path_buf();
    }

    pub fn generated_dir(&self) -> &Path {
        &self.generated_dir
    }

    pub fn set_cve_database<P: AsRef<Path>>(&mut self, path: P) {
        self.cve_database = path.as_ref().to_path_buf();
    }

    pub fn cve_database(&self) -> &Path {
        &self.cve_database
    }

    pub fn set_rate_limit(&mut self, rate_limit: u32) {
        self.rate_limit = rate_limit.max(1);
    }

    pub fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    pub fn set_seed(&mut self, seed: Option<u64>) {
        self.seed = seed;
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn set_trial_pause(&mut self, pause: Duration) {
        self.trial_pause = pause;
    }

    pub fn trial_pause(&self) -> Duration {
        self.trial_pause
    }

    pub fn set_anomaly_policy(&mut self, policy: AnomalyPolicy) {
        self.anomaly_policy = policy;
    }

    pub fn anomaly_policy(&self) -> AnomalyPolicy {
        self.anomaly_policy
    }

    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    pub fn quiet(&self) -> bool {
        self.quiet
    }
}

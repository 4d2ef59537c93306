// File: cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::config::{FuzzConfig, DEFAULT_DEPTH};
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    /// Target host or IP address
    pub target: String,

    #[arg(
        short = 'p',
        long = "ports",
        value_delimiter = ',',
        default_values_t = [80u16, 443, 8080, 8443]
    )]
    pub ports: Vec<u16>,

    #[arg(
        short = 'e',
        long = "engine",
        default_value = "structured",
        help = "Fuzzing engine: structured/boofuzz (block-based walk) or property/hypothesis (randomized)"
    )]
    pub engine: String,

    #[arg(
        short = 'g',
        long = "generation",
        default_value = "none",
        help = "Payload synthesis: none, generative or resample"
    )]
    pub generation: String,

    #[arg(short = 'd', long = "max-depth", default_value_t = DEFAULT_DEPTH)]
    pub max_depth: u8,

    #[arg(
        long = "num-examples",
        default_value_t = 50,
        help = "Property engine trials per depth level"
    )]
    pub num_examples: usize,

    #[arg(long = "num-cases", default_value_t = 10, help = "Synthesized cases to replay")]
    pub num_cases: usize,

    #[arg(
        short = 't',
        long = "timeout",
        default_value_t = 2,
        help = "Per-trial timeout in seconds"
    )]
    pub timeout: u64,

    #[arg(short = 'o', long = "output-dir", default_value = "fuzz_output")]
    pub output_dir: PathBuf,

    #[arg(long = "generated-dir", default_value = "generated_output")]
    pub generated_dir: PathBuf,

    #[arg(long = "cve-db", default_value = "data/cve_database.json")]
    pub cve_db: PathBuf,

    #[arg(long = "seed")]
    pub seed: Option<u64>,

    #[arg(short = 'r', long = "rate-limit", default_value_t = 20)]
    pub rate_limit: u32,

    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    #[arg(
        short = 'v',
        long = "verbose",
        help = "Enable verbose output",
        conflicts_with = "quiet"
    )]
    pub verbose: bool,

    #[arg(short = 'q', long = "quiet", help = "Reduce output verbosity")]
    pub quiet: bool,

    #[arg(
        short = 's',
        long = "suppress-stats",
        help = "Suppress run summary and statistics"
    )]
    pub suppress_stats: bool,

    #[arg(long = "i-have-authorization")]
    pub skip_authorization_check: bool,
}

impl Cli {
    pub fn level_filter(&self) -> LevelFilter {
        if self.verbose {
            return LevelFilter::Debug;
        }
        if self.quiet {
            return LevelFilter::Warn;
        }
        match self.log_level.to_lowercase().as_str() {
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            "off" => LevelFilter::Off,
            _ => LevelFilter::Info,
        }
    }

    /// Validation warnings are emitted by the setters, so the logger should
    /// be live before this is called.
    pub fn to_config(&self) -> FuzzConfig {
        let mut config = FuzzConfig::new();
        config.set_ports(self.ports.clone());
        config.set_engine_name(&self.engine);
        config.set_generation_name(&self.generation);
        config.set_max_depth(self.max_depth);
        config.set_num_examples(self.num_examples);
        config.set_num_cases(self.num_cases);
        config.set_trial_timeout(Duration::from_secs(self.timeout.max(1)));
        config.set_output_dir(&self.output_dir);
        config.set_generated_dir(&self.generated_dir);
        config.set_cve_database(&self.cve_db);
        config.set_seed(self.seed);
        config.set_rate_limit(self.rate_limit);
        config.set_quiet(self.quiet);
        config
    }
}

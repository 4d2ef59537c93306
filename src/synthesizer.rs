// File: synthesizer.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Synthesis of new candidate payloads from the byte-length distribution of
//! anomalous fuzz sessions.

use crate::config::GenerationStrategy;
use crate::error::FuzzResult;
use crate::transcript::{escape_bytes, format_timestamp, TranscriptLog};
use chrono::Local;
use log::{info, warn};
use rand::distributions::Alphanumeric;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const FALLBACK_MIN_LENGTH: usize = 5;
pub const FALLBACK_MAX_LENGTH: usize = 100;
pub const RESAMPLE_JITTER: i64 = 2;
pub const SYNTH_HOST: &str = "fuzzed.target.local";
pub const SYNTH_USER_AGENT: &str = "rfuzzprobe-synth";

const GENERATIVE_FALLBACK: [usize; 5] = [10, 20, 30, 40, 50];

/// Scalar generative contract shared by every synthesis model.
pub trait LengthModel: Send {
    fn train(&mut self, data: &[usize]);
    fn sample(&mut self, n: usize) -> Vec<usize>;
}

fn rng_from(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    }
}

/// Draws observed lengths back out with a small uniform jitter.
pub struct ResampleModel {
    lengths: Vec<usize>,
    rng: SmallRng,
}

impl ResampleModel {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            lengths: Vec::new(),
            rng: rng_from(seed),
        }
    }
}

impl LengthModel for ResampleModel {
    fn train(&mut self, data: &[usize]) {
        self.lengths = data.to_vec();
        info!("Learned {} fuzz case length(s).", self.lengths.len());
    }

    fn sample(&mut self, n: usize) -> Vec<usize> {
        if self.lengths.is_empty() {
            warn!("No training data found. Falling back to random lengths.");
            return (0..n)
                .map(|_| self.rng.gen_range(FALLBACK_MIN_LENGTH..=FALLBACK_MAX_LENGTH))
                .collect();
        }

        (0..n)
            .map(|_| {
                let base = *self.lengths.choose(&mut self.rng).unwrap_or(&1) as i64;
                let jitter = self.rng.gen_range(-RESAMPLE_JITTER..=RESAMPLE_JITTER);
                (base + jitter).max(1) as usize
            })
            .collect()
    }
}

/// Gaussian kernel density estimate over the observed lengths.
pub struct KernelDensityModel {
    points: Vec<f64>,
    bandwidth: f64,
    rng: SmallRng,
}

impl KernelDensityModel {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            points: Vec::new(),
            bandwidth: 1.0,
            rng: rng_from(seed),
        }
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Silverman's rule of thumb, floored at one byte.
    fn silverman_bandwidth(points: &[f64]) -> f64 {
        let n = points.len() as f64;
        if n < 2.0 {
            return 1.0;
        }
        let mean = points.iter().sum::<f64>() / n;
        let variance = points.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1.0);
        (1.06 * variance.sqrt() * n.powf(-0.2)).max(1.0)
    }
}

impl LengthModel for KernelDensityModel {
    fn train(&mut self, data: &[usize]) {
        let data = if data.is_empty() {
            warn!("No training data provided. Using fallback data.");
            &GENERATIVE_FALLBACK[..]
        } else {
            data
        };
        self.points = data.iter().map(|&d| d as f64).collect();
        self.bandwidth = Self::silverman_bandwidth(&self.points);
        info!(
            "Trained density model on {} point(s), bandwidth {:.2}",
            self.points.len(),
            self.bandwidth
        );
    }

    fn sample(&mut self, n: usize) -> Vec<usize> {
        if self.points.is_empty() {
            self.train(&[]);
        }
        let kernel = match Normal::new(0.0, self.bandwidth) {
            Ok(kernel) => kernel,
            Err(e) => {
                warn!("Invalid kernel bandwidth {}: {}", self.bandwidth, e);
                return vec![1; n];
            }
        };

        (0..n)
            .map(|_| {
                let centre = self.points[self.rng.gen_range(0..self.points.len())];
                let value = centre + kernel.sample(&mut self.rng);
                value.round().max(1.0) as usize
            })
            .collect()
    }
}

/// The two interchangeable synthesis strategies.
pub enum SynthesisModel {
    Resample(ResampleModel),
    Generative(KernelDensityModel),
}

impl SynthesisModel {
    /// `None` when the configuration asks for raw fuzzing only.
    pub fn for_strategy(strategy: GenerationStrategy, seed: Option<u64>) -> Option<Self> {
        match strategy {
            GenerationStrategy::None => None,
            GenerationStrategy::Resample => Some(Self::Resample(ResampleModel::new(seed))),
            GenerationStrategy::Generative => {
                Some(Self::Generative(KernelDensityModel::new(seed)))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Resample(_) => "resample",
            Self::Generative(_) => "generative",
        }
    }
}

impl LengthModel for SynthesisModel {
    fn train(&mut self, data: &[usize]) {
        match self {
            Self::Resample(model) => model.train(data),
            Self::Generative(model) => model.train(data),
        }
    }

    fn sample(&mut self, n: usize) -> Vec<usize> {
        match self {
            Self::Resample(model) => model.sample(n),
            Self::Generative(model) => model.sample(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedCase {
    pub index: usize,
    pub target_length: usize,
    pub payload: String,
    pub request: String,
    pub byte_length: usize,
}

impl SynthesizedCase {
    pub fn to_lines(&self) -> String {
        let ts = format_timestamp(&Local::now());
        format!(
            "{ts}     Info: Sending generated case #{} (length {})...\n\
             {ts}     Transmitted {} bytes: {}\n\
             {ts}     Info: Closing connection...\n\
             {ts}     Info: Sleeping 0.2s...\n\n",
            self.index,
            self.target_length,
            self.byte_length,
            escape_bytes(self.request.as_bytes()),
            ts = ts
        )
    }
}

pub fn build_request(payload: &str) -> String {
    format!(
        "GET /{} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\n\r\n",
        payload, SYNTH_HOST, SYNTH_USER_AGENT
    )
}

pub struct PayloadSynthesizer {
    model: SynthesisModel,
    rng: SmallRng,
}

impl PayloadSynthesizer {
    pub fn new(model: SynthesisModel, seed: Option<u64>) -> Self {
        Self {
            model,
            rng: rng_from(seed.map(|s| s.wrapping_add(1))),
        }
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }

    /// Trains on `lengths` and produces `count` cases in generation order.
    pub fn synthesize(&mut self, lengths: &[usize], count: usize) -> Vec<SynthesizedCase> {
        if count == 0 {
            return Vec::new();
        }
        self.model.train(lengths);
        info!("Generating {} test case(s) using {} model...", count, self.model.name());

        self.model
            .sample(count)
            .into_iter()
            .enumerate()
            .map(|(index, target_length)| {
                let payload: String = (&mut self.rng)
                    .sample_iter(&Alphanumeric)
                    .take(target_length)
                    .map(char::from)
                    .collect();
                let request = build_request(&payload);
                SynthesizedCase {
                    index,
                    target_length,
                    byte_length: request.len(),
                    payload,
                    request,
                }
            })
            .collect()
    }
}

/// Writes every case to `path` (truncated) in generation order.
pub async fn write_cases<P: AsRef<Path>>(path: P, cases: &[SynthesizedCase]) -> FuzzResult<PathBuf> {
    let log = TranscriptLog::create(path.as_ref()).await?;
    for case in cases {
        log.write_raw(&case.to_lines()).await?;
    }
    let path = log.path().to_path_buf();
    log.close().await?;
    info!("Output saved to: {}", path.display());
    Ok(path)
}

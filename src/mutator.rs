// File: mutator.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Request construction for fuzz trials.
//!
//! A request is modelled as a block of primitives (fuzzable strings,
//! delimiters and static bytes). The structured engine walks every fuzzable
//! primitive through a depth-scaled mutation library; the property engine
//! draws fresh randomized requests instead.

use chrono::{DateTime, Local};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const PATH_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
const HEADER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_:;.,/ ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 9] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
        HttpMethod::Head,
        HttpMethod::Options,
        HttpMethod::Trace,
        HttpMethod::Connect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Connect => "CONNECT",
        }
    }

    pub fn takes_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One attempted request. Immutable once built.
#[derive(Debug, Clone)]
pub struct FuzzTrial {
    pub sequence_id: u64,
    pub depth: u8,
    pub method: HttpMethod,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Local>,
}

impl FuzzTrial {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Primitive {
    Fuzzable(String),
    Delim(String),
    Static(String),
}

/// Structured request skeleton for one verb at one depth.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    depth: u8,
    primitives: Vec<Primitive>,
}

impl RequestTemplate {
    pub fn new(method: HttpMethod, depth: u8, target: &str) -> Self {
        let depth = depth.max(1);
        let mut primitives = vec![
            Primitive::Fuzzable(method.as_str().to_string()),
            Primitive::Delim(" ".to_string()),
            Primitive::Fuzzable("/index.html".to_string()),
            Primitive::Delim(" ".to_string()),
            Primitive::Fuzzable("HTTP/1.1".to_string()),
            Primitive::Static("\r\n".to_string()),
            Primitive::Fuzzable(format!("Host: {}", target)),
            Primitive::Static("\r\n".to_string()),
        ];

        for i in 0..depth as usize {
            primitives.push(Primitive::Fuzzable(format!("X-Fuzz-{}", i)));
            primitives.push(Primitive::Delim(": ".to_string()));
            primitives.push(Primitive::Fuzzable("A".repeat(8 * (i + 1))));
            primitives.push(Primitive::Static("\r\n".to_string()));
        }

        let mut header = |name: &str, value: &str| {
            primitives.push(Primitive::Fuzzable(name.to_string()));
            primitives.push(Primitive::Delim(": ".to_string()));
            primitives.push(Primitive::Fuzzable(value.to_string()));
            primitives.push(Primitive::Static("\r\n".to_string()));
        };

        header("User-Agent", "Mozilla/5.0");
        header("Accept", "*/*");
        if method.takes_body() {
            header("Content-Type", "application/x-www-form-urlencoded");
            header("Content-Length", "11");
        }

        primitives.push(Primitive::Fuzzable("Connection".to_string()));
        primitives.push(Primitive::Delim(": ".to_string()));
        primitives.push(Primitive::Fuzzable("close".to_string()));
        primitives.push(Primitive::Static("\r\n\r\n".to_string()));

        if method.takes_body() {
            primitives.push(Primitive::Fuzzable("param=value".to_string()));
        }

        Self { depth, primitives }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Header lines in the rendered skeleton, request line excluded.
    pub fn header_count(&self) -> usize {
        self.primitives
            .iter()
            .filter(|p| matches!(p, Primitive::Delim(d) if d == ": "))
            .count()
    }

    pub fn render(&self) -> Vec<u8> {
        self.render_replacing(None)
    }

    fn render_replacing(&self, replacement: Option<(usize, &str)>) -> Vec<u8> {
        let mut out = String::new();
        for (idx, primitive) in self.primitives.iter().enumerate() {
            if let Some((target, value)) = replacement {
                if idx == target {
                    out.push_str(value);
                    continue;
                }
            }
            match primitive {
                Primitive::Fuzzable(s) | Primitive::Delim(s) | Primitive::Static(s) => {
                    out.push_str(s)
                }
            }
        }
        out.into_bytes()
    }

    /// Every single-primitive mutation of the skeleton, in walk order.
    pub fn mutations(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for (idx, primitive) in self.primitives.iter().enumerate() {
            let candidates = match primitive {
                Primitive::Fuzzable(value) => string_mutations(value, self.depth),
                Primitive::Delim(value) => delim_mutations(value, self.depth),
                Primitive::Static(_) => continue,
            };
            for candidate in candidates {
                out.push(self.render_replacing(Some((idx, &candidate))));
            }
        }
        out
    }
}

/// Longest string the mutation library produces at `depth`.
pub fn max_field_length(depth: u8) -> usize {
    256usize << (2 * (depth.clamp(1, 5) as usize - 1))
}

fn string_mutations(value: &str, depth: u8) -> Vec<String> {
    let depth = depth.clamp(1, 5) as usize;
    let mut out = vec![
        String::new(),
        value.repeat(2),
        format!("{}\0", value),
        format!("{}\r\nX-Injected: 1", value),
        "%s%n%x%d".repeat(depth),
        format!("{}etc/passwd", "../".repeat(4 * depth)),
        "' OR '1'='1".to_string(),
        "-1".to_string(),
        "0xffffffff".to_string(),
        "9".repeat(20 * depth),
        "\u{feff}\u{202e}".repeat(depth),
    ];

    let max_len = max_field_length(depth as u8);
    let mut len = 128;
    while len <= max_len {
        out.push("A".repeat(len));
        out.push(format!("{}{}", value, "B".repeat(len - 1)));
        len *= 2;
    }
    out
}

fn delim_mutations(value: &str, depth: u8) -> Vec<String> {
    let mut out = vec![
        String::new(),
        value.repeat(2),
        "\t".to_string(),
        "\r\n".to_string(),
    ];
    for n in 1..=depth.clamp(1, 5) as usize {
        out.push(value.repeat(16 * n));
    }
    out
}

pub struct RequestMutator {
    rng: SmallRng,
    next_sequence: u64,
}

impl Default for RequestMutator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestMutator {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
            next_sequence: 1,
        }
    }

    /// Set random seed for reproducibility
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    fn trial(&mut self, method: HttpMethod, depth: u8, payload: Vec<u8>) -> FuzzTrial {
        let sequence_id = self.next_sequence;
        self.next_sequence += 1;
        FuzzTrial {
            sequence_id,
            depth,
            method,
            payload,
            timestamp: Local::now(),
        }
    }

    /// The unmutated skeleton for `method` at `depth`.
    pub fn build(&mut self, method: HttpMethod, depth: u8, target: &str) -> FuzzTrial {
        let template = RequestTemplate::new(method, depth, target);
        self.trial(method, template.depth(), template.render())
    }

    /// Skeleton first, then every mutation of the walk.
    pub fn structured_walk(&mut self, method: HttpMethod, depth: u8, target: &str) -> Vec<FuzzTrial> {
        let template = RequestTemplate::new(method, depth, target);
        let depth = template.depth();
        let mut trials = vec![self.trial(method, depth, template.render())];
        for payload in template.mutations() {
            trials.push(self.trial(method, depth, payload));
        }
        trials
    }

    pub fn random_trial(&mut self, methods: &[HttpMethod], depth: u8, target: &str) -> FuzzTrial {
        let depth = depth.max(1);
        let d = depth as usize;
        let method = methods
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(HttpMethod::Get);

        let segment_count = self.rng.gen_range(1..=3 + d);
        let segments: Vec<String> = (0..segment_count)
            .map(|_| {
                let len = self.rng.gen_range(1..=5);
                self.random_string(PATH_ALPHABET, len)
            })
            .collect();
        let mut target_path = format!("/{}", segments.join("/"));

        let param_count = self.rng.gen_range(0..=3 + d);
        let mut params: Vec<(String, String)> = Vec::new();
        for _ in 0..param_count {
            let key_len = self.rng.gen_range(1..=5 + d);
            let value_len = self.rng.gen_range(0..=8 + d);
            let key = self.random_string(PATH_ALPHABET, key_len);
            let value = self.random_string(PATH_ALPHABET, value_len);
            if !params.iter().any(|(k, _)| *k == key) {
                params.push((key, value));
            }
        }
        if !params.is_empty() {
            let query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            target_path.push('?');
            target_path.push_str(&query.join("&"));
        }

        let header_count = self.rng.gen_range(0..=3 + d);
        let mut headers: Vec<(String, String)> = Vec::new();
        for _ in 0..header_count {
            let name_len = self.rng.gen_range(1..=12 + d);
            let value_len = self.rng.gen_range(0..=20 + d);
            let name = self.random_string(HEADER_ALPHABET, name_len);
            let value = self.random_string(HEADER_ALPHABET, value_len);
            if !headers.iter().any(|(k, _)| *k == name) {
                headers.push((name, value));
            }
        }

        let body_len = self.rng.gen_range(0..=100 + 10 * d);
        let body: Vec<u8> = (0..body_len).map(|_| self.rng.gen::<u8>()).collect();

        let mut head = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", method, target_path, target);
        for (name, value) in &headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        if !body.is_empty() {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut payload = head.into_bytes();
        payload.extend_from_slice(&body);
        self.trial(method, depth, payload)
    }

    fn random_string(&mut self, alphabet: &[u8], len: usize) -> String {
        (0..len)
            .map(|_| alphabet[self.rng.gen_range(0..alphabet.len())] as char)
            .collect()
    }
}

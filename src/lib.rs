// File: lib.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_inception)]
#![allow(clippy::bool_assert_comparison)]
#![allow(clippy::new_without_default)]
#![allow(clippy::useless_vec)]

pub mod cli;
pub mod config;
pub mod error;
pub mod escalation;
pub mod generalization;
pub mod getstate;
pub mod mutator;
pub mod parser;
pub mod pipeline;
pub mod probes;
pub mod rawhttp;
pub mod report;
pub mod runner;
pub mod scanner;
pub mod synthesizer;
pub mod transcript;

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for querycache
//!
//! Drives the cache against a synthetic workout backend so hit rates,
//! eviction behaviour and warming can be observed from the terminal.

pub mod commands;
pub mod output;
pub mod simulate;

pub use commands::{Cli, Commands};
pub use simulate::{handle_config, handle_simulate, handle_warm, Workload};

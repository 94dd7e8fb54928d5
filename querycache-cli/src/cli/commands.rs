// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Command-line arguments

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "querycache")]
#[command(about = "Client-side query cache workload simulator", long_about = None)]
#[command(version)]
pub struct Cli {
    /// JSON cache configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show version information
    Version,

    /// Run a read/write workload through the cache and report statistics
    Simulate {
        /// Number of distinct users
        #[arg(short, long, default_value_t = 20)]
        users: usize,

        /// Total requests to issue
        #[arg(short, long, default_value_t = 2000)]
        requests: usize,

        /// Fraction of requests that write and invalidate (0.0 - 1.0)
        #[arg(long, default_value_t = 0.05)]
        write_ratio: f64,

        /// Fraction of backend reads that fail (0.0 - 1.0)
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,

        /// Simulated backend latency per read
        #[arg(long, default_value_t = 1)]
        latency_ms: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Warm the cache for a set of users and report the queue outcome
    Warm {
        /// Number of users to warm
        #[arg(short, long, default_value_t = 5)]
        users: usize,

        /// Page the users are on, for targeted warming
        #[arg(short, long)]
        page: Option<String>,

        /// Treat each user as starting a new session
        #[arg(long)]
        new_session: bool,

        /// Fraction of backend reads that fail (0.0 - 1.0)
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Print the effective cache configuration as JSON
    Config {
        /// Start from a named preset instead of the defaults
        #[arg(short, long, value_enum)]
        preset: Option<Preset>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Preset {
    Default,
    ReadOptimized,
    MemoryConstrained,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! querycache CLI entry point

use clap::Parser;
use colored::Colorize;

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if let Some(level) = cli.log_level {
        level.to_level_filter()
    } else {
        // RUST_LOG can still raise this
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::Version => {
            println!("{} {}", "querycache".bold().green(), querycache::VERSION);
            println!("Client-side query cache with warming");
            Ok(())
        }

        Commands::Simulate {
            users,
            requests,
            write_ratio,
            failure_rate,
            latency_ms,
            format,
        } => cli::handle_simulate(
            cli.config,
            cli::Workload {
                users,
                requests,
                write_ratio,
                failure_rate,
                latency_ms,
            },
            format,
        ),

        Commands::Warm {
            users,
            page,
            new_session,
            failure_rate,
            format,
        } => cli::handle_warm(cli.config, users, page, new_session, failure_rate, format),

        Commands::Config { preset } => cli::handle_config(cli.config, preset),
    }
}

// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Report formatting for CLI output

use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use querycache::cache::memory_monitor::format_bytes;
use querycache::cache::{CacheStats, EnhancedStats};
use querycache::warming::WarmingServiceStats;
use querycache::{CacheHealth, WarmingResponse};

use super::commands::OutputFormat;

/// Counters collected by the simulate handler itself
#[derive(Debug, Clone, Default)]
pub struct SimulationSummary {
    pub requests: usize,
    pub reads: usize,
    pub writes: usize,
    pub failed_reads: usize,
    pub invalidated: usize,
    pub backend_reads: usize,
    pub elapsed_ms: u128,
}

pub struct StatsFormatter;

impl StatsFormatter {
    pub fn simulation(
        summary: &SimulationSummary,
        stats: &EnhancedStats,
        health: &CacheHealth,
        format: OutputFormat,
    ) -> String {
        match format {
            OutputFormat::Table => Self::simulation_table(summary, stats, health),
            OutputFormat::Json => Self::to_json(serde_json::json!({
                "summary": {
                    "requests": summary.requests,
                    "reads": summary.reads,
                    "writes": summary.writes,
                    "failed_reads": summary.failed_reads,
                    "invalidated": summary.invalidated,
                    "backend_reads": summary.backend_reads,
                    "elapsed_ms": summary.elapsed_ms as u64,
                },
                "stats": stats,
                "health": health,
            })),
        }
    }

    pub fn warming(
        responses: &[WarmingResponse],
        stats: &WarmingServiceStats,
        cache: &CacheStats,
        format: OutputFormat,
    ) -> String {
        match format {
            OutputFormat::Table => Self::warming_table(responses, stats, cache),
            OutputFormat::Json => Self::to_json(serde_json::json!({
                "responses": responses,
                "warming": stats,
                "cache": cache,
            })),
        }
    }

    fn simulation_table(
        summary: &SimulationSummary,
        stats: &EnhancedStats,
        health: &CacheHealth,
    ) -> String {
        let mut output = String::new();
        output.push_str(&format!("{}\n", "Simulation Results".bold().green()));
        output.push_str(&format!("Elapsed: {} ms\n\n", summary.elapsed_ms));

        let basic = &stats.basic;
        let mut table = Self::metric_table();
        table.add_row(vec!["Requests".to_string(), summary.requests.to_string()]);
        table.add_row(vec!["Reads".to_string(), summary.reads.to_string()]);
        table.add_row(vec![
            "Writes (entries invalidated)".to_string(),
            format!("{} ({})", summary.writes, summary.invalidated),
        ]);
        table.add_row(vec!["Failed reads".to_string(), summary.failed_reads.to_string()]);
        table.add_row(vec!["Backend reads".to_string(), summary.backend_reads.to_string()]);
        table.add_row(vec![
            "Hit rate".to_string(),
            format!("{:.1}%", stats.hit_rate * 100.0),
        ]);
        table.add_row(vec!["Entries".to_string(), basic.entries.to_string()]);
        table.add_row(vec!["Memory".to_string(), format_bytes(basic.memory_usage)]);
        table.add_row(vec!["Evictions".to_string(), basic.evictions.to_string()]);
        table.add_row(vec!["Rows read".to_string(), basic.rows_read.to_string()]);
        table.add_row(vec![
            "Bandwidth".to_string(),
            format!("{:.3} MB", stats.bandwidth_mb),
        ]);
        table.add_row(vec![
            "Estimated cost / savings".to_string(),
            format!("${:.6} / ${:.6}", stats.estimated_cost, stats.estimated_savings),
        ]);
        table.add_row(vec![
            "Avg hit / fetch latency".to_string(),
            format!(
                "{:.3} ms / {:.3} ms",
                stats.avg_hit_latency_ms, stats.avg_fetch_latency_ms
            ),
        ]);
        output.push_str(&table.to_string());
        output.push('\n');

        if !stats.reads_by_table.is_empty() {
            output.push_str(&format!("\n{}\n", "Rows read by table".bold()));
            let mut by_table = Table::new();
            by_table.load_preset(UTF8_FULL);
            by_table.set_header(vec![
                Cell::new("Table").fg(Color::Green),
                Cell::new("Rows").fg(Color::Green),
            ]);
            for (name, rows) in &stats.reads_by_table {
                by_table.add_row(vec![name.clone(), rows.to_string()]);
            }
            output.push_str(&by_table.to_string());
            output.push('\n');
        }

        output.push_str(&format!(
            "\nHealth: {} (memory pressure: {})\n",
            Self::score(health.overall),
            health.pressure
        ));
        for (i, recommendation) in health.recommendations.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, recommendation.yellow()));
        }

        output
    }

    fn warming_table(
        responses: &[WarmingResponse],
        stats: &WarmingServiceStats,
        cache: &CacheStats,
    ) -> String {
        let mut output = String::new();
        output.push_str(&format!("{}\n\n", "Warming Results".bold().green()));

        let mut requests = Table::new();
        requests.load_preset(UTF8_FULL);
        requests.set_header(vec![
            Cell::new("User").fg(Color::Green),
            Cell::new("Priority").fg(Color::Green),
            Cell::new("Strategy").fg(Color::Green),
            Cell::new("Tasks").fg(Color::Green),
        ]);
        for response in responses {
            let strategy = response
                .strategy
                .map(|s| format!("{:?}", s))
                .unwrap_or_else(|| "-".to_string());
            requests.add_row(vec![
                response.user_id.clone(),
                response.priority.to_string(),
                strategy,
                response.tasks_queued.to_string(),
            ]);
        }
        output.push_str(&requests.to_string());
        output.push('\n');

        let runs = &stats.runs;
        let mut table = Self::metric_table();
        table.add_row(vec!["Runs".to_string(), runs.runs.to_string()]);
        table.add_row(vec!["Succeeded".to_string(), runs.succeeded.to_string()]);
        table.add_row(vec!["Failed".to_string(), runs.failed.to_string()]);
        table.add_row(vec!["Retries".to_string(), runs.retries.to_string()]);
        table.add_row(vec![
            "Avg duration".to_string(),
            format!("{:.2} ms", runs.avg_duration_ms),
        ]);
        table.add_row(vec!["Cached entries".to_string(), cache.entries.to_string()]);
        table.add_row(vec![
            "Cached memory".to_string(),
            format_bytes(cache.memory_usage),
        ]);
        output.push('\n');
        output.push_str(&table.to_string());
        output.push('\n');

        if stats.errors.total > 0 {
            output.push_str(&format!("\n{}\n", "Errors:".bold().yellow()));
            for (category, count) in &stats.errors.by_category {
                output.push_str(&format!("  {}: {}\n", category, count.to_string().yellow()));
            }
        }

        output
    }

    fn metric_table() -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            Cell::new("Metric").fg(Color::Green),
            Cell::new("Value").fg(Color::Green),
        ]);
        table
    }

    fn score(value: f64) -> ColoredString {
        let text = format!("{:.2}", value);
        if value >= 0.8 {
            text.green()
        } else if value >= 0.5 {
            text.yellow()
        } else {
            text.red()
        }
    }

    fn to_json(value: serde_json::Value) -> String {
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| {
            "{\"status\": \"error\", \"error\": \"Could not serialize report to JSON\"}".to_string()
        })
    }
}

//! Statistics command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use card_eval::eval::read_results;
use card_eval::stats::{GroupBy, LatencyReport, LatencyRow, Summary};

pub fn run(input: PathBuf, by_image: bool, by_turn: bool, json: bool, verbose: bool) -> Result<()> {
    if verbose {
        eprintln!("Loading results from: {}", input.display());
    }

    let records = read_results(&input)
        .with_context(|| format!("Failed to read results from {}", input.display()))?;

    let group_by = if by_image {
        GroupBy::ModelImage
    } else if by_turn {
        GroupBy::ModelTurn
    } else {
        GroupBy::Model
    };
    let report = LatencyReport::from_records(&records, group_by);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Total results: {} ({} failures)", report.total_records(), report.total_failures());
    println!();
    print_overall(report.overall.as_ref());
    println!();
    print_rows(&report.rows, group_by);

    Ok(())
}

fn print_overall(summary: Option<&Summary>) {
    println!("Overall Latency (s):");
    println!("{:-<60}", "");
    match summary {
        Some(summary) => {
            println!("  Mean: {:.2}, Median: {:.2}", summary.mean, summary.median);
            println!("  Min: {:.2}, Max: {:.2}", summary.min, summary.max);
            println!("  P95: {:.2}, StdDev: {:.2}", summary.p95, summary.std_dev);
        }
        None => println!("  no successful calls"),
    }
}

fn print_rows(rows: &[LatencyRow], group_by: GroupBy) {
    let detail_header = match group_by {
        GroupBy::Model => None,
        GroupBy::ModelImage => Some("Image"),
        GroupBy::ModelTurn => Some("Turn"),
    };

    println!("Statistics by {}:", if detail_header.is_some() { "Model and Detail" } else { "Model" });
    println!("{:-<90}", "");
    println!(
        "{:<30} {:<20} {:>7} {:>6} {:>8} {:>8} {:>8} {:>8}",
        "Model",
        detail_header.unwrap_or(""),
        "Results",
        "Fail",
        "Mean s",
        "Median",
        "P95",
        "Chars"
    );
    println!("{:-<90}", "");

    for row in rows {
        let (mean, median, p95) = row.latency.as_ref().map_or_else(
            || ("-".to_string(), "-".to_string(), "-".to_string()),
            |s| (format!("{:.2}", s.mean), format!("{:.2}", s.median), format!("{:.2}", s.p95)),
        );
        println!(
            "{:<30} {:<20} {:>7} {:>6} {:>8} {:>8} {:>8} {:>8.0}",
            row.model,
            row.detail.as_deref().unwrap_or(""),
            row.records,
            row.failures,
            mean,
            median,
            p95,
            row.mean_response_chars
        );
    }
}

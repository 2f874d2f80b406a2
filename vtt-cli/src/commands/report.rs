//! Summaries of a single result log.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use vtt_engine::metrics::{
    ClassificationMetrics, LEVELS, RatingSummary, classification_metrics, percent, rating_summary,
};
use vtt_engine::{EvaluationMode, ReportMetrics, SCORE_MIN, store::read_log};

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Result log (CSV) written by a session
    log: PathBuf,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

pub async fn run(args: ReportArgs) -> Result<()> {
    let log = read_log(&args.log)
        .await
        .with_context(|| format!("failed to read {}", args.log.display()))?;

    let metrics = match &log.mode {
        EvaluationMode::Classification => {
            ReportMetrics::Classification(classification_metrics(&log.records)?)
        }
        EvaluationMode::Rating { features } => {
            ReportMetrics::Rating(rating_summary(features, &log.records)?)
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    match &metrics {
        ReportMetrics::Classification(m) => print_classification(m),
        ReportMetrics::Rating(s) => print_rating(s),
    }
    Ok(())
}

fn print_classification(m: &ClassificationMetrics) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        Cell::new("Metric").fg(Color::Cyan),
        Cell::new("Value").fg(Color::Cyan),
    ]);
    table.add_row(vec![Cell::new("Accuracy"), Cell::new(percent(m.accuracy))]);
    table.add_row(vec![Cell::new("Sensitivity"), Cell::new(percent(m.sensitivity))]);
    table.add_row(vec![Cell::new("Specificity"), Cell::new(percent(m.specificity))]);
    println!("{table}");

    let c = &m.confusion;
    println!();
    println!("Answered: {} ({} correct), errors: {}", m.total, m.correct, m.errors);
    println!(
        "Real judged real: {}, real judged synthetic: {}",
        c.true_positive, c.false_negative
    );
    println!(
        "Synthetic judged synthetic: {}, synthetic judged real: {}",
        c.true_negative, c.false_positive
    );
}

fn print_rating(s: &RatingSummary) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let mut header = vec![
        Cell::new("Feature").fg(Color::Cyan),
        Cell::new("Mean").fg(Color::Cyan),
    ];
    header.extend(level_headers());
    table.set_header(header);

    for feature in &s.features {
        let mut row = vec![
            Cell::new(&feature.feature),
            Cell::new(feature.mean.map_or("n/a".to_string(), |m| format!("{m:.2}"))),
        ];
        row.extend(
            feature
                .distribution
                .percentages
                .iter()
                .map(|p| Cell::new(format!("{p:.1}%"))),
        );
        table.add_row(row);
    }

    println!("{table}");
    println!();
    println!("Rated: {}, errors: {}", s.rated, s.errors);
}

/// One header cell per score level.
pub(crate) fn level_headers() -> Vec<Cell> {
    (0..LEVELS)
        .map(|i| Cell::new(format!("{}", usize::from(SCORE_MIN) + i)).fg(Color::Cyan))
        .collect()
}

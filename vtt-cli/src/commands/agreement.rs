//! Inter-rater agreement between two rating logs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use vtt_engine::metrics::{RatingAgreement, rating_agreement};
use vtt_engine::store::read_log;

use super::report::level_headers;

#[derive(Args, Debug)]
pub struct AgreementArgs {
    /// First rater's result log
    first: PathBuf,

    /// Second rater's result log
    second: PathBuf,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

pub async fn run(args: AgreementArgs) -> Result<()> {
    let first = read_log(&args.first)
        .await
        .with_context(|| format!("failed to read {}", args.first.display()))?;
    let second = read_log(&args.second)
        .await
        .with_context(|| format!("failed to read {}", args.second.display()))?;

    let agreement = rating_agreement(&first, &second)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&agreement)?);
    } else {
        print_agreement(&agreement);
    }
    Ok(())
}

fn print_agreement(agreement: &RatingAgreement) {
    let name = |r: &Option<vtt_engine::RaterId>| {
        r.as_ref()
            .map_or_else(|| "-".to_string(), |id| id.to_string())
    };
    println!(
        "Raters: {} vs {}",
        name(&agreement.rater_a),
        name(&agreement.rater_b)
    );
    println!(
        "Items compared: {}, excluded (load errors): {}",
        agreement.compared_items, agreement.excluded_items
    );
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let mut header = vec![
        Cell::new("Feature").fg(Color::Cyan),
        Cell::new("Kappa").fg(Color::Cyan),
        Cell::new("Agreement").fg(Color::Cyan),
        Cell::new("Mean A").fg(Color::Cyan),
        Cell::new("Mean B").fg(Color::Cyan),
    ];
    header.extend(level_headers());
    table.set_header(header);

    let fmt = |v: Option<f64>, digits: usize| {
        v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.digits$}"))
    };
    for feature in &agreement.features {
        let mut row = vec![
            Cell::new(&feature.feature),
            Cell::new(fmt(feature.kappa, 3)),
            Cell::new(feature.band.map_or("n/a", |b| b.label())),
            Cell::new(fmt(feature.mean_a, 2)),
            Cell::new(fmt(feature.mean_b, 2)),
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
}

//! Dry-run sampling of the configured pools.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use tracing::debug;
use vtt_engine::{ConfigLoader, DirectoryImageSource, ImagePool, Sampler};

#[derive(Args, Debug)]
pub struct SampleArgs {
    /// Study config file layered on top of user/project config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for a reproducible sequence
    #[arg(long)]
    seed: Option<u64>,

    /// Override max items drawn per pool
    #[arg(long)]
    max: Option<usize>,

    /// Directory pool paths are relative to
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

pub async fn run(args: SampleArgs) -> Result<()> {
    let config = ConfigLoader::load(args.config.as_deref())?;
    if config.pools.is_empty() {
        bail!("No pools configured. Add [[pools]] entries to the study config.");
    }
    let mode = config.evaluation_mode()?;
    let persistence = config.persistence()?;

    let source = DirectoryImageSource::new(&args.root);
    let mut pools = Vec::with_capacity(config.pools.len());
    for pool in &config.pools {
        let loaded = ImagePool::from_source(&source, &pool.path, &pool.label, pool.class)
            .await
            .with_context(|| format!("failed to list pool '{}' at {}", pool.label, pool.path))?;
        debug!(label = %pool.label, items = loaded.len(), "pool listed");
        pools.push(loaded);
    }

    let max_per_label = args.max.unwrap_or(config.max_per_label);
    let mut sampler = Sampler::new(args.seed);
    let sequence = sampler.sample(pools, max_per_label)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("#").fg(Color::Cyan),
        Cell::new("Item").fg(Color::Cyan),
        Cell::new("Class").fg(Color::Cyan),
    ]);
    for (index, item) in sequence.items().iter().enumerate() {
        table.add_row(vec![
            Cell::new(index),
            Cell::new(&item.id),
            Cell::new(item.true_class.map_or("-", |c| c.as_str())),
        ]);
    }

    println!("{table}");
    println!();
    println!("{} items, seed {}", sequence.len(), sampler.seed());
    println!("Mode: {mode}");
    println!("Results: {}", persistence.output_dir.display());
    if let (Some(mirror), Some(root)) = (&persistence.mirror, &config.mirror.root) {
        println!(
            "Mirrored to: {} (folder {}, resume {})",
            root.display(),
            mirror.folder.as_deref().unwrap_or("-"),
            mirror.resume_remote
        );
    }
    Ok(())
}

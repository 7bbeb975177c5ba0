use std::path::PathBuf;
use std::sync::Arc;

use atlas_evidence::{EvidenceConfig, EvidenceStore, RedbDb};
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "inspect_evidence")]
#[command(about = "Lists the evidence stored by an evidence pool")]
struct Args {
    /// Directory holding evidence.redb
    #[arg(value_name = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Read the data directory from a pool config file instead
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Show committed evidence instead of pending
    #[arg(long)]
    committed: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,atlas_evidence=debug".into()),
        ))
        .init();

    let data_dir = match (&args.config, args.data_dir) {
        (Some(path), _) => EvidenceConfig::load_from_file(path)?.data_dir,
        (None, Some(dir)) => dir,
        (None, None) => EvidenceConfig::default().data_dir,
    };

    if !data_dir.join("evidence.redb").exists() {
        eprintln!("Error: no evidence.redb found in {:?}", data_dir);
        std::process::exit(1);
    }

    info!("Opening evidence store at {:?}", data_dir);
    let store = EvidenceStore::new(Arc::new(RedbDb::open(&data_dir)?));

    let records = if args.committed {
        store.list_committed()?
    } else {
        store.list_pending()?
    };

    println!("{:<64} | {:<26} | {:<8} | {:<8} | {:<6}", "Hash", "Kind", "Height", "Size", "Seq");
    println!("{:-<64}-+-{:-<26}-+-{:-<8}-+-{:-<8}-+-{:-<6}", "", "", "", "", "");
    for record in &records {
        let ev = &record.evidence;
        println!(
            "{:<64} | {:<26} | {:<8} | {:<8} | {:<6}",
            hex::encode_upper(ev.hash()),
            ev.kind(),
            ev.height(),
            record.size,
            record.seq
        );
    }
    println!(
        "\nTotal {} evidence: {}",
        if args.committed { "committed" } else { "pending" },
        records.len()
    );

    Ok(())
}

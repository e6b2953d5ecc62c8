//! Strata Inspector
//!
//! Reads a store file and reports on the tree inside it.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use strata::{BlockStore, BpTree, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Strata store inspector
#[derive(Parser, Debug)]
#[command(name = "strata-inspect")]
#[command(about = "Inspect and check a strata store file")]
#[command(version)]
struct Args {
    /// Store file
    path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the control block and tree metadata
    Info,

    /// Walk the tree and check its structure
    Verify,

    /// List entries in key order
    Dump {
        /// Walk from the last key backwards
        #[arg(short, long)]
        reverse: bool,

        /// Stop after this many entries
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn info(tree: &BpTree) -> Result<()> {
    let store = tree.store();
    let header = store.control_header()?;
    let meta = tree.meta();

    println!("block size:        {}", header.block_size);
    println!("blocks:            {}", store.block_count());
    println!("free blocks:       {}", header.free_len);
    println!("key size:          {}", meta.key_size);
    println!("entries:           {}", meta.item_count);
    println!("root:              {}", meta.root);
    println!("inline limit:      {}", tree.inline_value_limit());
    println!("big threshold:     {}", tree.big_value_threshold());
    println!(
        "varchar free:      {} runs, {} bytes",
        tree.varchar().free_list_len(store)?,
        tree.varchar().free_bytes(store)?
    );
    Ok(())
}

fn dump(tree: &BpTree, reverse: bool, limit: Option<usize>) -> Result<()> {
    let entries = if reverse { tree.backward()? } else { tree.iter()? };
    for entry in entries.take(limit.unwrap_or(usize::MAX)) {
        let (key, value) = entry?;
        println!("{}  {} bytes", hex(&key), value.len());
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let store = BlockStore::open(&args.path)?;
    let tree = BpTree::open(store)?;

    match args.command {
        Commands::Info => info(&tree)?,
        Commands::Verify => {
            tree.verify()?;
            println!("ok: {} entries", tree.len());
        }
        Commands::Dump { reverse, limit } => dump(&tree, reverse, limit)?,
    }
    // Inspection never writes; dropping unmaps without saving the metadata.
    drop(tree);
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,strata=debug"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    tracing::debug!("strata-inspect v{}", strata::VERSION);

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

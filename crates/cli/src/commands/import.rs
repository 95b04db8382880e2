//! `import`: restores a local-indexer `.tar.gz` archive into a directory
//! sink, for inspecting or re-indexing a prior run's documents.

use anyhow::{Context, Result};
use kube_burner_core::indexer::import_archive;

use crate::cli::ImportArgs;

pub async fn run(args: ImportArgs) -> Result<i32> {
    let archive = args.archive.clone();
    let dest = args.dest.clone();
    tokio::task::spawn_blocking(move || import_archive(&archive, &dest))
        .await
        .context("import task join error")?
        .context("importing archive")?;

    println!("restored {} into {}", args.archive.display(), args.dest.display());
    Ok(0)
}

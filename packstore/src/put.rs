use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use crate::repository::open_repository;

#[derive(Parser, Debug)]
pub struct PutConfig {
    #[arg(required = true, help = "File to store as a block")]
    pub file: PathBuf,
}

#[tokio::main]
pub async fn put(root: &Path, args: PutConfig) -> Result<()> {
    let data = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("cannot read {}", args.file.display()))?;

    let blocks = open_repository(root).await?;
    let block_id = blocks.write_block(&data).await?;

    println!("{block_id}");
    Ok(())
}

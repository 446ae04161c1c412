use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;

use pack_storage::{BlockId, WriteBuffer};

use crate::repository::open_repository;

#[derive(Parser, Debug)]
pub struct ShowConfig {
    #[arg(required = true, help = "Block id")]
    pub id: String,

    #[arg(long, help = "Destination file path (prints to stdout if omitted)")]
    pub dest: Option<PathBuf>,
}

#[tokio::main]
pub async fn show(root: &Path, args: ShowConfig) -> Result<()> {
    let blocks = open_repository(root).await?;
    let block_id = BlockId::from(args.id.as_str());

    let mut data = WriteBuffer::new();
    match blocks.get_block(&block_id, &mut data).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => bail!("Block {block_id} not found"),
        Err(e) => return Err(e.into()),
    }

    match args.dest {
        Some(dest) => {
            let mut file = tokio::fs::File::create(&dest).await?;
            for slice in data.bytes().slices() {
                file.write_all(slice).await?;
            }
            file.flush().await?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            for slice in data.bytes().slices() {
                stdout.write_all(slice)?;
            }
            stdout.flush()?;
        }
    }

    Ok(())
}

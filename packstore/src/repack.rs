use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use pack_storage::{RepackOptions, RepackStats};

use crate::repository::open_repository;

#[derive(Parser, Debug)]
pub struct RepackConfig {
    #[arg(long, default_value = "500000", help = "Max size of block to re-pack")]
    pub max_size: u64,

    #[arg(long, help = "Target size of the new packs (defaults to a multiple of --max-size)")]
    pub pack_size: Option<u64>,
}

impl RepackConfig {
    pub fn options(&self) -> RepackOptions {
        let options = RepackOptions::new(self.max_size);
        match self.pack_size {
            Some(size) => options.with_target_pack_size(size),
            None => options,
        }
    }
}

#[tokio::main]
pub async fn repack(root: &Path, args: RepackConfig) -> Result<()> {
    let blocks = open_repository(root).await?;
    let stats = blocks.repackage_with(args.options()).await?;

    info!(max_size = args.max_size, "repack finished");
    println!("{}", describe(&stats));
    Ok(())
}

fn describe(stats: &RepackStats) -> String {
    if stats.blocks_moved == 0 {
        return "Nothing to repack".to_string();
    }
    format!(
        "Repacked {} blocks ({} bytes) into {} packs, retired {} blobs",
        stats.blocks_moved, stats.bytes_moved, stats.packs_written, stats.blobs_retired
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold() {
        let args = RepackConfig::try_parse_from(["repack"]).unwrap();
        assert_eq!(args.max_size, 500000);
        assert_eq!(args.options(), RepackOptions::new(500000));
    }

    #[test]
    fn test_explicit_pack_size() {
        let args =
            RepackConfig::try_parse_from(["repack", "--max-size", "100", "--pack-size", "4096"])
                .unwrap();
        let options = args.options();
        assert_eq!(options.max_block_size, 100);
        assert_eq!(options.target_pack_size, 4096);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(&RepackStats::default()), "Nothing to repack");
        let stats = RepackStats {
            blocks_moved: 3,
            bytes_moved: 60,
            packs_written: 1,
            blobs_retired: 3,
        };
        assert_eq!(
            describe(&stats),
            "Repacked 3 blocks (60 bytes) into 1 packs, retired 3 blobs"
        );
    }
}

use std::fmt::Display;
use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use chrono::{Local, TimeZone};
use clap::Parser;

use pack_storage::{sort_blocks, BlockInfo, BlockSummary, SortKey};

use crate::repository::open_repository;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

#[derive(Parser, Debug)]
pub struct ListConfig {
    #[arg(short, long, help = "Long output")]
    pub long: bool,

    #[arg(long, default_value = "", help = "Only list blocks whose id starts with this prefix")]
    pub prefix: String,

    #[arg(
        long,
        default_value = "name",
        help = "Sort order (name, size, time, pack, none)"
    )]
    pub sort: SortKey,

    #[arg(short, long, help = "Reverse sort")]
    pub reverse: bool,

    #[arg(short, long, help = "Summarize the list")]
    pub summary: bool,
}

#[tokio::main]
pub async fn list(root: &Path, args: ListConfig) -> Result<()> {
    let blocks = open_repository(root).await?;

    let mut listed = blocks.list_blocks(&args.prefix).await?;
    sort_blocks(&mut listed, args.sort, args.reverse);

    let stdout = io::stdout();
    write_listing(&mut stdout.lock(), &listed, &args, &Local)?;
    Ok(())
}

/// Writes one line per block, then the summary line if requested.
pub fn write_listing<W, Tz>(
    out: &mut W,
    blocks: &[BlockInfo],
    args: &ListConfig,
    tz: &Tz,
) -> io::Result<()>
where
    W: Write,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    for info in blocks {
        if args.long {
            writeln!(out, "{}", long_line(info, tz))?;
        } else {
            writeln!(out, "{}", info.block_id)?;
        }
    }

    if args.summary {
        writeln!(out, "{}", BlockSummary::from_blocks(blocks))?;
    }
    Ok(())
}

fn long_line<Tz>(info: &BlockInfo, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let time = info.timestamp.with_timezone(tz).format(TIME_FORMAT);
    let mut line = format!("{:<34} {:>10} {}", info.block_id.as_str(), info.length, time);
    if let Some(pack) = &info.pack {
        line.push_str(&format!(" in {} offset {}", pack.pack_blob_id, pack.offset));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pack_storage::{BlobId, BlockId};

    fn config(long: bool, summary: bool) -> ListConfig {
        ListConfig {
            long,
            prefix: String::new(),
            sort: SortKey::Name,
            reverse: false,
            summary,
        }
    }

    fn blocks() -> Vec<BlockInfo> {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        vec![
            BlockInfo::standalone(BlockId::from("0a1b"), 42, at),
            BlockInfo::standalone(BlockId::from("0c2d"), 7, at).moved_to(BlobId::from("p1"), 100),
        ]
    }

    fn render(blocks: &[BlockInfo], args: &ListConfig) -> String {
        let mut out = Vec::new();
        write_listing(&mut out, blocks, args, &Utc).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_short_listing() {
        assert_eq!(render(&blocks(), &config(false, false)), "0a1b\n0c2d\n");
    }

    #[test]
    fn test_long_listing() {
        let text = render(&blocks(), &config(true, false));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            format!("{:<34} {:>10} 2024-03-01 12:30:05 UTC", "0a1b", 42)
        );
        assert_eq!(
            lines[1],
            format!(
                "{:<34} {:>10} 2024-03-01 12:30:05 UTC in p1 offset 100",
                "0c2d", 7
            )
        );
    }

    #[test]
    fn test_summary_line() {
        let text = render(&blocks(), &config(false, true));
        assert_eq!(text.lines().last(), Some("Total: 2 blocks, 1 packs, 49 bytes"));

        let empty = render(&[], &config(true, true));
        assert_eq!(empty, "Total: 0 blocks, 0 packs, 0 bytes\n");
    }

    #[test]
    fn test_parse_flags() {
        let args = ListConfig::try_parse_from(["list", "-l", "-r", "--sort", "pack", "--prefix", "0a"])
            .unwrap();
        assert!(args.long);
        assert!(args.reverse);
        assert!(!args.summary);
        assert_eq!(args.sort, SortKey::Pack);
        assert_eq!(args.prefix, "0a");

        assert!(ListConfig::try_parse_from(["list", "--sort", "color"]).is_err());
    }
}

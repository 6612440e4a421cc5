use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use iscript_core::{merge, Script};

mod config;
mod inspect;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(version, about = "Append the new entries of a modded iscript.bin to the stock image")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Relocate entries missing from the baseline into a copy of it.
    Fix(FixArgs),
    /// Print entries and chunks of an image as YAML.
    Inspect {
        input: PathBuf,
    },
}

#[derive(Args, Debug)]
struct FixArgs {
    /// Modded iscript.bin.
    input: PathBuf,

    #[arg(short, long)]
    baseline: Option<PathBuf>,

    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_script(path: &Path) -> Result<Script> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let script = Script::parse(bytes).with_context(|| format!("parsing {}", path.display()))?;
    Ok(script)
}

/// Merge `input` into `baseline` and write the result to `output`.
///
/// `output` is only created once the merged image is complete.
fn fix(baseline: &Path, input: &Path, output: &Path) -> Result<usize> {
    log::info!("[1] Reading stock iscript {}", baseline.display());
    let baseline = load_script(baseline)?;

    log::info!("[2] Reading custom iscript {}", input.display());
    let candidate = load_script(input)?;

    log::info!("[3] Relocating new entries");
    let data = merge(&baseline, &candidate).context("relocating new entries")?;

    log::info!("[4] Writing {} bytes to {}", data.len(), output.display());
    fs::write(output, &data).with_context(|| format!("writing {}", output.display()))?;

    Ok(data.len())
}

fn run_fix(args: FixArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let baseline = args
        .baseline
        .or_else(|| config.baseline.clone())
        .ok_or_else(|| anyhow!("no baseline image; pass --baseline or set `baseline` in the config"))?;
    let output = args
        .output
        .unwrap_or_else(|| config.output_path(&args.input));

    fix(&baseline, &args.input, &output)?;
    log::info!("Done!");
    Ok(())
}

fn run_inspect(input: &Path) -> Result<()> {
    let script = load_script(input)?;
    let summary = inspect::summarize(&script);
    print!("{}", serde_yaml::to_string(&summary)?);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let cli = Cli::parse();
    match cli.command {
        Command::Fix(args) => run_fix(args),
        Command::Inspect { input } => run_inspect(&input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(table: u16, entries: &[(u16, u16, &[u16])], ops: &[(u16, &[u8])]) -> Vec<u8> {
        let mut bytes = vec![0u8; table as usize];
        bytes[..2].copy_from_slice(&table.to_le_bytes());
        for &(addr, data) in ops {
            bytes[addr as usize..addr as usize + data.len()].copy_from_slice(data);
        }
        for &(_, offset, slots) in entries {
            let at = offset as usize;
            bytes[at..at + 4].copy_from_slice(b"SCPE");
            bytes[at + 4..at + 8].copy_from_slice(&0u32.to_le_bytes());
            for (i, slot) in slots.iter().enumerate() {
                bytes[at + 8 + 2 * i..at + 10 + 2 * i].copy_from_slice(&slot.to_le_bytes());
            }
        }
        for &(id, offset, _) in entries {
            bytes.extend_from_slice(&id.to_le_bytes());
            bytes.extend_from_slice(&offset.to_le_bytes());
        }
        bytes.extend_from_slice(&[0xFF, 0xFF, 0x00, 0x00]);
        bytes
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("iscript_fix_{}_{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn writes_merged_image() {
        let dir = scratch("merge");
        let baseline = dir.join("stock.bin");
        let input = dir.join("mod.bin");
        let output = Config::default().output_path(&input);
        let _ = fs::remove_file(&output);

        fs::write(&baseline, image(0x10, &[(1, 0x02, &[0, 0])], &[])).unwrap();
        fs::write(
            &input,
            image(
                0x40,
                &[(1, 0x02, &[0, 0]), (5, 0x20, &[0x30, 0])],
                &[(0x30, &[0x05, 0x01, 0x36])],
            ),
        )
        .unwrap();

        let written = fix(&baseline, &input, &output).unwrap();
        let data = fs::read(&output).unwrap();
        assert_eq!(data.len(), written);

        let merged = Script::parse(data).unwrap();
        assert!(merged.entry(5).is_ok());
        assert_eq!(merged.opcode_count(), 2);
        assert_eq!(output.file_name().unwrap(), "mod fixed.bin");
    }

    #[test]
    fn overflow_leaves_no_file() {
        let dir = scratch("overflow");
        let baseline = dir.join("stock.bin");
        let input = dir.join("mod.bin");
        let output = dir.join("out.bin");
        let _ = fs::remove_file(&output);

        fs::write(&baseline, image(0xFFF8, &[(1, 0x02, &[0, 0])], &[])).unwrap();
        fs::write(
            &input,
            image(
                0x40,
                &[(1, 0x02, &[0, 0]), (5, 0x20, &[0x30, 0])],
                &[(0x30, &[0x05, 0x01, 0x36])],
            ),
        )
        .unwrap();

        let err = fix(&baseline, &input, &output).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<iscript_core::ScriptError>(),
            Some(iscript_core::ScriptError::AddressSpaceOverflow { .. })
        ));
        assert!(!output.exists());
    }

    #[test]
    fn summary_lists_chunks() {
        let bytes = image(
            0x40,
            &[(5, 0x20, &[0x30, 0x36])],
            &[(0x30, &[0x05, 0x01, 0x36]), (0x36, &[0x07, 0x30, 0x00])],
        );
        let script = Script::parse(bytes).unwrap();
        let summary = inspect::summarize(&script);
        assert_eq!(summary.entries.len(), 1);
        assert_eq!(summary.entries[0].slots, vec![Some(0x30), Some(0x36)]);
        assert_eq!(summary.chunks.len(), 2);
        assert_eq!(summary.chunks[0].start, 0x30);
        assert_eq!(summary.chunks[0].size, 3);

        let yaml = serde_yaml::to_string(&summary).unwrap();
        assert!(yaml.contains("entry_table_offset: 64"));
    }
}

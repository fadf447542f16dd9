use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use pwrmon_lib::ReportBatch;
use pwrmon_lib::constants::REPORT_FRAME_SIZE;
use pwrmon_rs::logging::{ConsoleStyle, setup_logging};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Decode a captured telemetry report frame into physical units.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Report frame as a hex string, or a path to a binary capture
    input: String,
    /// Print every sample, not just the summary
    #[arg(short, long)]
    samples: bool,
    /// Print the decoded batch as JSON
    #[arg(long)]
    json: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn load_frames(input: &str) -> Result<Vec<u8>> {
    let path = Path::new(input);
    if path.is_file() {
        debug!(?path, "reading binary capture");
        return std::fs::read(path).with_context(|| format!("Failed to read {:?}", path));
    }
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&cleaned).context("input is neither a file nor a hex string")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose, ConsoleStyle::for_json_output(cli.json))?;

    let bytes = load_frames(&cli.input)?;
    if bytes.len() % REPORT_FRAME_SIZE != 0 {
        info!(
            len = bytes.len(),
            trailing = bytes.len() % REPORT_FRAME_SIZE,
            "input is not a whole number of frames, ignoring the tail"
        );
    }

    let mut frames = bytes.chunks_exact(REPORT_FRAME_SIZE).peekable();
    if frames.peek().is_none() {
        // let the decoder report the size problem
        ReportBatch::from_bytes(&bytes)?;
    }

    for (index, frame) in frames.enumerate() {
        let batch = ReportBatch::from_bytes(frame).with_context(|| format!("frame {index}"))?;
        if cli.json {
            println!("{}", serde_json::to_string(&batch)?);
            continue;
        }

        println!("{batch}");
        if cli.samples {
            for (i, ((v, a), w)) in batch
                .voltage_v
                .iter()
                .zip(&batch.current_a)
                .zip(batch.power_w())
                .enumerate()
            {
                println!("  [{i:3}] {v:9.6} V  {a:10.6} A  {w:10.6} W");
            }
        }
    }

    Ok(())
}

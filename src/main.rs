use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use log::error;
use stackcast::{
    CopyMode, CopyPipeline, CopyReport, PipelineOptions, RawStackSource,
    storage::FilesystemStore,
};

/// Copy a raw .npy frame stack into a chunked array store at a paced
/// rate, optionally following a source that is still being written.
#[derive(Debug, Parser)]
#[command(name = "stackcast", version, about)]
struct Args {
    /// Raw stack file to read
    #[arg(short, long)]
    input: PathBuf,

    /// Store directory to write
    #[arg(short, long, default_value = "example.stack")]
    output: PathBuf,

    /// Target frames per second
    #[arg(long = "fps", default_value_t = 20.0)]
    frames_per_second: f64,

    /// Acquisition start-up latency in seconds
    #[arg(short, long, default_value_t = 10.0)]
    latency: f64,

    /// Frames per chunk
    #[arg(short, long, default_value_t = 128)]
    chunk_size: u64,

    /// Follow a source that is still being appended to
    #[arg(long)]
    live: bool,

    /// Total frames to copy (defaults to the header's declared count)
    #[arg(long, conflicts_with = "live")]
    total_frames: Option<u64>,

    /// Fill value for unwritten store positions
    #[arg(long, default_value_t = 0)]
    fill_value: i64,

    /// Live mode: give up after this many seconds without source growth
    #[arg(long, default_value_t = 5.0)]
    max_wait: f64,

    /// Persist chunks even when wholly equal to the fill value
    #[arg(long)]
    write_fill_chunks: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(args) {
        Ok(report) => {
            println!(
                "done: {} frames copied, sink length {}, {:.1?} elapsed",
                report.frames_copied, report.final_len, report.elapsed
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("copy failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> stackcast::Result<CopyReport> {
    let options = PipelineOptions {
        chunk_size: args.chunk_size,
        rate: args.frames_per_second,
        initial_latency: Duration::from_secs_f64(args.latency),
        fill_value: args.fill_value,
        skip_fill_chunks: !args.write_fill_chunks,
        max_wait: Duration::from_secs_f64(args.max_wait),
        ..PipelineOptions::default()
    };

    let source = if args.live {
        RawStackSource::open_with_retry(
            &args.input,
            options.open_retries,
            options.open_retry_interval,
        )?
    } else {
        RawStackSource::open(&args.input)?
    };

    let mode = if args.live {
        CopyMode::Live
    } else {
        let total_frames = args
            .total_frames
            .unwrap_or_else(|| source.header().frame_count());
        CopyMode::Fixed { total_frames }
    };

    let store = FilesystemStore::new(&args.output)?;
    CopyPipeline::new(source, mode, options).run(store)
}

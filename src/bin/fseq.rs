use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use fseq::{header::VariableHeader, Compression, FseqVersion, SequenceGeometry};

#[derive(Parser)]
#[command(name = "fseq", version, about = "FSEQ lighting-sequence container CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a sequence file's header metadata
    Info { input: PathBuf },
    /// Print one frame's channel bytes as hex
    Dump {
        input: PathBuf,
        #[arg(short, long, default_value = "0")]
        frame: u32,
        #[arg(short, long)]
        start_channel: Option<u32>,
        #[arg(short, long)]
        length: Option<u32>,
    },
    /// Convert a sequence file between dialects/compression settings
    Convert {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Output dialect: v1 or v2
        #[arg(long, default_value = "v2")]
        version: String,
        /// Output compression: none or zstd (v2 only)
        #[arg(short, long, default_value = "zstd")]
        compression: String,
        #[arg(short, long, default_value = "6")]
        level: i32,
    },
    /// Time a full sequential read of every frame
    Bench { input: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    match Cli::parse().command {
        Commands::Info { input } => cmd_info(&input)?,
        Commands::Dump { input, frame, start_channel, length } => cmd_dump(&input, frame, start_channel, length)?,
        Commands::Convert { input, output, version, compression, level } => {
            cmd_convert(&input, &output, &version, &compression, level)?
        }
        Commands::Bench { input } => cmd_bench(&input)?,
    }
    Ok(())
}

fn cmd_info(input: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let reader = fseq::open(input)?;
    let meta = reader.metadata();
    println!("channel_count:   {}", meta.channel_count);
    println!("frame_count:     {}", meta.frame_count);
    println!("step_time_ms:    {}", meta.step_time_ms);
    println!("unique_id:       {}", meta.unique_id);
    println!("variable headers:");
    for vh in &meta.variable_headers {
        let code = String::from_utf8_lossy(&vh.code);
        println!("  {} ({} bytes)", code, vh.data.len());
    }
    Ok(())
}

fn cmd_dump(input: &std::path::Path, frame: u32, start_channel: Option<u32>, length: Option<u32>) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = fseq::open(input)?;
    let meta = reader.metadata();
    let first = start_channel.unwrap_or(0);
    let len = length.unwrap_or(meta.channel_count);
    reader.prepare_read(&[(first, len)]);
    let projection = reader
        .get_frame(frame)
        .ok_or_else(|| format!("frame {frame} out of range (frame_count={})", meta.frame_count))?;
    // A single requested range means `raw()` already holds exactly the
    // requested window in order, with no zero-filled gaps to scatter around.
    let hex: String = projection.raw().iter().map(|b| format!("{b:02x}")).collect();
    println!("{hex}");
    Ok(())
}

fn cmd_convert(
    input: &std::path::Path,
    output: &std::path::Path,
    version: &str,
    compression: &str,
    level: i32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = fseq::open(input)?;
    let meta = reader.metadata();
    reader.prepare_read(&[(0, meta.channel_count)]);

    let out_version = match version {
        "v1" => FseqVersion::V1,
        "v2" => FseqVersion::V2,
        other => return Err(format!("unknown version '{other}', expected v1 or v2").into()),
    };
    let out_compression = match compression {
        "none" => Compression::None,
        "zstd" => Compression::Zstd,
        other => return Err(format!("unknown compression '{other}', expected none or zstd").into()),
    };

    let geometry = SequenceGeometry {
        channel_count: meta.channel_count,
        frame_count: meta.frame_count,
        step_time_ms: meta.step_time_ms,
        start_channel: meta.start_channel,
    };
    let variable_headers: Vec<VariableHeader> = meta.variable_headers.clone();

    let mut writer = fseq::create(output, out_version, geometry, out_compression, level, Vec::new(), variable_headers, meta.unique_id)?;

    let mut frame_buf = vec![0u8; meta.channel_count as usize];
    for frame in 0..meta.frame_count {
        let projection = reader.get_frame(frame).expect("frame within frame_count");
        frame_buf.iter_mut().for_each(|b| *b = 0);
        projection.scatter(&mut frame_buf);
        writer.add_frame(&frame_buf)?;
    }
    writer.finalize()?;
    println!("converted {} frames -> {}", meta.frame_count, output.display());
    Ok(())
}

fn cmd_bench(input: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = fseq::open(input)?;
    let meta = reader.metadata();
    reader.prepare_read(&[(0, meta.channel_count)]);
    let mut buf = vec![0u8; meta.channel_count as usize];
    let start = Instant::now();
    for frame in 0..meta.frame_count {
        reader.get_frame(frame).expect("frame within frame_count").scatter(&mut buf);
    }
    let elapsed = start.elapsed();
    println!("read {} frames in {:?} ({:.1} frames/ms)", meta.frame_count, elapsed, meta.frame_count as f64 / elapsed.as_millis().max(1) as f64);
    Ok(())
}

use std::future::Future;
use std::path::{Path, PathBuf};

use clap::Parser;
use h264_bus::{FrameBuffer, PayloadBuffer, SessionController, Settings};

#[derive(Parser, Debug)]
#[command(name = "h264-transcode", version, about = "Encode YUV420 frames to H.264 and back")]
struct Cli {
    /// Directory holding frame0.yuv, frame1.yuv, ...
    #[arg(short, long, default_value = "test")]
    input: PathBuf,

    #[arg(long, default_value_t = 1920)]
    width: u32,

    #[arg(long, default_value_t = 800)]
    height: u32,

    /// Number of frames to read
    #[arg(short = 'n', long, default_value_t = 100)]
    frames: usize,

    /// Settings JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Writes payload{i}.h264 and decoded{i}.yuv here when set
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("h264_bus", log::LevelFilter::Debug)
        .init();
}

fn read_frames(cli: &Cli) -> anyhow::Result<Vec<FrameBuffer>> {
    (0..cli.frames)
        .map(|i| {
            let path = cli.input.join(format!("frame{}.yuv", i));
            let data = std::fs::read(&path)
                .map_err(|e| anyhow::anyhow!("read {}: {}", path.display(), e))?;
            Ok(FrameBuffer::with_data(cli.width, cli.height, data)?)
        })
        .collect()
}

fn write_outputs(dir: &Path, payloads: &[PayloadBuffer], frames: &[FrameBuffer]) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    for (i, payload) in payloads.iter().enumerate() {
        std::fs::write(dir.join(format!("payload{}.h264", i)), payload.data())?;
    }
    for (i, frame) in frames.iter().enumerate() {
        std::fs::write(dir.join(format!("decoded{}.yuv", i)), frame.data())?;
    }
    log::info!("wrote outputs to {}", dir.display());
    Ok(())
}

async fn transcode(cli: &Cli, settings: &Settings) -> anyhow::Result<()> {
    let frames = read_frames(cli)?;
    log::info!("read {} frames of {}x{}", frames.len(), cli.width, cli.height);

    let mut encoder = SessionController::encoder(settings)?;
    let payloads = encoder.encode(&frames).await?;
    let bytes: usize = payloads.iter().map(PayloadBuffer::len).sum();
    log::info!("encoded {} payloads, {} bytes", payloads.len(), bytes);

    let mut decoder = SessionController::decoder(settings)?;
    let decoded = decoder.decode(&payloads).await?;
    if let Some(first) = decoded.first() {
        log::info!("decoded {} frames of {}", decoded.len(), first.format());
    } else {
        log::warn!("decoder produced no frames");
    }

    if let Some(dir) = cli.output.as_deref() {
        write_outputs(dir, &payloads, &decoded)?;
    }
    Ok(())
}

/// Runs `work` unless `interrupt` fires first, which is reported as an error.
async fn until_interrupted<I>(
    work: impl Future<Output = anyhow::Result<()>>,
    interrupt: impl Future<Output = I>,
) -> anyhow::Result<()> {
    // dropping the sessions on interrupt tears their graphs down
    tokio::select! {
        result = work => result,
        _ = interrupt => {
            log::warn!("interrupted");
            anyhow::bail!("interrupted before the transcode finished")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let settings = match cli.config.as_deref() {
        Some(path) => Settings::from_json_file(path)?,
        None => Settings::default(),
    };

    until_interrupted(transcode(&cli, &settings), tokio::signal::ctrl_c()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interrupt_is_an_error() {
        let work = std::future::pending::<anyhow::Result<()>>();
        let result = until_interrupted(work, std::future::ready(())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_finished_work_is_returned() {
        let result = until_interrupted(async { Ok(()) }, std::future::pending::<()>()).await;
        assert!(result.is_ok());
    }
}

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand, ValueEnum};
use reolink::{
    CameraConfig, Credentials, DownloadEvent, DownloadMethod, DownloadScheduler, EnqueueOutcome,
    HttpClient, Mode, Priority, SchedulerConfig, SegmentLocator, StreamKind, StreamOptions,
    StreamPump, TransportMode,
};

#[derive(Parser)]
#[command(
    name = "reolink",
    about = "Search, download and watch Reolink camera recordings"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode recording file names
    Decode {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// List recordings in a time range
    Search {
        #[command(flatten)]
        camera: CameraArgs,
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Download recordings in a time range
    Download {
        #[command(flatten)]
        camera: CameraArgs,
        #[command(flatten)]
        range: RangeArgs,
        /// Destination directory
        #[arg(long, short, default_value = ".")]
        dir: PathBuf,
        #[arg(long, default_value_t = 1)]
        workers: usize,
        /// Use the `Download` command instead of `Playback`
        #[arg(long)]
        legacy_download: bool,
    },
    /// Write live frames to an Annex B file
    Live {
        #[command(flatten)]
        camera: CameraArgs,
        #[arg(long, default_value_t = 0)]
        channel: u8,
        #[arg(long, default_value = "main")]
        stream: StreamKind,
        /// Explicit RTSP URL instead of the camera's preview path
        #[arg(long)]
        url: Option<String>,
        #[arg(long, value_enum, default_value_t = Transport::Tcp)]
        transport: Transport,
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<usize>,
        #[arg(long, short, default_value = "live.h26x")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct CameraArgs {
    /// Camera hostname or IP address
    #[arg(long)]
    host: String,
    #[arg(long, short, default_value = "admin")]
    user: String,
    #[arg(long, short, default_value = "")]
    password: String,
    #[arg(long)]
    https: bool,
    /// HTTP(S) port of the command API
    #[arg(long)]
    port: Option<u16>,
    #[arg(long, default_value_t = 554)]
    rtsp_port: u16,
}

impl CameraArgs {
    fn config(&self) -> CameraConfig {
        let mut config = CameraConfig::new(&self.host, Credentials::new(&self.user, &self.password));
        config.https = self.https;
        config.http_port = self.port;
        config.rtsp_port = self.rtsp_port;
        config
    }
}

#[derive(Args)]
struct RangeArgs {
    /// Start, e.g. 2024-08-12T00:00:00
    #[arg(long, value_parser = parse_time)]
    from: NaiveDateTime,
    #[arg(long, value_parser = parse_time)]
    to: NaiveDateTime,
    #[arg(long, default_value_t = 0)]
    channel: u8,
    #[arg(long, default_value = "main")]
    stream: StreamKind,
}

#[derive(Clone, Copy, ValueEnum)]
enum Transport {
    Tcp,
    Udp,
}

fn parse_time(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Decode { names } => {
            for name in names {
                match reolink::decode(&name) {
                    Ok(meta) => println!(
                        "{name}\n  channel {} ({}), v{}\n  {} .. {}\n  size {:?}\n  {:?}",
                        meta.channel,
                        meta.stream_kind,
                        meta.version,
                        meta.start,
                        meta.end_datetime(),
                        meta.file_size,
                        meta.trigger_flags
                    ),
                    Err(e) => println!("{name}\n  {e}"),
                }
            }
            Ok(())
        }
        Command::Search { camera, range } => {
            let client = Arc::new(HttpClient::new(camera.config())?);
            client.login()?;
            let locator = SegmentLocator::new(client.clone());
            let report = locator.find_detailed(range.from..range.to, range.channel, range.stream);
            let _ = client.logout();
            let report = report?;

            for segment in &report.segments {
                println!(
                    "{}  {} .. {}  {:>10}  {}",
                    segment.channel,
                    segment.start,
                    segment.end,
                    segment.byte_size.map(|s| s.to_string()).unwrap_or_default(),
                    segment.remote_path
                );
            }
            for skipped in &report.skipped {
                eprintln!("skipped {}: {}", skipped.name, skipped.error);
            }
            Ok(())
        }
        Command::Download {
            camera,
            range,
            dir,
            workers,
            legacy_download,
        } => {
            let method = if legacy_download {
                DownloadMethod::Download
            } else {
                DownloadMethod::Playback
            };
            let client = Arc::new(HttpClient::new(camera.config())?.with_download_method(method));
            client.login()?;
            let result = download(&client, &range, dir, workers);
            let _ = client.logout();
            result
        }
        Command::Live {
            camera,
            channel,
            stream,
            url,
            transport,
            frames,
            output,
        } => {
            let config = camera.config();
            let mut options = match url {
                Some(url) => {
                    let mut options = StreamOptions::new(url);
                    options.credentials = Some(config.credentials.clone());
                    options
                }
                None => StreamOptions::for_camera(&config, channel, stream),
            };
            options.transport = match transport {
                Transport::Tcp => TransportMode::Tcp,
                Transport::Udp => TransportMode::Udp,
            };

            let handle = StreamPump::open(options, Mode::Pull)?;
            println!("streaming {} to {}", handle.codec(), output.display());
            let mut file = BufWriter::new(File::create(&output)?);
            let mut count = 0usize;
            for frame in handle.take(frames.unwrap_or(usize::MAX)) {
                tracing::debug!(
                    rtp_timestamp = frame.rtp_timestamp,
                    keyframe = frame.keyframe,
                    nal_units = reolink::media::split_annex_b(&frame.data).len(),
                    "frame"
                );
                file.write_all(&frame.data)?;
                count += 1;
            }
            file.flush()?;
            println!("{count} frames written");
            Ok(())
        }
    }
}

fn download(
    client: &Arc<HttpClient>,
    range: &RangeArgs,
    dir: PathBuf,
    workers: usize,
) -> Result<(), Box<dyn Error>> {
    let locator = SegmentLocator::new(client.clone());
    let segments = locator.find(range.from..range.to, range.channel, range.stream)?;
    if segments.is_empty() {
        println!("no recordings found");
        return Ok(());
    }

    let scheduler = DownloadScheduler::new(
        client.clone(),
        SchedulerConfig {
            workers: workers.max(1),
            ..SchedulerConfig::default()
        },
    )?;
    let events = scheduler.events();
    let mut expected = 0usize;
    for segment in &segments {
        match scheduler.enqueue(segment.download_request(&dir), Priority::Normal)? {
            EnqueueOutcome::Queued | EnqueueOutcome::AlreadyPresent => expected += 1,
            _ => {}
        }
    }

    let mut failed = 0usize;
    let mut finished = 0usize;
    while finished < expected {
        match events.recv()? {
            DownloadEvent::Started { remote_path, .. } => println!("fetching {remote_path}"),
            DownloadEvent::Finished {
                remote_path,
                local_path,
                success,
                reused,
                error,
            } => {
                finished += 1;
                if success {
                    let note = if reused { " (already present)" } else { "" };
                    println!("saved {remote_path} -> {}{note}", local_path.display());
                } else {
                    failed += 1;
                    let reason = error.map(|e| e.to_string()).unwrap_or_default();
                    eprintln!("failed {remote_path}: {reason}");
                }
            }
        }
    }

    scheduler.stop(Duration::from_secs(5));
    if failed > 0 {
        return Err(format!("{failed} of {expected} downloads failed").into());
    }
    Ok(())
}

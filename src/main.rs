use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use audiolink::config::{ClientConfig, DEFAULT_CONFIG_FILE};
use audiolink::driver::{open_device, DeviceIo, Driver, Flow};
use audiolink::link::{Link, LinkEvent};
use audiolink::protocol::{DeviceReport, PlaybackCommand};
use audiolink::server;
use audiolink::transfer::FileTransfer;

#[derive(Parser)]
#[command(name = "audiolink")]
#[command(about = "Talk to an audio playback device over its serial link")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, help = "Config file path")]
    config: Option<PathBuf>,

    #[arg(long, help = "tcp://host:port or a configured serial device (overrides config)")]
    device: Option<String>,

    #[arg(long, help = "Output as JSON")]
    json: bool,

    #[arg(short, long, help = "Debug logging")]
    verbose: bool,

    #[arg(long, default_value_t = 5000, help = "Milliseconds to wait for the device to answer")]
    connect_timeout: u64,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Query storage and the stored file list
    Status,
    /// Upload a raw audio file
    Send {
        file: PathBuf,
        #[arg(long, default_value_t = 8000)]
        sample_rate: u32,
        #[arg(long, help = "Name on the device, 8 bytes at most (defaults to the file stem)")]
        name: Option<String>,
        #[arg(long, help = "Delete the file once the transfer finishes")]
        delete_after: bool,
    },
    Play,
    Pause,
    Next,
    Previous,
    /// Print link events until interrupted
    Monitor,
    /// Run a simulated device
    Simulate {
        #[arg(long, default_value = "127.0.0.1:24100")]
        listen: String,
    },
    GenerateConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE, help = "Config file path")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "audiolink=debug" } else { "audiolink=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        command,
        config,
        device,
        json,
        connect_timeout,
        ..
    } = cli;

    let mut config = ClientConfig::load(config.as_deref())?;
    if let Some(device) = device {
        config.device = device;
    }

    match command {
        Commands::GenerateConfig { output } => {
            ClientConfig::default().save(&output)?;
            if json {
                println!("{}", serde_json::json!({"config_file": output}));
            } else {
                println!("✅ Configuration written to {}", output.display());
            }
            Ok(())
        }
        Commands::Simulate { listen } => server::run_simulator(&listen).await,
        command => {
            let stream = open_device(&config.device).await?;
            let link = Link::new(Vec::new(), config.link.clone());
            let mut driver = Driver::new(stream, link, config.tick_interval());
            wait_for_device(&mut driver, Duration::from_millis(connect_timeout)).await?;
            run_command(&mut driver, &config, command, json).await
        }
    }
}

async fn wait_for_device(driver: &mut Driver<Box<dyn DeviceIo>>, timeout: Duration) -> Result<()> {
    let waited = tokio::time::timeout(
        timeout,
        driver.run(|_, event| match event {
            LinkEvent::ConnectionChanged(true) => Flow::Stop,
            _ => Flow::Continue,
        }),
    )
    .await;

    match waited {
        Ok(result) => result,
        Err(_) => bail!("device did not answer a handshake within {:?}", timeout),
    }
}

async fn run_command(
    driver: &mut Driver<Box<dyn DeviceIo>>,
    config: &ClientConfig,
    command: Commands,
    json: bool,
) -> Result<()> {
    match command {
        Commands::Status => {
            let _ = driver.link_mut().query_status(Instant::now())?;
            let mut report = None;
            driver
                .run(|_, event| match event {
                    LinkEvent::StatusResponse(r) => {
                        report = Some(r);
                        Flow::Stop
                    }
                    LinkEvent::ConnectionChanged(false) => Flow::Stop,
                    _ => Flow::Continue,
                })
                .await?;

            match report.flatten() {
                Some(report) => print_report(&report, json)?,
                None => bail!("device status query failed"),
            }
        }
        Commands::Send {
            file,
            sample_rate,
            name,
            delete_after,
        } => {
            let name = name.unwrap_or_else(|| {
                file.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let transfer = FileTransfer::open(
                &file,
                sample_rate,
                &name,
                config.link.chunk_size,
                config.link.request_timeout(),
                delete_after,
            )?;
            driver.link_mut().send_file(transfer)?;

            let mut outcome: Option<Result<String, String>> = None;
            let mut report = None;
            driver
                .run(|_, event| match event {
                    LinkEvent::FileHeaderResponse(accepted) => {
                        info!("File header {}", if accepted { "accepted" } else { "rejected" });
                        Flow::Continue
                    }
                    LinkEvent::FileChunkProgress {
                        success: true,
                        chunk_id,
                        chunk_count,
                    } => {
                        if !json {
                            eprint!("\r📤 {}/{} chunks", chunk_id + 1, chunk_count);
                        }
                        Flow::Continue
                    }
                    LinkEvent::TransferCompleted { name } => {
                        outcome = Some(Ok(name));
                        Flow::Continue
                    }
                    LinkEvent::TransferFailed(failure) => {
                        outcome = Some(Err(failure.to_string()));
                        Flow::Stop
                    }
                    LinkEvent::StatusResponse(r) if outcome.is_some() => {
                        report = r;
                        Flow::Stop
                    }
                    LinkEvent::ConnectionChanged(false) => Flow::Stop,
                    _ => Flow::Continue,
                })
                .await?;
            if !json {
                eprintln!();
            }

            match outcome {
                Some(Ok(name)) => {
                    if json {
                        println!("{}", serde_json::json!({"transferred": name, "status": report}));
                    } else {
                        println!("✅ Transferred '{}'", name);
                        if let Some(report) = report {
                            print_report(&report, false)?;
                        }
                    }
                }
                Some(Err(reason)) => bail!("transfer failed: {}", reason),
                None => bail!("link lost before the transfer finished"),
            }
        }
        Commands::Play | Commands::Pause | Commands::Next | Commands::Previous => {
            let command = match command {
                Commands::Play => PlaybackCommand::Play,
                Commands::Pause => PlaybackCommand::Pause,
                Commands::Next => PlaybackCommand::Next,
                _ => PlaybackCommand::Previous,
            };
            let _ = driver.link_mut().send_playback_command(command, Instant::now())?;

            let mut result = None;
            driver
                .run(|_, event| match event {
                    LinkEvent::CommandResponse { success, .. } => {
                        result = Some(success);
                        Flow::Stop
                    }
                    LinkEvent::ConnectionChanged(false) => Flow::Stop,
                    _ => Flow::Continue,
                })
                .await?;

            let success = result.unwrap_or(false);
            if json {
                println!("{}", serde_json::json!({"command": command, "success": success}));
            } else if success {
                println!("✅ {}", command);
            } else {
                bail!("device did not accept {}", command);
            }
        }
        Commands::Monitor => {
            let _ = driver.link_mut().query_status(Instant::now());
            driver
                .run(|link, event| {
                    if json {
                        println!("{}", event_json(&event));
                    } else {
                        println!("{:?}", event);
                    }
                    if event == LinkEvent::ConnectionChanged(true) {
                        let _ = link.query_status(Instant::now());
                    }
                    Flow::Continue
                })
                .await?;
        }
        Commands::Simulate { .. } | Commands::GenerateConfig { .. } => {}
    }
    Ok(())
}

fn print_report(report: &DeviceReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("📊 Device Status");
    println!("================");
    println!(
        "Storage: {}",
        if report.status.storage_connected { "connected" } else { "not connected" }
    );
    println!(
        "Space: {} of {} bytes free",
        report.status.available_space, report.status.total_space
    );
    println!("Files: {}", report.files.len());
    for file in &report.files {
        println!("   {:<8} {:>10} bytes {:>6} chunks", file.name(), file.size, file.chunk_count);
    }
    Ok(())
}

fn event_json(event: &LinkEvent) -> serde_json::Value {
    match event {
        LinkEvent::ConnectionChanged(connected) => {
            serde_json::json!({"event": "connection", "connected": connected})
        }
        LinkEvent::StatusResponse(report) => {
            serde_json::json!({"event": "status", "report": report})
        }
        LinkEvent::CommandResponse { command, success } => {
            serde_json::json!({"event": "command", "command": command, "success": success})
        }
        LinkEvent::FileHeaderResponse(accepted) => {
            serde_json::json!({"event": "file_header", "accepted": accepted})
        }
        LinkEvent::FileChunkProgress {
            success,
            chunk_id,
            chunk_count,
        } => serde_json::json!({
            "event": "chunk",
            "success": success,
            "chunk_id": chunk_id,
            "chunk_count": chunk_count
        }),
        LinkEvent::TransferCompleted { name } => {
            serde_json::json!({"event": "transfer_completed", "name": name})
        }
        LinkEvent::TransferFailed(failure) => {
            serde_json::json!({"event": "transfer_failed", "reason": failure.to_string()})
        }
        LinkEvent::ProtocolError(e) => {
            serde_json::json!({"event": "protocol_error", "error": e.to_string()})
        }
    }
}

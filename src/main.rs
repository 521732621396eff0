use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use meterlink::logging::{log_debug, log_error, log_warn};
use meterlink::transport::serial::available_port_names;
use meterlink::util::hex::{parse_hex_lenient, pretty_hex};
use meterlink::{
    init_logger_with_default, log_info, DeviceManager, DeviceStream, ManagerConfig, Port,
    SerialPortTransport, SerialSettings, TcpPort, TcpSettings, WorkerExit,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "meterlink-cli")]
#[command(about = "Poll serial and networked energy meters")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured device and print readings as JSON lines
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Send raw bytes to a port and dump the reply
    Probe {
        /// Serial port name, or host:port with --tcp
        port: String,
        /// Bytes to send, e.g. "01 03 00 00 00 0A C5 CD"
        hex: String,
        #[arg(short, long, default_value = "9600")]
        baudrate: u32,
        #[arg(long)]
        tcp: bool,
        #[arg(short, long, default_value = "1000")]
        timeout_ms: u64,
    },
    /// List serial ports present on this machine
    ListPorts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger_with_default("info");

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::Probe {
            port,
            hex,
            baudrate,
            tcp,
            timeout_ms,
        } => {
            let request = parse_hex_lenient(&hex).context("invalid request bytes")?;
            let port: Box<dyn Port> = if tcp {
                Box::new(TcpPort::new(TcpSettings {
                    address: port,
                    ..TcpSettings::default()
                })?)
            } else {
                Box::new(SerialPortTransport::new(SerialSettings::new(&port, baudrate))?)
            };
            let reply = tokio::task::spawn_blocking(move || {
                probe(port, &request, Duration::from_millis(timeout_ms))
            })
            .await??;
            println!("{}", pretty_hex(&reply, 16));
            Ok(())
        }
        Commands::ListPorts => {
            for name in available_port_names()? {
                println!("{name}");
            }
            Ok(())
        }
    }
}

async fn run(path: PathBuf) -> anyhow::Result<()> {
    let config = ManagerConfig::from_file(&path)
        .with_context(|| format!("loading {}", path.display()))?;

    let (mut manager, mut readings) = DeviceManager::new();
    config.start(&mut manager)?;
    log_info(&format!("running {} devices", manager.device_names().len()));

    loop {
        tokio::select! {
            reading = readings.recv() => match reading {
                Some(reading) => println!("{}", serde_json::to_string(&reading)?),
                None => {
                    log_error("every device worker has exited");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                log_info("stopping");
                break;
            }
        }
    }

    for (name, exit) in manager.stop_all().await {
        match exit {
            WorkerExit::Stopped => log_info(&format!("{name}: stopped")),
            other => log_warn(&format!("{name}: {other:?}")),
        }
    }
    Ok(())
}

fn probe(port: Box<dyn Port>, request: &[u8], timeout: Duration) -> anyhow::Result<Vec<u8>> {
    let mut stream = DeviceStream::new(port);
    stream.open()?;
    if !stream.write(request) {
        bail!("write to {} failed", stream.name());
    }
    let (reply, info) = stream.read_exact(256, 1, timeout, true);
    log_debug(&format!("probe read: {info:?}"));
    if !info.matched {
        bail!("no reply from {} within {timeout:?}", stream.name());
    }
    Ok(reply)
}

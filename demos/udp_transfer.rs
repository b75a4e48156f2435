use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use anyhow::anyhow;
use clap::Parser;
use clap_derive::{Parser, Subcommand};
use swp::config::SwpConfig;
use swp::endpoint::UdpEndpoint;
use swp::receiver::Receiver;
use swp::sender::Sender;
use tokio::io::AsyncWriteExt;
use tracing::{info, Level};

/// Transfers data reliably between two UDP sockets, optionally simulating packet loss.
///
/// Start the receiving side first, e.g.
///   udp_transfer 127.0.0.1:9001 127.0.0.1:9000 receive
/// and then the sending side:
///   udp_transfer 127.0.0.1:9000 127.0.0.1:9001 --loss-probability 0.2 send --text "hello"
#[derive(Parser)]
struct Args {
    local_address: String,
    peer_address: String,

    #[clap(long, default_value_t = 0.0)]
    loss_probability: f64,

    #[clap(long, default_value_t = 5)]
    window_size: u32,

    #[clap(long, default_value_t = 1000)]
    retransmit_timeout_millis: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// sends a file or a text, waiting until everything is acknowledged
    Send {
        #[clap(long)]
        file: Option<String>,
        #[clap(long)]
        text: Option<String>,
    },
    /// writes received data to stdout until interrupted
    Receive,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .try_init()
        .ok();

    let local_addr: SocketAddr = args.local_address.parse()?;
    let peer_addr: SocketAddr = args.peer_address.parse()?;

    let config = Arc::new(SwpConfig {
        window_size: args.window_size,
        retransmit_timeout: Duration::from_millis(args.retransmit_timeout_millis),
        ..SwpConfig::default()
    });
    let endpoint = Arc::new(UdpEndpoint::bind(local_addr, peer_addr, args.loss_probability).await?);

    match args.command {
        Command::Send { file, text } => {
            let data = match (file, text) {
                (Some(file), None) => tokio::fs::read(file).await?,
                (None, Some(text)) => text.into_bytes(),
                _ => return Err(anyhow!("exactly one of --file and --text is required")),
            };

            let sender = Sender::spawn(config, endpoint)?;
            sender.send(&data).await;
            sender.flush().await;
            info!("{} bytes in {} packets were acknowledged", data.len(), sender.next_sequence_number().await);
        }
        Command::Receive => {
            let receiver = Receiver::spawn(config, endpoint)?;
            let mut stdout = tokio::io::stdout();
            loop {
                let chunk = receiver.recv().await?;
                stdout.write_all(&chunk).await?;
                stdout.flush().await?;
            }
        }
    }
    Ok(())
}

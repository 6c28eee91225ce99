use env_logger::Env;
use log::{error, info};
use std::future;
use std::net::SocketAddr;
use std::process;
use std::time::Duration;
use structopt::StructOpt;
use twnet_core::raw::{default_target, send_raw};
use twnet_core::{Client, Config, Event, NetError};

#[derive(StructOpt)]
#[structopt(name = "twnet")]
pub enum Options {
    /// Connect to a server and pump the network until interrupted
    Connect {
        #[structopt(long = "host", default_value = "127.0.0.1")]
        host: String,
        #[structopt(short = "p", long = "port", default_value = "8303")]
        port: u16,
        /// Also send the bare token request sample packet
        #[structopt(long = "sample")]
        sample: bool,
        /// Seconds of server silence before giving up
        #[structopt(long = "timeout-secs", default_value = "10")]
        timeout_secs: u64,
    },
    /// Send one raw datagram and exit
    SendRaw {
        #[structopt(short = "t", long = "target")]
        target: Option<SocketAddr>,
        #[structopt(long = "payload", default_value = "foo")]
        payload: String,
    },
}

async fn connect(host: String, port: u16, sample: bool, timeout_secs: u64) -> Result<(), NetError> {
    let config = Config {
        timeout: Duration::from_secs(timeout_secs),
        ..Config::default()
    };
    let mut client = Client::connect(&host, port, config).await?;
    if sample {
        client.send_sample().await?;
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("could not listen for ctrl-c, running until the server goes away: {}", e);
            future::pending::<()>().await;
        }
    };
    let pumps = client
        .run(shutdown, |event| match event {
            Event::Connected => info!("online with {}", host),
            Event::Chunk { vital, data } => {
                info!("received chunk vital={} size={}", vital, data.len())
            }
            Event::Connless { data, .. } => info!("received connless size={}", data.len()),
            Event::Closed { reason } => info!("server closed the connection: {:?}", reason),
        })
        .await?;
    info!("pumped the network {} times", pumps);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(Env::default().filter_or("TWNET_LOG", "info")).init();

    let result = match Options::from_args() {
        Options::Connect {
            host,
            port,
            sample,
            timeout_secs,
        } => {
            info!("starting client for {}:{} ...", host, port);
            connect(host, port, sample, timeout_secs).await
        }
        Options::SendRaw { target, payload } => {
            let target = target.unwrap_or_else(default_target);
            send_raw(target, payload.as_bytes()).await.map(|_| ())
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

use std::fs;

use moatbus_frame::{FramerConfig, SerialBus};
use moatbus_server::{Server, ServerConfig};
use moatbus_transport::AsyncBusStream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cmd::{parse_duration, ControlArgs};
use crate::exit::{
    io_error, server_error, transport_error, CliError, CliResult, DATA_INVALID, SUCCESS,
};
use crate::output::{print_message, print_store_event, OutputFormat};

pub fn run(args: ControlArgs, format: OutputFormat) -> CliResult<i32> {
    let config = server_config(&args)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(serve(args, config, format))
}

fn server_config(args: &ControlArgs) -> CliResult<ServerConfig> {
    if let Some(path) = &args.config {
        let text = fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        return serde_json::from_str(&text).map_err(|err| {
            CliError::new(DATA_INVALID, format!("{}: {err}", path.display()))
        });
    }
    Ok(ServerConfig {
        server_id: args.server_id,
        poll_interval: parse_duration(&args.poll_interval)?,
        poll_delay: parse_duration(&args.poll_delay)?,
        poll_timeout: parse_duration(&args.poll_timeout)?,
    })
}

async fn serve(args: ControlArgs, config: ServerConfig, format: OutputFormat) -> CliResult<i32> {
    let stream = AsyncBusStream::connect(&args.endpoint)
        .await
        .map_err(|err| transport_error("connect failed", err))?;
    let bus = SerialBus::spawn(stream, FramerConfig::default());
    let server =
        Server::new(&config, bus.sender()).map_err(|err| server_error("server setup failed", err))?;
    info!(address = %server.address(), endpoint = %args.endpoint, "controlling bus");

    let mut events = server.watch();
    let watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_store_event(&event, format),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "client events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });
    let poller = server.spawn_poller();

    tokio::select! {
        () = server.serve(&bus, |msg| print_message(&msg, format)) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                warn!(error = %err, "signal handler failed");
            }
            info!("interrupted");
        }
    }

    poller.abort();
    watcher.abort();
    if let Err(err) = bus.shutdown().await {
        warn!(error = %err, "bus driver ended with error");
    }
    Ok(SUCCESS)
}

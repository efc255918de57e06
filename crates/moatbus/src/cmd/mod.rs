use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use moatbus_message::Address;
use moatbus_transport::Endpoint;

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod control;
pub mod dump;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print every frame, console line and framing error on a bus line.
    Dump(DumpArgs),
    /// Send a single message.
    Send(SendArgs),
    /// Run a bus server: assign client addresses and poll devices.
    Control(ControlArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Dump(args) => dump::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Control(args) => control::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Bus socket path or tcp:HOST:PORT.
    pub endpoint: Endpoint,
    /// Exit after N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Also print L1/L2/L3 heartbeat lines.
    #[arg(long)]
    pub heartbeats: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Bus socket path or tcp:HOST:PORT.
    pub endpoint: Endpoint,
    /// Destination: B, S1..S3 or a client id.
    #[arg(long, short = 'd', value_parser = parse_address)]
    pub dst: Address,
    /// Source address.
    #[arg(long, short = 's', default_value = "S1", value_parser = parse_address)]
    pub src: Address,
    /// Message code.
    #[arg(long, short = 'c', default_value = "3")]
    pub code: u8,
    /// Priority 0..3.
    #[arg(long, default_value = "0")]
    pub prio: u8,
    /// Payload as text.
    #[arg(long, conflicts_with = "hex")]
    pub data: Option<String>,
    /// Payload as hex bytes.
    #[arg(long, conflicts_with = "data")]
    pub hex: Option<String>,
    /// Wait for the far end's ACK byte.
    #[arg(long)]
    pub wait: bool,
    /// How long --wait waits (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ControlArgs {
    /// Bus socket path or tcp:HOST:PORT.
    pub endpoint: Endpoint,
    /// Server slot 1..3.
    #[arg(long, default_value = "1")]
    pub server_id: u8,
    /// Time between poll broadcasts (e.g. 100s).
    #[arg(long, default_value = "100s")]
    pub poll_interval: String,
    /// Wait before the first poll.
    #[arg(long, default_value = "1s")]
    pub poll_delay: String,
    /// Reply window announced to polled devices.
    #[arg(long, default_value = "5s")]
    pub poll_timeout: String,
    /// JSON server configuration; replaces the flags above.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// `B`, `S1`..`S3` or a client id `0`..`127`.
pub fn parse_address(input: &str) -> Result<Address, String> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("b") {
        Ok(Address::Broadcast)
    } else if let Some(n) = input.strip_prefix(['S', 's']) {
        n.parse()
            .map_err(|_| format!("invalid server address: {input}"))
            .and_then(|n| Address::server(n).map_err(|err| err.to_string()))
    } else {
        input
            .parse()
            .map_err(|_| format!("invalid address: {input}"))
            .and_then(|n| Address::client(n).map_err(|err| err.to_string()))
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

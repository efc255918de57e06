use moatbus_frame::{is_heartbeat, FramerConfig, SerialError, SerialEvent, SerialPort};
use moatbus_transport::BusStream;
use tracing::info;

use crate::cmd::DumpArgs;
use crate::exit::{serial_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_event, OutputFormat};

pub fn run(args: DumpArgs, format: OutputFormat) -> CliResult<i32> {
    let config = FramerConfig::default();
    let stream =
        BusStream::connect(&args.endpoint).map_err(|err| transport_error("connect failed", err))?;
    stream
        .set_read_timeout(Some(config.tick))
        .map_err(|err| transport_error("connect failed", err))?;
    install_ctrlc_handler(&stream)?;

    let mut port = SerialPort::with_config(stream, config);
    let mut printed = 0usize;
    loop {
        let event = match port.next_event() {
            Ok(event) => event,
            Err(SerialError::ConnectionClosed) => break,
            Err(err) => return Err(serial_error("receive failed", err)),
        };
        if !shown(&event, args.heartbeats) {
            continue;
        }
        print_event(&event, format);

        if matches!(event, SerialEvent::Message(_)) {
            printed = printed.saturating_add(1);
            if args.count.is_some_and(|count| printed >= count) {
                break;
            }
        }
    }

    let stats = port.stats();
    info!(
        frames = stats.frames,
        acks = stats.acks,
        crc_errors = stats.crc_errors,
        lost = stats.lost,
        "dump finished"
    );
    Ok(SUCCESS)
}

fn shown(event: &SerialEvent, heartbeats: bool) -> bool {
    match event {
        SerialEvent::Console(line) => heartbeats || !is_heartbeat(line),
        SerialEvent::Output(_) => false,
        _ => true,
    }
}

/// Ctrl-C shuts the stream down so the blocked read returns end of stream.
fn install_ctrlc_handler(stream: &BusStream) -> CliResult<()> {
    let handle = stream
        .try_clone()
        .map_err(|err| transport_error("signal handler setup failed", err))?;
    ctrlc::set_handler(move || {
        let _ = handle.shutdown();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

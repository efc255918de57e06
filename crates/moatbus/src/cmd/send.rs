use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use moatbus_frame::{FramerConfig, SerialEvent, SerialPort};
use moatbus_message::BusMessage;
use moatbus_transport::BusStream;
use tracing::debug;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{
    message_error, serial_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let msg = build_message(&args)?;

    let config = FramerConfig::default();
    let stream =
        BusStream::connect(&args.endpoint).map_err(|err| transport_error("connect failed", err))?;
    stream
        .set_read_timeout(Some(config.tick))
        .map_err(|err| transport_error("connect failed", err))?;
    let mut port = SerialPort::with_config(stream, config);

    port.send(&msg)
        .map_err(|err| serial_error("send failed", err))?;
    debug!(%msg, "sent");

    if args.wait {
        wait_for_ack(port, wait_timeout, format)?;
    }
    Ok(SUCCESS)
}

fn build_message(args: &SendArgs) -> CliResult<BusMessage> {
    let payload = match (&args.data, &args.hex) {
        (Some(text), _) => text.as_bytes().to_vec(),
        (None, Some(digits)) => hex::decode(digits.replace([' ', ':'], ""))
            .map_err(|err| CliError::new(USAGE, format!("--hex is not valid hex: {err}")))?,
        (None, None) => Vec::new(),
    };
    BusMessage::with_data(args.src, args.dst, args.code, &payload)
        .and_then(|msg| msg.with_prio(args.prio))
        .map_err(|err| message_error("invalid message", err))
}

/// Read events on a helper thread until the far end acknowledges.
///
/// Messages arriving in the meantime are printed.
fn wait_for_ack(
    mut port: SerialPort<BusStream>,
    timeout: Duration,
    format: OutputFormat,
) -> CliResult<()> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || loop {
        let event = port.next_event();
        let done = event.is_err();
        if tx.send(event).is_err() || done {
            break;
        }
    });

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Ok(SerialEvent::Ack)) => return Ok(()),
            Ok(Ok(SerialEvent::Message(msg))) => print_message(&msg, format),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(serial_error("waiting for ACK failed", err)),
            Err(_) => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no ACK within {}ms", timeout.as_millis()),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use moatbus_message::Address;
    use moatbus_transport::Endpoint;

    use super::*;

    fn args() -> SendArgs {
        SendArgs {
            endpoint: Endpoint::Unix("/tmp/unused.bus".into()),
            dst: Address::Client(5),
            src: Address::Server(1),
            code: 3,
            prio: 1,
            data: None,
            hex: Some("de ad:be ef".into()),
            wait: false,
            wait_timeout: "2s".into(),
        }
    }

    #[test]
    fn hex_payload_ignores_separators() {
        let msg = build_message(&args()).unwrap();
        assert_eq!(msg.data(), &[0xde, 0xad, 0xbe, 0xef][..]);
        assert_eq!(msg.prio(), 1);
        assert_eq!(msg.dst(), Address::Client(5));
    }

    #[test]
    fn invalid_message_fields_are_rejected() {
        let bad_hex = SendArgs {
            hex: Some("xyz".into()),
            ..args()
        };
        assert_eq!(build_message(&bad_hex).unwrap_err().code, USAGE);

        let bad_prio = SendArgs { prio: 4, ..args() };
        assert_eq!(
            build_message(&bad_prio).unwrap_err().code,
            crate::exit::DATA_INVALID
        );
    }

    #[test]
    fn ack_from_peer_ends_wait() {
        let (ours, mut theirs) = BusStream::pair().unwrap();
        ours.set_read_timeout(Some(Duration::from_millis(10))).unwrap();
        let port = SerialPort::new(ours);
        std::io::Write::write_all(&mut theirs, &[moatbus_frame::ACK]).unwrap();
        wait_for_ack(port, Duration::from_secs(2), OutputFormat::Json).unwrap();
    }

    #[test]
    fn silent_peer_times_out() {
        let (ours, _theirs) = BusStream::pair().unwrap();
        ours.set_read_timeout(Some(Duration::from_millis(10))).unwrap();
        let err = wait_for_ack(SerialPort::new(ours), Duration::from_millis(50), OutputFormat::Json)
            .unwrap_err();
        assert_eq!(err.code, TIMEOUT);
    }
}

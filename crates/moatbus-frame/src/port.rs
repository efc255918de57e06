use std::io::{ErrorKind, Read, Write};

use bytes::BytesMut;
use moatbus_message::BusMessage;
use moatbus_transport::BusStream;
use tracing::debug;

use crate::codec::{encode_frame, FramerConfig, ACK};
use crate::error::{Result, SerialError};
use crate::event::{EventQueue, SerialEvent};
use crate::serial::{FramerStats, SerialFramer};

const READ_CHUNK_SIZE: usize = 256;

/// Blocking serial line driver.
///
/// Reads bytes into a [`SerialFramer`], writes its acknowledgements back,
/// and hands out everything else as [`SerialEvent`]s. A read that times out
/// ticks the framer, so the stream's read timeout should be the framer tick
/// (see [`SerialPort::open`]).
pub struct SerialPort<T> {
    inner: T,
    framer: SerialFramer,
    events: EventQueue,
    config: FramerConfig,
}

impl<T: Read + Write> SerialPort<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FramerConfig::default())
    }

    pub fn with_config(inner: T, config: FramerConfig) -> Self {
        Self {
            inner,
            framer: SerialFramer::with_config(&config),
            events: EventQueue::new(),
            config,
        }
    }

    /// Next message, console line, ack or framing error (blocking).
    ///
    /// Returns `Err(SerialError::ConnectionClosed)` at end of stream.
    pub fn next_event(&mut self) -> Result<SerialEvent> {
        loop {
            while let Some(event) = self.events.pop() {
                match event {
                    SerialEvent::Output(bytes) => {
                        self.inner.write_all(&bytes)?;
                        self.inner.flush()?;
                    }
                    other => return Ok(other),
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(SerialError::ConnectionClosed),
                Ok(n) => {
                    for b in &chunk[..n] {
                        self.framer.char_in(*b, &mut self.events);
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    self.framer.timeout(&mut self.events);
                }
                Err(err) => return Err(SerialError::Io(err)),
            }
        }
    }

    /// Next bus message, logging console lines and skipping everything else.
    pub fn recv(&mut self) -> Result<BusMessage> {
        loop {
            match self.next_event()? {
                SerialEvent::Message(msg) => return Ok(msg),
                SerialEvent::Console(line) => crate::serial::log_console(&line),
                SerialEvent::Error(err) => debug!(%err, "framing error"),
                SerialEvent::Ack | SerialEvent::Output(_) => {}
            }
        }
    }

    /// Frame and write one message.
    pub fn send(&mut self, msg: &BusMessage) -> Result<()> {
        let mut buf = BytesMut::new();
        encode_frame(msg, &mut buf)?;
        self.inner.write_all(&buf)?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn send_ack(&mut self) -> Result<()> {
        self.inner.write_all(&[ACK])?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn stats(&self) -> FramerStats {
        self.framer.stats()
    }

    pub fn config(&self) -> &FramerConfig {
        &self.config
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl SerialPort<BusStream> {
    /// Wrap a bus stream, using the framer tick as its read timeout.
    pub fn open(inner: BusStream, config: FramerConfig) -> Result<Self> {
        inner.set_read_timeout(Some(config.tick))?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use moatbus_message::Address;

    use super::*;
    use crate::error::FrameError;

    /// Reads from a fixed script, records writes.
    struct Line {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Line {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for Line {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Line {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn frame(msg: &BusMessage) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(msg, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn events_in_wire_order() {
        let msg = BusMessage::with_data(Address::Client(4), Address::Server(1), 3, b"v=1").unwrap();
        let mut wire = b"hello\n".to_vec();
        wire.extend(frame(&msg));
        wire.push(ACK);

        let mut port = SerialPort::new(Line::new(wire));
        assert_eq!(
            port.next_event().unwrap(),
            SerialEvent::Console("hello".into())
        );
        assert_eq!(port.next_event().unwrap(), SerialEvent::Message(msg));
        assert_eq!(port.next_event().unwrap(), SerialEvent::Ack);
        assert!(matches!(
            port.next_event().unwrap_err(),
            SerialError::ConnectionClosed
        ));
        assert_eq!(port.get_ref().output, vec![ACK]);
    }

    #[test]
    fn ack_is_written_before_message_is_returned() {
        let msg = BusMessage::from_raw(5, -3, 3).unwrap();
        let mut port = SerialPort::new(Line::new(frame(&msg)));
        assert_eq!(port.recv().unwrap(), msg);
        assert_eq!(port.get_ref().output, vec![ACK]);
    }

    #[test]
    fn crc_error_is_an_event() {
        let msg = BusMessage::from_raw(-3, -4, 1).unwrap();
        let mut wire = frame(&msg);
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        let mut port = SerialPort::new(Line::new(wire));
        assert_eq!(
            port.next_event().unwrap(),
            SerialEvent::Error(FrameError::Crc)
        );
        assert!(port.get_ref().output.is_empty());
    }

    #[test]
    fn recv_skips_non_messages() {
        let msg = BusMessage::from_raw(5, -3, 3).unwrap();
        let mut wire = vec![ACK];
        wire.extend(b"L1\n");
        wire.extend(frame(&msg));
        let mut port = SerialPort::new(Line::new(wire));
        assert_eq!(port.recv().unwrap(), msg);
    }

    #[test]
    fn send_writes_frame() {
        let msg = BusMessage::from_raw(5, -3, 3).unwrap();
        let mut port = SerialPort::new(Line::new(Vec::new()));
        port.send(&msg).unwrap();
        port.send_ack().unwrap();
        let mut expected = frame(&msg);
        expected.push(ACK);
        assert_eq!(port.into_inner().output, expected);
    }

    #[cfg(unix)]
    #[test]
    fn stream_timeouts_tick_the_framer() {
        use std::time::Duration;

        let (a, mut b) = BusStream::pair().unwrap();
        let config = FramerConfig {
            tick: Duration::from_millis(5),
            ..FramerConfig::default()
        };
        let mut port = SerialPort::open(a, config).unwrap();

        let msg = BusMessage::from_raw(5, -3, 3).unwrap();
        let partial = frame(&msg);
        b.write_all(&partial[..3]).unwrap();

        assert_eq!(
            port.next_event().unwrap(),
            SerialEvent::Error(FrameError::Lost)
        );
        b.write_all(&partial).unwrap();
        assert_eq!(port.next_event().unwrap(), SerialEvent::Message(msg));
    }
}

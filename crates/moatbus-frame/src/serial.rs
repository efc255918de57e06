use std::time::{Duration, Instant};

use bytes::BytesMut;
use moatbus_message::{BusMessage, MessageAssembler, MessageError};
use tracing::{debug, info, trace, warn};

use crate::codec::{encode_frame, marker_prio, FramerConfig, ACK};
use crate::crc::Crc16;
use crate::error::{FrameError, Result};

/// Console lines longer than this are flushed without waiting for a newline.
pub const MAX_CONSOLE_LINE: usize = 256;

/// Host side of a [`SerialFramer`].
///
/// The framer never does I/O itself; everything it wants to happen goes
/// through these callbacks.
pub trait FrameSink {
    /// A frame was discarded.
    fn report_error(&mut self, err: FrameError);

    /// Start or stop calling [`SerialFramer::timeout`] periodically.
    fn set_timeout(&mut self, enable: bool);

    /// A complete, checksummed message arrived.
    fn process(&mut self, msg: BusMessage);

    /// The peer acknowledged our last frame.
    fn process_ack(&mut self);

    /// Bytes to write to the line.
    fn data_out(&mut self, data: &[u8]);

    /// Whether `process` may be called now. While this returns `false`
    /// a completed message is held; see [`SerialFramer::recv`].
    fn accepting(&self) -> bool {
        true
    }

    /// A line of console text arrived.
    fn console(&mut self, line: &str) {
        log_console(line);
    }
}

/// `L1`..`L3` are the spinner lines a node prints while idle.
pub fn is_heartbeat(line: &str) -> bool {
    matches!(line, "L1" | "L2" | "L3")
}

pub fn log_console(line: &str) {
    if is_heartbeat(line) {
        trace!(target: "moatbus::console", "{line}");
    } else {
        info!(target: "moatbus::console", "{line}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Len,
    Len2,
    Data,
    Crc1,
    Crc2,
    /// Completed message waiting for the consumer.
    Done,
    /// Inside a multi-byte UTF-8 sequence of console text.
    Utf8,
}

/// Counters kept by the framer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub frames: u64,
    pub acks: u64,
    pub crc_errors: u64,
    pub lost: u64,
    pub overflows: u64,
    pub spurious: u64,
}

/// Byte-at-a-time serial line state machine.
///
/// Binary frames and console text share the line: a priority marker byte
/// starts a frame, `0x06` is an acknowledgement, everything else is text.
#[derive(Debug)]
pub struct SerialFramer {
    state: State,
    prio: u8,
    remaining: usize,
    assembler: MessageAssembler,
    /// First header error of the current frame.
    header_err: Option<MessageError>,
    crc: Crc16,
    crc_in: u16,
    idle: u8,
    max_idle: u8,
    utf8_left: u8,
    console: Vec<u8>,
    console_since: Option<Instant>,
    console_flush: Duration,
    held: Option<BusMessage>,
    stats: FramerStats,
}

impl Default for SerialFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialFramer {
    pub fn new() -> Self {
        Self::with_config(&FramerConfig::default())
    }

    pub fn with_config(config: &FramerConfig) -> Self {
        Self {
            state: State::Idle,
            prio: 0,
            remaining: 0,
            assembler: MessageAssembler::new(),
            header_err: None,
            crc: Crc16::new(),
            crc_in: 0,
            idle: 0,
            max_idle: config.max_idle_ticks,
            utf8_left: 0,
            console: Vec::new(),
            console_since: None,
            console_flush: config.console_flush,
            held: None,
            stats: FramerStats::default(),
        }
    }

    /// Feed one received byte.
    pub fn char_in(&mut self, byte: u8, sink: &mut impl FrameSink) {
        self.idle = 0;
        match self.state {
            State::Idle => self.idle_byte(byte, sink),
            State::Utf8 => {
                if byte & 0xC0 == 0x80 {
                    self.push_console(byte, sink);
                    self.utf8_left -= 1;
                    if self.utf8_left == 0 {
                        self.state = State::Idle;
                    }
                } else {
                    self.state = State::Idle;
                    self.idle_byte(byte, sink);
                }
            }
            State::Len => {
                if byte & 0x80 != 0 {
                    self.remaining = usize::from(byte & 0x7F) << 8;
                    self.state = State::Len2;
                } else {
                    self.remaining = usize::from(byte);
                    self.start_data(sink);
                }
            }
            State::Len2 => {
                self.remaining |= usize::from(byte);
                self.start_data(sink);
            }
            State::Data => {
                if let Err(err) = self.assembler.add_byte(byte) {
                    self.header_err.get_or_insert(err);
                }
                self.crc.update(byte);
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.crc_in = self.crc.finish();
                    self.state = State::Crc1;
                }
            }
            State::Crc1 => {
                self.crc_in ^= u16::from(byte) << 8;
                self.state = State::Crc2;
            }
            State::Crc2 => {
                self.crc_in ^= u16::from(byte);
                sink.set_timeout(false);
                self.end_frame(sink);
            }
            State::Done => {
                self.stats.overflows += 1;
                warn!(byte, "byte received while a frame is waiting; dropped");
                sink.report_error(FrameError::Overflow);
            }
        }
    }

    fn idle_byte(&mut self, byte: u8, sink: &mut impl FrameSink) {
        if byte == ACK {
            self.stats.acks += 1;
            sink.process_ack();
        } else if let Some(prio) = marker_prio(byte) {
            self.prio = prio;
            self.crc.reset();
            self.assembler.reset();
            self.header_err = None;
            self.state = State::Len;
            sink.set_timeout(true);
        } else if byte & 0xC0 == 0xC0 {
            let lead_bits = 8 - (byte ^ 0xFF).leading_zeros() as u8;
            self.utf8_left = 7 - lead_bits;
            self.state = State::Utf8;
            self.push_console(byte, sink);
        } else if byte == b'\r' || byte == b'\n' {
            self.flush_console(sink);
        } else {
            self.push_console(byte, sink);
        }
    }

    fn start_data(&mut self, sink: &mut impl FrameSink) {
        if self.remaining == 0 {
            self.stats.spurious += 1;
            debug!("zero-length frame");
            sink.report_error(FrameError::Spurious);
            sink.set_timeout(false);
            self.state = State::Idle;
        } else {
            self.state = State::Data;
        }
    }

    fn end_frame(&mut self, sink: &mut impl FrameSink) {
        self.state = State::Idle;
        if self.crc_in != 0 {
            self.stats.crc_errors += 1;
            warn!(residue = self.crc_in, "frame CRC mismatch");
            sink.report_error(FrameError::Crc);
            return;
        }
        let assembler = std::mem::take(&mut self.assembler);
        let decoded = match self.header_err.take() {
            Some(err) => Err(err),
            None => assembler
                .finish()
                .and_then(|msg| msg.with_prio(self.prio)),
        };
        let msg = match decoded {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%err, "frame without usable header");
                sink.report_error(FrameError::Malformed);
                return;
            }
        };
        self.stats.frames += 1;
        debug!(%msg, prio = self.prio, "frame received");

        if sink.accepting() {
            sink.process(msg);
        } else {
            self.held = Some(msg);
            self.state = State::Done;
        }
        self.send_ack(sink);
    }

    /// Take a held message, resuming reception.
    pub fn recv(&mut self) -> Option<BusMessage> {
        if self.state != State::Done {
            return None;
        }
        self.state = State::Idle;
        self.held.take()
    }

    /// Periodic tick; see [`FrameSink::set_timeout`].
    pub fn timeout(&mut self, sink: &mut impl FrameSink) {
        self.timeout_at(Instant::now(), sink);
    }

    pub fn timeout_at(&mut self, now: Instant, sink: &mut impl FrameSink) {
        match self.state {
            State::Idle => {
                self.idle = 0;
                let stale = self
                    .console_since
                    .map(|t| now.saturating_duration_since(t) > self.console_flush)
                    .unwrap_or(false);
                if stale {
                    self.flush_console(sink);
                }
            }
            State::Done => {}
            _ => {
                self.idle += 1;
                if self.idle <= self.max_idle {
                    return;
                }
                self.idle = 0;
                if self.state == State::Utf8 {
                    trace!("abandoning incomplete UTF-8 sequence");
                } else {
                    self.stats.lost += 1;
                    warn!(state = ?self.state, "serial line idle mid-frame; frame lost");
                    sink.report_error(FrameError::Lost);
                }
                self.state = State::Idle;
                self.assembler.reset();
                sink.set_timeout(false);
            }
        }
    }

    /// Frame a message and hand it to [`FrameSink::data_out`].
    pub fn send(&mut self, msg: &BusMessage, sink: &mut impl FrameSink) -> Result<()> {
        let mut buf = BytesMut::new();
        encode_frame(msg, &mut buf)?;
        trace!(%msg, len = buf.len(), "frame out");
        sink.data_out(&buf);
        Ok(())
    }

    pub fn send_ack(&mut self, sink: &mut impl FrameSink) {
        sink.data_out(&[ACK]);
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// Whether a frame is being received.
    pub fn in_frame(&self) -> bool {
        !matches!(self.state, State::Idle | State::Utf8)
    }

    fn push_console(&mut self, byte: u8, sink: &mut impl FrameSink) {
        if self.console.is_empty() {
            self.console_since = Some(Instant::now());
        }
        self.console.push(byte);
        if self.console.len() >= MAX_CONSOLE_LINE && self.state != State::Utf8 {
            self.flush_console(sink);
        }
    }

    fn flush_console(&mut self, sink: &mut impl FrameSink) {
        self.console_since = None;
        if self.console.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.console).into_owned();
        self.console.clear();
        sink.console(&line);
    }
}

use std::collections::VecDeque;

use bytes::Bytes;
use moatbus_message::BusMessage;

use crate::error::FrameError;
use crate::serial::FrameSink;

/// Something the framer reported while consuming input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    Message(BusMessage),
    Ack,
    Console(String),
    Error(FrameError),
    /// Bytes the framer wants written back (acknowledgements).
    Output(Bytes),
}

/// A [`FrameSink`] that queues everything as [`SerialEvent`]s.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<SerialEvent>,
    timer: bool,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next event. Pending output comes first, so an acknowledgement
    /// reaches the line before the message it acknowledges is handled.
    pub fn pop(&mut self) -> Option<SerialEvent> {
        let output = self
            .events
            .iter()
            .position(|e| matches!(e, SerialEvent::Output(_)));
        match output {
            Some(i) => self.events.remove(i),
            None => self.events.pop_front(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether the framer currently wants to be ticked.
    pub fn timer_enabled(&self) -> bool {
        self.timer
    }
}

impl FrameSink for EventQueue {
    fn report_error(&mut self, err: FrameError) {
        self.events.push_back(SerialEvent::Error(err));
    }

    fn set_timeout(&mut self, enable: bool) {
        self.timer = enable;
    }

    fn process(&mut self, msg: BusMessage) {
        self.events.push_back(SerialEvent::Message(msg));
    }

    fn process_ack(&mut self) {
        self.events.push_back(SerialEvent::Ack);
    }

    fn data_out(&mut self, data: &[u8]) {
        self.events
            .push_back(SerialEvent::Output(Bytes::copy_from_slice(data)));
    }

    fn console(&mut self, line: &str) {
        self.events.push_back(SerialEvent::Console(line.to_string()));
    }
}

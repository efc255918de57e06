use bytes::{Buf, BufMut, Bytes, BytesMut};
use moatbus_message::BusMessage;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, FramerConfig};
use crate::error::SerialError;
use crate::event::{EventQueue, SerialEvent};
use crate::serial::SerialFramer;

/// What the async driver writes to the line.
#[derive(Debug, Clone)]
pub enum Outgoing {
    Message(BusMessage),
    /// Pre-encoded bytes, e.g. an acknowledgement.
    Raw(Bytes),
}

/// Tokio codec around a [`SerialFramer`].
///
/// Decoding yields [`SerialEvent`]s; `SerialEvent::Output` must be written
/// back as [`Outgoing::Raw`]. An acknowledgement is yielded ahead of the
/// message it acknowledges.
#[derive(Debug)]
pub struct SerialCodec {
    framer: SerialFramer,
    events: EventQueue,
}

impl Default for SerialCodec {
    fn default() -> Self {
        Self::new(&FramerConfig::default())
    }
}

impl SerialCodec {
    pub fn new(config: &FramerConfig) -> Self {
        Self {
            framer: SerialFramer::with_config(config),
            events: EventQueue::new(),
        }
    }

    /// Tick the framer; collect the results with [`SerialCodec::pop_event`].
    pub fn tick(&mut self) {
        self.framer.timeout(&mut self.events);
    }

    pub fn pop_event(&mut self) -> Option<SerialEvent> {
        self.events.pop()
    }

    pub fn framer(&self) -> &SerialFramer {
        &self.framer
    }
}

impl Decoder for SerialCodec {
    type Item = SerialEvent;
    type Error = SerialError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if let Some(event) = self.events.pop() {
                return Ok(Some(event));
            }
            if !src.has_remaining() {
                return Ok(None);
            }
            let byte = src.get_u8();
            self.framer.char_in(byte, &mut self.events);
        }
    }
}

impl Encoder<Outgoing> for SerialCodec {
    type Error = SerialError;

    fn encode(&mut self, item: Outgoing, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Outgoing::Message(msg) => encode_frame(&msg, dst),
            Outgoing::Raw(bytes) => {
                dst.put_slice(&bytes);
                Ok(())
            }
        }
    }
}

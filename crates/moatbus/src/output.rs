use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use moatbus_frame::{FrameError, SerialEvent};
use moatbus_message::BusMessage;
use moatbus_server::StoreEvent;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    /// Message payload bytes only.
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EventOutput<'a> {
    Message {
        src: String,
        dst: String,
        code: u8,
        kind: String,
        prio: u8,
        data: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<&'a str>,
        timestamp: String,
    },
    Console {
        line: &'a str,
        timestamp: String,
    },
    Ack {
        timestamp: String,
    },
    Error {
        error: String,
        code: u8,
        timestamp: String,
    },
    Client {
        change: &'static str,
        serial: String,
        client_id: u8,
        timestamp: String,
    },
}

/// Print one event read off the line. Raw output only shows messages.
pub fn print_event(event: &SerialEvent, format: OutputFormat) {
    match event {
        SerialEvent::Message(msg) => print_message(msg, format),
        SerialEvent::Console(line) => print_console(line, format),
        SerialEvent::Ack => print_ack(format),
        SerialEvent::Error(err) => print_frame_error(*err, format),
        SerialEvent::Output(_) => {}
    }
}

pub fn print_message(msg: &BusMessage, format: OutputFormat) {
    match format {
        OutputFormat::Json => emit_json(&EventOutput::Message {
            src: msg.src().to_string(),
            dst: msg.dst().to_string(),
            code: msg.code(),
            kind: msg.kind().to_string(),
            prio: msg.prio(),
            data: hex::encode(msg.data()),
            text: payload_text(msg.data()),
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SRC", "DST", "CODE", "KIND", "PRIO", "DATA"])
                .add_row(vec![
                    msg.src().to_string(),
                    msg.dst().to_string(),
                    msg.code().to_string(),
                    msg.kind().to_string(),
                    msg.prio().to_string(),
                    payload_preview(msg.data()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{msg}"),
        OutputFormat::Raw => print_raw(msg.data()),
    }
}

fn print_console(line: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => emit_json(&EventOutput::Console {
            line,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table | OutputFormat::Pretty => println!("# {line}"),
        OutputFormat::Raw => {}
    }
}

fn print_ack(format: OutputFormat) {
    match format {
        OutputFormat::Json => emit_json(&EventOutput::Ack {
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table | OutputFormat::Pretty => println!("ACK"),
        OutputFormat::Raw => {}
    }
}

fn print_frame_error(err: FrameError, format: OutputFormat) {
    match format {
        OutputFormat::Json => emit_json(&EventOutput::Error {
            error: err.to_string(),
            code: err.code(),
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table | OutputFormat::Pretty => println!("! {err} (E{})", err.code()),
        OutputFormat::Raw => {}
    }
}

/// Print a registry change seen by the bus server.
pub fn print_store_event(event: &StoreEvent, format: OutputFormat) {
    let (change, info) = match event {
        StoreEvent::New(info) => ("new", info),
        StoreEvent::Old(info) => ("old", info),
        StoreEvent::Drop(info) => ("drop", info),
    };
    match format {
        OutputFormat::Json => emit_json(&EventOutput::Client {
            change,
            serial: info.serial.to_string(),
            client_id: info.client_id,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["CHANGE", "SERIAL", "CLIENT"])
                .add_row(vec![
                    change.to_string(),
                    info.serial.to_string(),
                    info.client_id.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("client {change}: {} @ {}", info.serial, info.client_id),
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn emit_json(event: &EventOutput<'_>) {
    println!(
        "{}",
        serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
    );
}

fn payload_text(payload: &[u8]) -> Option<&str> {
    std::str::from_utf8(payload)
        .ok()
        .filter(|text| !text.is_empty() && !text.chars().any(char::is_control))
}

fn payload_preview(payload: &[u8]) -> String {
    match payload_text(payload) {
        Some(text) => text.to_string(),
        None => hex::encode(payload),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

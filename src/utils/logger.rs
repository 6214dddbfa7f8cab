use chrono::Utc;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

use crate::utils::time::timestamp;

/// Repeats of one line are folded into a summary every this many times.
const FOLD_EVERY: u32 = 10;

/// Gateway chatter from serenity that floods the log at debug level.
const GATEWAY_NOISE: [(&str, &str); 3] = [
    ("serenity::gateway", "do_heartbeat"),
    ("serenity::gateway", "recv_event"),
    ("serenity::gateway", "recv;"),
];

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to set logger: {0}")]
    SetLogger(#[from] log::SetLoggerError),
    #[error("Unknown log level: {0}")]
    Level(String),
}

pub fn parse_level(level: &str) -> Result<LevelFilter, LoggerError> {
    LevelFilter::from_str(level.trim()).map_err(|_| LoggerError::Level(level.to_string()))
}

/// Split a leading `[Area.name]` tag off a message. Untagged records are
/// labelled with the last segment of their target.
fn split_tag<'a>(target: &'a str, message: &'a str) -> (&'a str, &'a str) {
    if let Some(rest) = message.strip_prefix('[') {
        if let Some((tag, body)) = rest.split_once(']') {
            if !tag.is_empty() && !tag.contains(' ') {
                return (tag, body.trim_start());
            }
        }
    }
    (target.rsplit("::").next().unwrap_or(target), message)
}

fn format_entry(level: Level, target: &str, message: &str) -> String {
    let (tag, body) = split_tag(target, message);
    format!("{:<5} {:<18} {}", level, tag, body)
}

fn is_gateway_noise(target: &str, message: &str) -> bool {
    GATEWAY_NOISE
        .iter()
        .any(|(prefix, needle)| target.starts_with(prefix) && message.contains(needle))
}

#[derive(Debug)]
struct Sink {
    file: Option<File>,
    last_entry: Option<String>,
    repeats: u32,
}

impl Sink {
    fn write(&mut self, level: Level, entry: &str) {
        let line = format!("{} {}", timestamp(Utc::now()), entry);
        if level <= Level::Warn {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = writeln!(file, "{}", line) {
                eprintln!("Failed to write log entry: {}", e);
            }
        }
    }

    fn fold_repeats(&mut self) {
        if self.repeats > 0 {
            let summary = format!("(previous message repeated {} times)", self.repeats);
            self.repeats = 0;
            self.write(Level::Info, &summary);
        }
    }

    fn push(&mut self, level: Level, entry: String) {
        if self.last_entry.as_deref() == Some(entry.as_str()) {
            self.repeats = self.repeats.saturating_add(1);
            if self.repeats >= FOLD_EVERY {
                self.fold_repeats();
            }
            return;
        }
        self.fold_repeats();
        self.write(level, &entry);
        self.last_entry = Some(entry);
    }
}

/// Console plus optional file logger. Debug and trace lines are only kept
/// for this crate's own targets.
pub struct BotLogger {
    level: LevelFilter,
    sink: Mutex<Sink>,
}

impl BotLogger {
    pub fn new(log_file: Option<&str>, level: LevelFilter) -> Result<BotLogger, std::io::Error> {
        let file = match log_file {
            Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
            None => None,
        };
        Ok(BotLogger {
            level,
            sink: Mutex::new(Sink {
                file,
                last_entry: None,
                repeats: 0,
            }),
        })
    }

    pub fn init(log_file: Option<&str>, level: &str) -> Result<(), LoggerError> {
        let level = parse_level(level)?;
        log::set_boxed_logger(Box::new(BotLogger::new(log_file, level)?))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for BotLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
            && (metadata.level() <= Level::Info || metadata.target().starts_with(env!("CARGO_PKG_NAME")))
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        if is_gateway_noise(record.target(), &message) {
            return;
        }

        let entry = format_entry(record.level(), record.target(), &message);
        match self.sink.lock() {
            Ok(mut sink) => sink.push(record.level(), entry),
            Err(_) => eprintln!("{}", entry),
        }
    }

    fn flush(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            sink.fold_repeats();
            if let Some(file) = sink.file.as_mut() {
                if let Err(e) = file.flush() {
                    eprintln!("Failed to flush log file: {}", e);
                }
            }
        }
    }
}

use std::env;
use std::io::{self, IsTerminal};
use std::sync::{Mutex, OnceLock};

/// Progress and diagnostics sink handed to every packaging stage.
pub trait Reporter: Send + Sync {
    fn step(&self, message: &str);
    fn verbose(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

fn use_color() -> bool {
    static USE_COLOR: OnceLock<bool> = OnceLock::new();
    *USE_COLOR.get_or_init(|| env::var_os("NO_COLOR").is_none() && io::stderr().is_terminal())
}

fn paint(code: &str, text: &str) -> String {
    if use_color() {
        format!("\u{1b}[{}m{}\u{1b}[0m", code, text)
    } else {
        text.to_string()
    }
}

fn dim(text: &str) -> String {
    paint("2", text)
}

fn yellow(text: &str) -> String {
    paint("33", text)
}

fn red(text: &str) -> String {
    paint("31", text)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter {
    pub verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Reporter for ConsoleReporter {
    fn step(&self, message: &str) {
        tracing::info!(target: "fnpack", "{}", message);
        eprintln!("{}", dim(message));
    }

    fn verbose(&self, message: &str) {
        tracing::debug!(target: "fnpack", "{}", message);
        if self.verbose {
            eprintln!("{} {}", dim("verbose"), dim(message));
        }
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "fnpack", "{}", message);
        eprintln!("{} {}", yellow("warn"), message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "fnpack", "{}", message);
        eprintln!("{} {}", red("error"), message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Step(String),
    Verbose(String),
    Warn(String),
    Error(String),
}

/// Keeps every event in memory; hosts use it to surface warnings after a run.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<Event>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Warn(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Reporter for RecordingReporter {
    fn step(&self, message: &str) {
        self.push(Event::Step(message.to_string()));
    }

    fn verbose(&self, message: &str) {
        self.push(Event::Verbose(message.to_string()));
    }

    fn warn(&self, message: &str) {
        self.push(Event::Warn(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.push(Event::Error(message.to_string()));
    }
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut value = bytes as f64;
    let mut unit = 0;

    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

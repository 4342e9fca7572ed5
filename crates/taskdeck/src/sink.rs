//! The notification surface between task execution and the presentation
//! layer. Everything a task produces (output, prompts, errors) reaches the
//! operator through a `Sink`.

/// Severity of a notification. `Raw` means "render verbatim": no timestamp,
/// no level tag. Kernel output is forwarded raw; bridge diagnostics carry a
/// level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Raw,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Raw => "RAW",
        })
    }
}

/// The only channel by which execution progress reaches the presentation
/// layer.
pub trait Sink: Send + Sync {
    fn notify(&self, content: &str, level: Level);
}

/// Writes decorated lines to stdout; raw content passes through untouched.
pub struct ConsoleSink;

impl Sink for ConsoleSink {
    fn notify(&self, content: &str, level: Level) {
        match level {
            Level::Raw => println!("{content}"),
            _ => {
                let ts = chrono::Local::now().format("%H:%M:%S%.3f");
                println!("{ts} {level:>7} {content}");
            }
        }
    }
}

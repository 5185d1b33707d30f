use colored::*;
use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Receives one line of human-readable progress text per call.
///
/// The cloning engine reports through this and nothing else. Any
/// `Fn(&str) + Send + Sync` closure is a sink, which is how front-ends hook
/// progress into their own widgets.
#[cfg_attr(test, mockall::automock)]
pub trait LogSink: Send + Sync {
    fn log(&self, line: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, line: &str) {
        self(line)
    }
}

/// Default sink: writes each line to stdout, coloured by its status marker.
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    term: Term,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self { term: Term::stdout() }
    }

    /// Writes to stderr, keeping stdout free for machine-readable output.
    pub fn stderr() -> Self {
        Self { term: Term::stderr() }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for ConsoleSink {
    fn log(&self, line: &str) {
        // Nowhere left to report a broken stdout.
        let _ = self.term.write_line(&paint(line));
    }
}

/// Sink for interactive terminals: lines scroll above a spinner that shows
/// the latest one.
pub struct ProgressSink {
    bar: ProgressBar,
}

impl ProgressSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for ProgressSink {
    fn log(&self, line: &str) {
        self.bar.println(paint(line));
        self.bar.set_message(line.to_string());
    }
}

fn paint(line: &str) -> String {
    if line.starts_with('❌') {
        line.red().to_string()
    } else if line.starts_with('⚠') {
        line.yellow().to_string()
    } else if line.starts_with('✅') {
        line.green().to_string()
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_is_a_sink() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let sink = move |line: &str| captured.lock().unwrap().push(line.to_string());

        sink.log("one");
        sink.log("two");

        assert_eq!(*lines.lock().unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn test_sink_behind_trait_object() {
        let mut mock = MockLogSink::new();
        mock.expect_log()
            .withf(|line| line.starts_with("📥 Fetching:"))
            .times(1)
            .return_const(());

        let sink: Box<dyn LogSink> = Box::new(mock);
        sink.log("📥 Fetching: https://example.com/");
    }

    #[test]
    fn test_paint_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(paint("❌ Failed"), "❌ Failed");
        assert_eq!(paint("plain"), "plain");
    }
}

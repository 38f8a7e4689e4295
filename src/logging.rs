//! Subscriber setup for the binaries.

use std::io::{self, IsTerminal, Write};
use std::sync::mpsc::Sender;

use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// Log to stderr, keeping stdout free for `STATUS` lines.
pub fn init_cli(verbose: bool, quiet: bool) {
    let level = match (verbose, quiet) {
        (true, _) => Level::DEBUG,
        (false, true) => Level::WARN,
        (false, false) => Level::INFO,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

/// Route log lines into a channel, for display inside the terminal UI.
pub fn init_channel(tx: Sender<String>, level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(ChannelMakeWriter { tx })
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .try_init();
}

#[derive(Clone)]
pub struct ChannelMakeWriter {
    tx: Sender<String>,
}

impl ChannelMakeWriter {
    pub fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }
}

impl<'a> MakeWriter<'a> for ChannelMakeWriter {
    type Writer = ChannelWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ChannelWriter {
            tx: self.tx.clone(),
            buf: Vec::new(),
        }
    }
}

/// Collects one formatted event and sends its lines when dropped.
pub struct ChannelWriter {
    tx: Sender<String>,
    buf: Vec<u8>,
}

impl Write for ChannelWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let _ = self.tx.send(line.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn writer_sends_one_message_per_line() {
        let (tx, rx) = mpsc::channel();
        let make = ChannelMakeWriter::new(tx);
        {
            let mut w = make.make_writer();
            w.write_all(b" INFO first\n").unwrap();
            w.write_all(b" WARN second\n\n").unwrap();
        }
        let lines: Vec<String> = rx.try_iter().collect();
        assert_eq!(lines, vec![" INFO first".to_string(), " WARN second".to_string()]);
    }
}

//! Child process management for the recorder, protocol and viewer.

use std::env;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A line from stdout or stderr.
    Output(String),
    Error(String),
    /// One of the output pipes reached end of file.
    Closed,
}

/// An event tagged with the label of the process that produced it.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub label: String,
    pub event: ProcessEvent,
}

/// A running child with piped stdio.
pub struct ProcessManager {
    label: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    event_rx: Option<Receiver<ProcessOutput>>,
}

fn spawn_output_reader<R: std::io::Read + Send + 'static>(reader: R, label: String, tx: Sender<ProcessOutput>) {
    thread::spawn(move || {
        let send = |event| tx.send(ProcessOutput {
            label: label.clone(),
            event,
        });
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(line) => {
                    if send(ProcessEvent::Output(line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = send(ProcessEvent::Error(format!("read error: {}", e)));
                    break;
                }
            }
        }
        let _ = send(ProcessEvent::Closed);
    });
}

impl ProcessManager {
    /// Spawn `program` with its own event channel, read with [`try_recv`](Self::try_recv).
    pub fn spawn(program: &Path, args: &[String], label: &str) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut manager = Self::spawn_into(program, args, label, tx)?;
        manager.event_rx = Some(rx);
        Ok(manager)
    }

    /// Spawn `program`, sending its output lines to a shared channel.
    pub fn spawn_into(program: &Path, args: &[String], label: &str, tx: Sender<ProcessOutput>) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {} ('{}')", label, program.display()))?;

        let stdout = child.stdout.take().context("stdout was not piped")?;
        let stderr = child.stderr.take().context("stderr was not piped")?;
        let stdin = child.stdin.take();

        spawn_output_reader(stdout, label.to_string(), tx.clone());
        spawn_output_reader(stderr, label.to_string(), tx);

        tracing::debug!("Started {} (pid {})", label, child.id());
        Ok(Self {
            label: label.to_string(),
            child: Some(child),
            stdin,
            event_rx: None,
        })
    }

    /// Send one command line to the child's stdin.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .with_context(|| format!("{} has no open stdin", self.label))?;
        writeln!(stdin, "{}", line).with_context(|| format!("Failed to send {} to {}", line, self.label))?;
        stdin.flush().ok();
        Ok(())
    }

    pub fn try_recv(&self) -> Option<ProcessOutput> {
        self.event_rx.as_ref()?.try_recv().ok()
    }

    /// `Some(exit code)` once the child has exited.
    pub fn check_exit(&mut self) -> Option<Option<i32>> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.child = None;
                Some(status.code())
            }
            Ok(None) => None,
            Err(_) => {
                self.child = None;
                Some(None)
            }
        }
    }

    /// Wait up to `timeout` for the child to exit.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Option<i32>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = self.check_exit() {
                return Some(code);
            }
            if self.child.is_none() || Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    pub fn kill(&mut self) {
        if let Some(ref mut child) = self.child {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!("Killed {}", self.label);
            self.child = None;
        }
        self.stdin = None;
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Locate a sibling binary: next to the current executable, then in
/// `target/release` and `target/debug`, then on `PATH`.
pub fn find_binary(binary_name: &str) -> PathBuf {
    let file_name = format!("{}{}", binary_name, env::consts::EXE_SUFFIX);

    if let Ok(exe_path) = env::current_exe()
        && let Some(exe_dir) = exe_path.parent()
    {
        let sibling = exe_dir.join(&file_name);
        if sibling.exists() {
            return sibling;
        }
    }

    for dir in ["target/release", "target/debug"] {
        let candidate = Path::new(dir).join(&file_name);
        if candidate.exists() {
            return candidate;
        }
    }

    PathBuf::from(binary_name)
}

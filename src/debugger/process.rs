//! Debuggee process launcher and console capture.

use log::{debug, warn};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Bounded line buffer shared between the two output readers and the
/// console drain. Oldest lines are evicted past capacity.
#[derive(Debug)]
pub struct ConsoleBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl ConsoleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().expect("console buffer poisoned");
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Return and clear the buffered lines.
    pub fn drain(&self) -> Vec<String> {
        self.lines
            .lock()
            .expect("console buffer poisoned")
            .drain(..)
            .collect()
    }
}

/// A spawned debuggee with its output readers. [`LaunchedProcess::stop`] is
/// idempotent: killing an exited child is not an error.
pub struct LaunchedProcess {
    child: Child,
    readers: Vec<JoinHandle<()>>,
}

impl LaunchedProcess {
    pub fn start(mut command: Command, console: Arc<ConsoleBuffer>) -> std::io::Result<Self> {
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        debug!(target: "debugger", "spawning debuggee: {command:?}");
        let mut child = command.spawn()?;

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader("debuggee-stdout", stdout, console.clone())?);
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader("debuggee-stderr", stderr, console)?);
        }

        Ok(Self { child, readers })
    }

    pub fn stop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(target: "debugger", "kill debuggee: {e}");
        }
        if let Err(e) = self.child.wait() {
            warn!(target: "debugger", "wait for debuggee: {e}");
        }
        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                warn!(target: "debugger", "output reader panicked");
            }
        }
    }
}

impl Drop for LaunchedProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    name: &str,
    source: R,
    console: Arc<ConsoleBuffer>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name.into()).spawn(move || {
        let reader = BufReader::new(source);
        for line in reader.lines() {
            match line {
                Ok(line) => console.push(line),
                // pipe closed with the child
                Err(_) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_evicts_oldest() {
        let buf = ConsoleBuffer::new(2);
        buf.push("a".into());
        buf.push("b".into());
        buf.push("c".into());
        assert_eq!(buf.drain(), vec!["b".to_string(), "c".to_string()]);
        assert!(buf.drain().is_empty());
    }
}

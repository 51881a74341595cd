//! Stdin/stdout transport.
//!
//! SSH servers run a file-transfer subsystem as a child process and talk to
//! it over its standard streams.
//!
//! # Important
//!
//! - **stdout**: protocol frames only
//! - **stderr**: logs, debug output
//! - **Never use `println!`** in a process serving on stdio

use tokio::io::{stdin, stdout, Stdin, Stdout};

use super::Transport;

/// The process's standard input and output as one transport.
#[derive(Debug)]
pub struct Stdio {
    stdin: Stdin,
    stdout: Stdout,
}

impl Stdio {
    /// Take the process's stdin and stdout.
    pub fn new() -> Self {
        Self {
            stdin: stdin(),
            stdout: stdout(),
        }
    }
}

impl Default for Stdio {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for Stdio {
    type Reader = Stdin;
    type Writer = Stdout;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        (self.stdin, self.stdout)
    }
}

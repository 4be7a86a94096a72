#![allow(dead_code)]

//! Shared test fixtures: a command runner that records invocations and
//! plays back scripted outputs instead of touching the system.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Output};
use std::sync::Mutex;

use async_trait::async_trait;
use zerowire::wg::CommandRunner;

/// One recorded command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    /// The full command line, space-joined, for sequence assertions
    pub fn command_line(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Records every invocation; `ip link show` and `wg show … dump` get
/// scripted results, everything else succeeds with empty output.
pub struct RecordingRunner {
    pub link_exists: bool,
    pub dump_output: String,
    pub calls: Mutex<Vec<Invocation>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        RecordingRunner {
            link_exists: false,
            dump_output: "priv\tpub\t1234\toff".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_existing_link() -> Self {
        RecordingRunner {
            link_exists: true,
            ..Self::new()
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(Invocation::command_line)
            .collect()
    }

    fn output(status_code: i32, stdout: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(status_code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<String>,
    ) -> std::io::Result<Output> {
        self.calls.lock().unwrap().push(Invocation {
            program: program.to_string(),
            args: args.to_vec(),
            stdin,
        });

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match (program, args.first()) {
            ("ip", Some(&"link")) if args.get(1) == Some(&"show") => {
                if self.link_exists {
                    Ok(Self::output(0, ""))
                } else {
                    Ok(Self::output(1, ""))
                }
            }
            ("wg", Some(&"show")) if args.last() == Some(&"dump") => {
                Ok(Self::output(0, &self.dump_output))
            }
            _ => Ok(Self::output(0, "")),
        }
    }
}

use crate::error::NetworkError;
use crate::fetch::Downloader;
use crate::process::{CommandOutput, ProcessRunner};
use std::cell::{Cell, RefCell};
use std::io;

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub argv: Vec<String>,
    pub capture_output: bool,
    pub streamed: bool,
}

#[derive(Default)]
pub struct MockRunner {
    calls: RefCell<Vec<RecordedCall>>,
    outputs: RefCell<Vec<CommandOutput>>,
    stream_lines: RefCell<Vec<String>>,
    terminated: RefCell<Vec<u32>>,
    spawn_failure: Cell<bool>,
}

impl MockRunner {
    pub fn push_output(&self, output: CommandOutput) {
        self.outputs.borrow_mut().push(output);
    }

    pub fn push_status(&self, status_code: i32) {
        self.push_output(CommandOutput {
            status_code,
            ..CommandOutput::default()
        });
    }

    pub fn set_stream_lines(&self, lines: &[&str]) {
        *self.stream_lines.borrow_mut() = strings(lines);
    }

    pub fn fail_next_spawn(&self) {
        self.spawn_failure.set(true);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.borrow().clone()
    }

    fn next_output(&self) -> Result<CommandOutput, io::Error> {
        if self.spawn_failure.replace(false) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "not found"));
        }
        let mut queued = self.outputs.borrow_mut();
        if queued.is_empty() {
            return Ok(CommandOutput::default());
        }
        Ok(queued.remove(0))
    }
}

impl ProcessRunner for MockRunner {
    fn run(&self, argv: &[String], capture_output: bool) -> Result<CommandOutput, io::Error> {
        self.calls.borrow_mut().push(RecordedCall {
            argv: argv.to_vec(),
            capture_output,
            streamed: false,
        });
        self.next_output()
    }

    fn stream(
        &self,
        argv: &[String],
        on_line: &mut dyn FnMut(&str) -> io::Result<()>,
    ) -> Result<i32, io::Error> {
        self.calls.borrow_mut().push(RecordedCall {
            argv: argv.to_vec(),
            capture_output: false,
            streamed: true,
        });
        let output = self.next_output()?;
        for line in self.stream_lines.borrow().iter() {
            on_line(line)?;
        }
        Ok(output.status_code)
    }

    fn terminate(&self, pid: u32) -> Result<(), io::Error> {
        self.terminated.borrow_mut().push(pid);
        Ok(())
    }
}

/// An ELF header followed by filler.
pub const NATIVE_BUILD: &[u8] = b"\x7fELF\x02\x01\x01\0new build";

pub const FAKE_BASE_URL: &str = "https://fake.invalid/hassctl";

pub struct FakeDownloader {
    body: Option<Vec<u8>>,
    status: u16,
    requests: RefCell<Vec<String>>,
}

impl FakeDownloader {
    pub fn serving(body: &[u8]) -> Self {
        Self {
            body: Some(body.to_vec()),
            status: 200,
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            body: None,
            status,
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl Downloader for FakeDownloader {
    fn base_url(&self) -> &str {
        FAKE_BASE_URL
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, NetworkError> {
        self.requests.borrow_mut().push(url.to_string());
        match &self.body {
            Some(body) => Ok(body.clone()),
            None => Err(NetworkError::Status {
                url: url.to_string(),
                status: self.status,
            }),
        }
    }
}

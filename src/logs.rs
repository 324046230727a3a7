use crate::config::Configuration;
use crate::error::HassctlError;
use crate::process::ProcessRunner;
use regex::Regex;
use std::io::{self, Write};
use std::sync::OnceLock;

const RECORD_SEPARATOR: &str = "--";
const ERROR_SIGNALS: &str = r"(?i)error|errno|warning|exception|failure|failed|warn|except|fail";
const FALSE_POSITIVES: &str = r"Current job from";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Raw,
    Errors,
}

/// Keeps journal separators and lines that look like errors or warnings.
pub struct LogFilter {
    signals: &'static Regex,
    false_positives: &'static Regex,
}

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static log filter pattern"))
}

impl LogFilter {
    pub fn errors() -> Self {
        static SIGNALS: OnceLock<Regex> = OnceLock::new();
        static FALSE_POSITIVE: OnceLock<Regex> = OnceLock::new();
        Self {
            signals: compiled(&SIGNALS, ERROR_SIGNALS),
            false_positives: compiled(&FALSE_POSITIVE, FALSE_POSITIVES),
        }
    }

    pub fn retains(&self, line: &str) -> bool {
        if line.starts_with(RECORD_SEPARATOR) {
            return true;
        }
        self.signals.is_match(line) && !self.false_positives.is_match(line)
    }
}

pub struct LogViewer<'a> {
    service_pattern: &'a str,
}

impl<'a> LogViewer<'a> {
    pub fn new(config: &'a Configuration) -> Self {
        Self {
            service_pattern: &config.service_pattern,
        }
    }

    pub fn journal_command(&self, query_args: &[String]) -> Vec<String> {
        let mut argv = vec![
            "journalctl".to_string(),
            "-f".to_string(),
            "-o".to_string(),
            "cat".to_string(),
            "-u".to_string(),
            self.service_pattern.to_string(),
        ];
        argv.extend(query_args.iter().cloned());
        argv
    }

    pub fn stream<R: ProcessRunner>(
        &self,
        runner: &R,
        mode: LogMode,
        query_args: &[String],
        out: &mut dyn Write,
    ) -> Result<i32, HassctlError> {
        let argv = self.journal_command(query_args);
        let spawn_error =
            |err: io::Error| HassctlError::Process(format!("failed to run journalctl: {err}"));
        match mode {
            LogMode::Raw => Ok(runner.run(&argv, false).map_err(spawn_error)?.status_code),
            LogMode::Errors => {
                let filter = LogFilter::errors();
                let mut forward = |line: &str| -> io::Result<()> {
                    if filter.retains(line) {
                        writeln!(out, "{line}")?;
                        out.flush()?;
                    }
                    Ok(())
                };
                match runner.stream(&argv, &mut forward) {
                    Ok(status) => Ok(status),
                    // Reader went away (e.g. piped into head); not a failure.
                    Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(0),
                    Err(err) => Err(spawn_error(err)),
                }
            }
        }
    }
}

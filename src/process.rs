use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::{self, BufRead, BufReader};
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

/// Every external tool (systemctl, journalctl, sudo, pip, ps) goes through this.
pub trait ProcessRunner {
    fn run(&self, argv: &[String], capture_output: bool) -> Result<CommandOutput, io::Error>;

    fn stream(
        &self,
        argv: &[String],
        on_line: &mut dyn FnMut(&str) -> io::Result<()>,
    ) -> Result<i32, io::Error>;

    fn terminate(&self, pid: u32) -> Result<(), io::Error>;
}

pub struct SystemRunner;

fn split_argv(argv: &[String]) -> Result<(&String, &[String]), io::Error> {
    argv.split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(if status.success() { 0 } else { 1 })
}

impl ProcessRunner for SystemRunner {
    fn run(&self, argv: &[String], capture_output: bool) -> Result<CommandOutput, io::Error> {
        let (program, args) = split_argv(argv)?;
        debug!(command = %render_command(argv), capture_output, "running");
        let mut cmd = Command::new(program);
        cmd.args(args);
        if capture_output {
            let output = cmd.output()?;
            Ok(CommandOutput {
                status_code: exit_code(output.status),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        } else {
            let status = cmd.status()?;
            Ok(CommandOutput {
                status_code: exit_code(status),
                ..CommandOutput::default()
            })
        }
    }

    fn stream(
        &self,
        argv: &[String],
        on_line: &mut dyn FnMut(&str) -> io::Result<()>,
    ) -> Result<i32, io::Error> {
        let (program, args) = split_argv(argv)?;
        debug!(command = %render_command(argv), "streaming");
        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "child stdout missing"))?;
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            if let Err(err) = on_line(line.trim_end_matches(['\n', '\r'])) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        }
        Ok(exit_code(child.wait()?))
    }

    fn terminate(&self, pid: u32) -> Result<(), io::Error> {
        let raw = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        debug!(pid, "sending SIGKILL");
        kill(Pid::from_raw(raw), Signal::SIGKILL).map_err(io::Error::from)
    }
}

pub fn render_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{}'", arg.replace('\'', "'\"'\"'"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn render_command_quotes_whitespace() {
        let rendered = render_command(&argv(&["journalctl", "-u", "home assistant"]));
        assert_eq!(rendered, "journalctl -u 'home assistant'");
    }

    #[test]
    fn run_rejects_empty_argv() {
        let err = SystemRunner.run(&[], false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[cfg(unix)]
    #[test]
    fn run_captures_status_and_stdout() {
        let output = SystemRunner
            .run(&argv(&["sh", "-c", "echo hello; exit 3"]), true)
            .unwrap();
        assert_eq!(output.status_code, 3);
        assert_eq!(String::from_utf8_lossy(&output.stdout), "hello\n");
    }

    #[cfg(unix)]
    #[test]
    fn stream_delivers_lines_without_terminators() {
        let mut seen = Vec::new();
        let status = SystemRunner
            .stream(&argv(&["printf", "a\\nb\\n"]), &mut |line| {
                seen.push(line.to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(status, 0);
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }
}

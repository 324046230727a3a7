use crate::config::Configuration;
use crate::error::{HassctlError, UsageError};
use crate::fetch::Downloader;
use crate::identity::IdentityDelegate;
use crate::logs::{LogMode, LogViewer};
use crate::process::{render_command, ProcessRunner};
use crate::update::SelfUpdater;
use regex::Regex;
use std::io::{self, Write};
use tracing::{debug, warn};

pub const USAGE: &str = "\
Usage: hassctl <command> [args...]

Commands:
  help                 show this message
  log [args]           follow the Home Assistant journal
  error [args]         follow the journal, showing only errors and warnings
  config [args]        check the Home Assistant configuration
  update-hassctl [branch]
                       replace this hassctl with the build on <branch>
  update-hass [version]
                       upgrade Home Assistant (optionally to <version>)
  backup               not yet implemented
  service              not yet implemented
  kill                 SIGKILL the service through systemd
  kill-alt             SIGKILL Home Assistant processes found in the process table

systemctl commands (applied to HASS_SERVICE):
  start stop restart reload reload-or-restart status show cat
  enable disable is-active is-enabled is-failed
  list-units list-sockets list-timers
";

const HASS_PACKAGE: &str = "homeassistant";
const SUPERVISOR: &str = "systemctl";
const KILL_ALT_PATTERN: &str = r"python.*hass";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorVerb {
    Start,
    Stop,
    Restart,
    Status,
    Enable,
    Disable,
    Show,
    Cat,
    IsActive,
    IsEnabled,
    IsFailed,
    ListUnits,
    ListSockets,
    ListTimers,
    Reload,
    ReloadOrRestart,
}

impl SupervisorVerb {
    pub const ALL: [SupervisorVerb; 16] = [
        SupervisorVerb::Start,
        SupervisorVerb::Stop,
        SupervisorVerb::Restart,
        SupervisorVerb::Status,
        SupervisorVerb::Enable,
        SupervisorVerb::Disable,
        SupervisorVerb::Show,
        SupervisorVerb::Cat,
        SupervisorVerb::IsActive,
        SupervisorVerb::IsEnabled,
        SupervisorVerb::IsFailed,
        SupervisorVerb::ListUnits,
        SupervisorVerb::ListSockets,
        SupervisorVerb::ListTimers,
        SupervisorVerb::Reload,
        SupervisorVerb::ReloadOrRestart,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SupervisorVerb::Start => "start",
            SupervisorVerb::Stop => "stop",
            SupervisorVerb::Restart => "restart",
            SupervisorVerb::Status => "status",
            SupervisorVerb::Enable => "enable",
            SupervisorVerb::Disable => "disable",
            SupervisorVerb::Show => "show",
            SupervisorVerb::Cat => "cat",
            SupervisorVerb::IsActive => "is-active",
            SupervisorVerb::IsEnabled => "is-enabled",
            SupervisorVerb::IsFailed => "is-failed",
            SupervisorVerb::ListUnits => "list-units",
            SupervisorVerb::ListSockets => "list-sockets",
            SupervisorVerb::ListTimers => "list-timers",
            SupervisorVerb::Reload => "reload",
            SupervisorVerb::ReloadOrRestart => "reload-or-restart",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|verb| verb.as_str() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stub {
    Backup,
    Service,
}

impl Stub {
    fn name(self) -> &'static str {
        match self {
            Stub::Backup => "backup",
            Stub::Service => "service",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Log(Vec<String>),
    Error(Vec<String>),
    CheckConfig(Vec<String>),
    UpdateSelf { branch: Option<String> },
    UpdateHass { version: Option<String> },
    Unimplemented(Stub),
    Kill,
    KillAlt,
    Supervisor { verb: SupervisorVerb, args: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Help,
    Run(Command),
}

impl Invocation {
    pub fn parse(name: Option<&str>, args: Vec<String>) -> Result<Self, UsageError> {
        let Some(name) = name else {
            return Err(UsageError::MissingCommand);
        };
        let command = match name {
            "help" => return Ok(Invocation::Help),
            "log" => Command::Log(args),
            "error" => Command::Error(args),
            "config" => Command::CheckConfig(args),
            "update-hassctl" => Command::UpdateSelf {
                branch: args.into_iter().next(),
            },
            "update-hass" => Command::UpdateHass {
                version: args.into_iter().next(),
            },
            "backup" => Command::Unimplemented(Stub::Backup),
            "service" => Command::Unimplemented(Stub::Service),
            "kill" => Command::Kill,
            "kill-alt" => Command::KillAlt,
            other => match SupervisorVerb::from_name(other) {
                Some(verb) => Command::Supervisor { verb, args },
                None => return Err(UsageError::UnknownCommand(other.to_string())),
            },
        };
        Ok(Invocation::Run(command))
    }
}

pub fn print_usage(out: &mut dyn Write) -> io::Result<()> {
    out.write_all(USAGE.as_bytes())
}

pub fn install_command(pip_exec: &str, version: Option<&str>) -> Vec<String> {
    let package = match version {
        Some(version) if !version.trim().is_empty() => format!("{HASS_PACKAGE}=={}", version.trim()),
        _ => HASS_PACKAGE.to_string(),
    };
    vec![
        pip_exec.to_string(),
        "install".to_string(),
        "--upgrade".to_string(),
        package,
    ]
}

pub fn matching_pids(ps_output: &str, pattern: &Regex, own_pid: u32) -> Vec<u32> {
    ps_output
        .lines()
        .filter_map(|line| {
            let (pid, args) = line.trim_start().split_once(char::is_whitespace)?;
            let pid: u32 = pid.parse().ok()?;
            (pid != own_pid && pattern.is_match(args)).then_some(pid)
        })
        .collect()
}

pub struct Router<'a, R: ProcessRunner, D: Downloader> {
    config: &'a Configuration,
    runner: &'a R,
    delegate: IdentityDelegate,
    updater: SelfUpdater<'a, D>,
}

impl<'a, R: ProcessRunner, D: Downloader> Router<'a, R, D> {
    pub fn new(
        config: &'a Configuration,
        runner: &'a R,
        delegate: IdentityDelegate,
        updater: SelfUpdater<'a, D>,
    ) -> Self {
        Self {
            config,
            runner,
            delegate,
            updater,
        }
    }

    pub fn dispatch(&self, command: Command, out: &mut dyn Write) -> Result<i32, HassctlError> {
        debug!(?command, "dispatching");
        match command {
            Command::Log(args) => {
                LogViewer::new(self.config).stream(self.runner, LogMode::Raw, &args, out)
            }
            Command::Error(args) => {
                LogViewer::new(self.config).stream(self.runner, LogMode::Errors, &args, out)
            }
            Command::CheckConfig(args) => self.check_config(args),
            Command::UpdateSelf { branch } => self.update_self(branch, out),
            Command::UpdateHass { version } => self.update_hass(version.as_deref()),
            Command::Unimplemented(stub) => {
                writeln!(out, "hassctl {}: not yet implemented\n", stub.name())?;
                print_usage(out)?;
                Ok(1)
            }
            Command::Kill => self.supervisor(vec![
                "kill".to_string(),
                "--signal=SIGKILL".to_string(),
            ]),
            Command::KillAlt => self.kill_alt(out),
            Command::Supervisor { verb, args } => {
                let mut argv = vec![verb.as_str().to_string()];
                argv.extend(args);
                self.supervisor(argv)
            }
        }
    }

    fn check_config(&self, args: Vec<String>) -> Result<i32, HassctlError> {
        let mut command_line = vec![
            self.config.hass_exec.to_string_lossy().to_string(),
            "--script".to_string(),
            "check_config".to_string(),
        ];
        command_line.extend(args);
        self.delegate
            .run_as(self.runner, &self.config.target_user, command_line)
    }

    fn update_self(&self, branch: Option<String>, out: &mut dyn Write) -> Result<i32, HassctlError> {
        let branch = branch.unwrap_or_else(|| self.config.branch.clone());
        self.updater.update(&branch)?;
        writeln!(out, "hassctl has been updated from branch `{branch}`")?;
        Ok(0)
    }

    fn update_hass(&self, version: Option<&str>) -> Result<i32, HassctlError> {
        let command_line = install_command(&self.config.pip_exec.to_string_lossy(), version);
        self.delegate
            .run_as(self.runner, &self.config.target_user, command_line)
    }

    fn supervisor(&self, args: Vec<String>) -> Result<i32, HassctlError> {
        let mut command_line = vec![SUPERVISOR.to_string()];
        command_line.extend(args);
        command_line.push(self.config.service_pattern.clone());
        let identity = self.delegate.invoking_user().to_string();
        self.delegate.run_as(self.runner, &identity, command_line)
    }

    // Fallback for when systemd cannot kill the service.
    fn kill_alt(&self, out: &mut dyn Write) -> Result<i32, HassctlError> {
        let argv = vec!["ps".to_string(), "-eo".to_string(), "pid=,args=".to_string()];
        let scan = self.runner.run(&argv, true).map_err(|err| {
            HassctlError::Process(format!("failed to run `{}`: {err}", render_command(&argv)))
        })?;
        if !scan.success() {
            return Ok(scan.status_code);
        }
        let pattern = Regex::new(KILL_ALT_PATTERN)
            .map_err(|err| HassctlError::Process(format!("invalid process pattern: {err}")))?;
        let listing = String::from_utf8_lossy(&scan.stdout);
        let pids = matching_pids(&listing, &pattern, std::process::id());
        if pids.is_empty() {
            warn!("no Home Assistant processes found");
            return Ok(1);
        }
        let mut status = 0;
        for pid in pids {
            match self.runner.terminate(pid) {
                Ok(()) => writeln!(out, "killed {pid}")?,
                Err(err) => {
                    warn!(pid, "failed to kill: {err}");
                    status = 1;
                }
            }
        }
        Ok(status)
    }
}

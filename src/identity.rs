use crate::error::{ConfigError, HassctlError};
use crate::process::{render_command, ProcessRunner};
use nix::unistd::{geteuid, User};
use tracing::debug;

const PRIVILEGE_SWITCH: &str = "sudo";

/// Name of the effective user running this process.
pub fn current_user_name() -> Result<String, HassctlError> {
    let uid = geteuid();
    match User::from_uid(uid) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) => Err(HassctlError::Process(format!(
            "effective uid {uid} has no passwd entry"
        ))),
        Err(err) => Err(HassctlError::Process(format!(
            "failed to look up effective uid {uid}: {err}"
        ))),
    }
}

pub fn ensure_user_exists(name: &str) -> Result<(), ConfigError> {
    match User::from_name(name) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(ConfigError::UnknownUser(name.to_string())),
        Err(source) => Err(ConfigError::UserLookup {
            user: name.to_string(),
            source,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub invoking_user: String,
    pub target_user: String,
    pub command_line: Vec<String>,
}

impl ExecutionContext {
    pub fn switches_identity(&self) -> bool {
        self.invoking_user != self.target_user
    }

    pub fn argv(&self) -> Vec<String> {
        if !self.switches_identity() {
            return self.command_line.clone();
        }
        let mut argv = vec![
            PRIVILEGE_SWITCH.to_string(),
            "-u".to_string(),
            self.target_user.clone(),
            "-H".to_string(),
        ];
        argv.extend(self.command_line.iter().cloned());
        argv
    }
}

// Identity existence is checked during config resolution, not here.
#[derive(Debug, Clone)]
pub struct IdentityDelegate {
    invoking_user: String,
}

impl IdentityDelegate {
    pub fn new(invoking_user: impl Into<String>) -> Self {
        Self {
            invoking_user: invoking_user.into(),
        }
    }

    pub fn for_current_user() -> Result<Self, HassctlError> {
        Ok(Self::new(current_user_name()?))
    }

    pub fn invoking_user(&self) -> &str {
        &self.invoking_user
    }

    pub fn context(&self, identity: &str, command_line: Vec<String>) -> ExecutionContext {
        ExecutionContext {
            invoking_user: self.invoking_user.clone(),
            target_user: identity.to_string(),
            command_line,
        }
    }

    pub fn run_as<R: ProcessRunner>(
        &self,
        runner: &R,
        identity: &str,
        command_line: Vec<String>,
    ) -> Result<i32, HassctlError> {
        let ctx = self.context(identity, command_line);
        let argv = ctx.argv();
        debug!(
            invoking = %ctx.invoking_user,
            target = %ctx.target_user,
            switch = ctx.switches_identity(),
            "delegating command"
        );
        let output = runner.run(&argv, false).map_err(|err| {
            HassctlError::Process(format!(
                "failed to run `{}`: {err}",
                render_command(&argv)
            ))
        })?;
        Ok(output.status_code)
    }
}

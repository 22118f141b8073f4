//! Direct backend: the guest runner is the isolated process itself.
//!
//! Only the runner's own ceilings and syscall filter apply. When the daemon
//! runs as root the runner is spawned under the resolved identity.

use nix::unistd::geteuid;

use super::{launcher_env, ExitConvention, Invocation, IsolationBackend, LaunchPlan};
use crate::identity::Identity;

#[derive(Debug, Clone)]
pub struct DirectBackend {
    switch_identity: bool,
}

impl DirectBackend {
    /// Switch identity only when the daemon is able to.
    pub fn new() -> Self {
        Self {
            switch_identity: geteuid().is_root(),
        }
    }

    /// Force identity switching on or off.
    pub const fn with_identity_switch(switch_identity: bool) -> Self {
        Self { switch_identity }
    }
}

impl Default for DirectBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IsolationBackend for DirectBackend {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn invocation(&self, plan: &LaunchPlan<'_>) -> Invocation {
        let mut command = plan.guest_command().into_iter();
        let program = command.next().map(Into::into).unwrap_or_default();

        Invocation {
            program,
            args: command.collect(),
            cwd: plan.unit.dir().to_path_buf(),
            env: launcher_env(),
            credentials: self
                .switch_identity
                .then_some((plan.identity.uid, plan.identity.gid)),
            exit_convention: ExitConvention::Native,
        }
    }

    fn unit_owner<'a>(&self, identity: &'a Identity) -> Option<&'a Identity> {
        self.switch_identity.then_some(identity)
    }
}

//! Least-privilege identity for guest processes.
//!
//! Resolved once at startup and handed to the orchestrator by value.

use std::fmt;

use nix::unistd::{Group, User};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::IdentityConfig;

/// Identity resolution failures.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The resolved account is root or in the root group.
    #[error("refusing privileged identity {user}:{group} (uid {uid}, gid {gid})")]
    Privileged {
        user: String,
        group: String,
        uid: u32,
        gid: u32,
    },
}

/// A non-privileged user/group pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User name, or the decimal uid for the numeric fallback.
    pub user: String,
    /// Group name, or the decimal gid for the numeric fallback.
    pub group: String,
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// Resolve the identity described by `config`.
    ///
    /// The first candidate that exists and is not root wins. When either the
    /// user or the group cannot be found, both fall back to the numeric
    /// `fallback_id`.
    pub fn resolve(config: &IdentityConfig) -> Result<Self, IdentityError> {
        let users = config
            .user
            .as_ref()
            .map_or_else(|| config.candidate_users.clone(), |u| vec![u.clone()]);
        let groups = config
            .group
            .as_ref()
            .map_or_else(|| config.candidate_groups.clone(), |g| vec![g.clone()]);

        let identity = match (find_user(&users), find_group(&groups)) {
            (Some((user, uid)), Some((group, gid))) => Self {
                user,
                group,
                uid,
                gid,
            },
            _ => {
                warn!(
                    fallback_id = config.fallback_id,
                    "No unprivileged named account found, using numeric fallback"
                );
                Self::numeric(config.fallback_id)
            }
        };

        identity.ensure_unprivileged()?;
        info!(user = %identity.user, group = %identity.group, "Resolved guest identity");
        Ok(identity)
    }

    /// Identity made of bare numeric ids.
    pub fn numeric(id: u32) -> Self {
        Self {
            user: id.to_string(),
            group: id.to_string(),
            uid: id,
            gid: id,
        }
    }

    fn ensure_unprivileged(&self) -> Result<(), IdentityError> {
        if self.uid == 0 || self.gid == 0 {
            return Err(IdentityError::Privileged {
                user: self.user.clone(),
                group: self.group.clone(),
                uid: self.uid,
                gid: self.gid,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user, self.group)
    }
}

fn find_user(candidates: &[String]) -> Option<(String, u32)> {
    candidates.iter().find_map(|name| match User::from_name(name) {
        Ok(Some(user)) if user.uid.is_root() => {
            warn!(user = %name, "Skipping candidate user with uid 0");
            None
        }
        Ok(Some(user)) => Some((user.name, user.uid.as_raw())),
        Ok(None) => None,
        Err(e) => {
            debug!(user = %name, error = %e, "User lookup failed");
            None
        }
    })
}

fn find_group(candidates: &[String]) -> Option<(String, u32)> {
    candidates.iter().find_map(|name| match Group::from_name(name) {
        Ok(Some(group)) if group.gid.as_raw() == 0 => {
            warn!(group = %name, "Skipping candidate group with gid 0");
            None
        }
        Ok(Some(group)) => Some((group.name, group.gid.as_raw())),
        Ok(None) => None,
        Err(e) => {
            debug!(group = %name, error = %e, "Group lookup failed");
            None
        }
    })
}

use nix::unistd::{Group, Uid, User, getgroups};
use std::io;

const ADMIN_GROUPS: &[&str] = &["sudo", "admin"];

/// Login uid the desktop session belongs to on single-user lab machines.
const DEFAULT_DESKTOP_UID: u32 = 1000;

pub fn is_root() -> bool {
    Uid::effective().is_root()
}

pub fn require_root() -> io::Result<()> {
    if is_root() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "This command must be run with sudo/root.",
        ))
    }
}

/// Root, or a member of one of the administrator groups.
pub fn is_administrator() -> bool {
    if is_root() {
        return true;
    }

    let Ok(gids) = getgroups() else {
        return false;
    };

    gids.into_iter().any(|gid| {
        matches!(
            Group::from_gid(gid),
            Ok(Some(group)) if ADMIN_GROUPS.contains(&group.name.as_str())
        )
    })
}

/// The user owning the graphical session: whoever invoked sudo, otherwise
/// the first regular account.
pub fn graphical_user() -> Option<String> {
    if let Ok(user) = std::env::var("SUDO_USER")
        && !user.is_empty()
        && user != "root"
    {
        return Some(user);
    }

    User::from_uid(Uid::from_raw(DEFAULT_DESKTOP_UID))
        .ok()
        .flatten()
        .map(|user| user.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_always_an_administrator() {
        if is_root() {
            assert!(is_administrator());
            assert!(require_root().is_ok());
        } else {
            let err = require_root().unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        }
    }
}

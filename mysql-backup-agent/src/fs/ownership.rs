//! Recursive ownership reset for the data directory after copy-back.

use nix::unistd::{Group, User};
use std::io;
use std::os::unix::fs::lchown;
use std::path::Path;
use walkdir::WalkDir;

/// Resolved numeric owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    /// Resolve `user:group` (or just `user`, using the user's primary group).
    pub fn lookup(owner: &str) -> io::Result<Self> {
        let (user_name, group_name) = match owner.split_once(':') {
            Some((u, g)) => (u, Some(g)),
            None => (owner, None),
        };

        let user = User::from_name(user_name)
            .map_err(io::Error::from)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown user '{}'", user_name)))?;

        let gid = match group_name {
            Some(name) => {
                Group::from_name(name)
                    .map_err(io::Error::from)?
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown group '{}'", name)))?
                    .gid
            }
            None => user.gid,
        };

        Ok(Self {
            uid: user.uid.as_raw(),
            gid: gid.as_raw(),
        })
    }
}

/// Apply `owner` to `root` and everything below it without following symlinks.
pub fn chown_recursive(root: &Path, owner: Owner) -> io::Result<usize> {
    let mut changed = 0;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        lchown(entry.path(), Some(owner.uid), Some(owner.gid))?;
        changed += 1;
    }

    Ok(changed)
}

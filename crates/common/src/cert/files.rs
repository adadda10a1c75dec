use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::unistd::{chown, Gid, Group, Uid, User};
use tempfile::NamedTempFile;

/// Mode of directories holding keys and certificates
pub const DIR_MODE: u32 = 0o750;
/// Mode of private keys and token files
pub const PRIVATE_MODE: u32 = 0o600;
/// Mode of certificates and CA bundles
pub const PUBLIC_MODE: u32 = 0o644;

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("unknown user '{0}'")]
    UnknownUser(String),
    #[error("unknown group '{0}'")]
    UnknownGroup(String),
    #[error("error looking up '{name}': {source}")]
    Lookup {
        name: String,
        #[source]
        source: Errno,
    },
    #[error("error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("error changing ownership of {path}: {source}")]
    Chown {
        path: PathBuf,
        #[source]
        source: Errno,
    },
}

impl FileError {
    fn io(path: &Path, source: io::Error) -> Self {
        FileError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Owner and group applied to every written file and directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: Uid,
    pub gid: Gid,
}

impl Default for Ownership {
    /// The effective user and group of this process
    fn default() -> Self {
        Self {
            uid: Uid::effective(),
            gid: Gid::effective(),
        }
    }
}

impl Ownership {
    /// Resolve an owner and group given by numeric id or by name
    ///
    /// A value that parses as a number is taken as an id without a lookup.
    ///  Missing or empty values fall back to the effective user and group.
    pub fn resolve(owner: Option<&str>, group: Option<&str>) -> Result<Self, FileError> {
        let mut ownership = Self::default();
        if let Some(owner) = owner.filter(|owner| !owner.is_empty()) {
            ownership.uid = resolve_user(owner)?;
        }
        if let Some(group) = group.filter(|group| !group.is_empty()) {
            ownership.gid = resolve_group(group)?;
        }
        Ok(ownership)
    }

    pub fn apply(&self, path: &Path) -> Result<(), FileError> {
        chown(path, Some(self.uid), Some(self.gid)).map_err(|source| FileError::Chown {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn resolve_user(owner: &str) -> Result<Uid, FileError> {
    if let Ok(uid) = owner.parse::<u32>() {
        return Ok(Uid::from_raw(uid));
    }
    User::from_name(owner)
        .map_err(|source| FileError::Lookup {
            name: owner.to_string(),
            source,
        })?
        .map(|user| user.uid)
        .ok_or_else(|| FileError::UnknownUser(owner.to_string()))
}

fn resolve_group(group: &str) -> Result<Gid, FileError> {
    if let Ok(gid) = group.parse::<u32>() {
        return Ok(Gid::from_raw(gid));
    }
    Group::from_name(group)
        .map_err(|source| FileError::Lookup {
            name: group.to_string(),
            source,
        })?
        .map(|group| group.gid)
        .ok_or_else(|| FileError::UnknownGroup(group.to_string()))
}

/// Create `dir` and any missing parents with mode 0750, then hand them to
///  `owner`
///
/// Directories that already exist keep their mode; `dir` itself is always
///  handed to `owner`.
pub fn ensure_dir(dir: &Path, owner: &Ownership) -> Result<(), FileError> {
    let missing: Vec<&Path> = dir
        .ancestors()
        .take_while(|path| !path.as_os_str().is_empty() && !path.exists())
        .collect();

    for path in missing.iter().rev() {
        match fs::DirBuilder::new().mode(DIR_MODE).create(path) {
            Ok(()) => {}
            // created by someone else in the meantime
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => continue,
            Err(e) => return Err(FileError::io(path, e)),
        }
        // the umask may have stripped bits
        fs::set_permissions(path, Permissions::from_mode(DIR_MODE))
            .map_err(|e| FileError::io(path, e))?;
        owner.apply(path)?;
        tracing::debug!("created directory {}", path.display());
    }

    if missing.is_empty() {
        owner.apply(dir)?;
    }
    Ok(())
}

/// Replace `path` with `contents`
///
/// The data goes to a temporary file next to `path`, which gets its mode and
///  owner before being renamed over the target.
pub fn write_file(
    path: &Path,
    contents: &[u8],
    mode: u32,
    owner: &Ownership,
) -> Result<(), FileError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| FileError::io(path, e))?;
    tmp.write_all(contents).map_err(|e| FileError::io(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| FileError::io(path, e))?;
    tmp.as_file()
        .set_permissions(Permissions::from_mode(mode))
        .map_err(|e| FileError::io(path, e))?;
    owner.apply(tmp.path())?;
    tmp.persist(path).map_err(|e| FileError::io(path, e.error))?;

    tracing::debug!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use super::*;

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_numeric_ids_skip_lookup() {
        let ownership = Ownership::resolve(Some("4242"), Some("4343")).unwrap();
        assert_eq!(ownership.uid, Uid::from_raw(4242));
        assert_eq!(ownership.gid, Gid::from_raw(4343));
    }

    #[test]
    fn test_empty_values_default_to_current() {
        assert_eq!(
            Ownership::resolve(None, Some("")).unwrap(),
            Ownership::default()
        );
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        assert!(matches!(
            Ownership::resolve(Some("no-such-user-here"), None),
            Err(FileError::UnknownUser(_))
        ));
        assert!(matches!(
            Ownership::resolve(None, Some("no-such-group-here")),
            Err(FileError::UnknownGroup(_))
        ));
    }

    #[test]
    fn test_ensure_dir_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a/b/c");
        ensure_dir(&dir, &Ownership::default()).unwrap();

        for created in [tmp.path().join("a"), tmp.path().join("a/b"), dir] {
            assert_eq!(mode(&created), DIR_MODE, "{}", created.display());
            let meta = fs::metadata(&created).unwrap();
            assert_eq!(meta.uid(), Uid::effective().as_raw());
            assert_eq!(meta.gid(), Gid::effective().as_raw());
        }
    }

    #[test]
    fn test_ensure_dir_keeps_existing_modes() {
        let tmp = tempfile::tempdir().unwrap();
        let parent = tmp.path().join("pki");
        fs::create_dir(&parent).unwrap();
        fs::set_permissions(&parent, Permissions::from_mode(0o755)).unwrap();

        let dir = parent.join("kubelet");
        ensure_dir(&dir, &Ownership::default()).unwrap();
        assert_eq!(mode(&parent), 0o755);
        assert_eq!(mode(&dir), DIR_MODE);

        fs::set_permissions(&dir, Permissions::from_mode(0o700)).unwrap();
        ensure_dir(&dir, &Ownership::default()).unwrap();
        assert_eq!(mode(&dir), 0o700);
    }

    #[test]
    fn test_write_file_replaces_content_and_sets_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("key.pem");

        write_file(&path, b"one", PRIVATE_MODE, &Ownership::default()).unwrap();
        assert_eq!(mode(&path), PRIVATE_MODE);
        write_file(&path, b"two", PUBLIC_MODE, &Ownership::default()).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(mode(&path), PUBLIC_MODE);

        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.uid(), Uid::effective().as_raw());
        assert_eq!(meta.gid(), Gid::effective().as_raw());

        // no temporary files left behind
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }
}

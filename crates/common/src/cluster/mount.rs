use crate::backend::{BackendError, MountInput, MountOutput, MountTuning, SysAdmin};

use super::paths::{same_path, ResourcePath};

/// Engine a mount is expected to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Generic,
    Pki,
}

impl MountKind {
    /// Type name used when creating the mount
    pub fn type_name(&self) -> &'static str {
        match self {
            MountKind::Generic => "generic",
            MountKind::Pki => "pki",
        }
    }

    /// Whether a mount listed with `observed` type runs this engine
    ///
    /// Newer backends report generic secret mounts as `kv`.
    pub fn accepts(&self, observed: &str) -> bool {
        match self {
            MountKind::Generic => observed == "generic" || observed == "kv",
            MountKind::Pki => observed == "pki",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("error listing mounts: {0}")]
    List(#[source] BackendError),
    #[error("error creating mount '{path}': {source}")]
    Create {
        path: ResourcePath,
        #[source]
        source: BackendError,
    },
    #[error("mount '{path}' already existing with wrong type '{found}'")]
    WrongType { path: ResourcePath, found: String },
    #[error("error tuning mount '{path}': {source}")]
    Tune {
        path: ResourcePath,
        #[source]
        source: BackendError,
    },
}

/// What [`MountSpec::ensure`] changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountOutcome {
    pub created: bool,
    pub tuned: bool,
}

/// Desired state of a single mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub path: ResourcePath,
    pub kind: MountKind,
    pub description: String,
    /// Lease TTLs to converge to, `None` leaves the backend defaults
    pub tuning: Option<MountTuning>,
}

impl MountSpec {
    /// Make sure the mount exists with the right engine and tuning
    ///
    /// Lists mounts once, creates the mount at most once and tunes it at
    ///  most once. A mount running another engine is never touched.
    pub async fn ensure<S>(&self, sys: &S) -> Result<MountOutcome, MountError>
    where
        S: SysAdmin + ?Sized,
    {
        let mut outcome = MountOutcome::default();

        let tune_required = match find_mount(sys, &self.path).await? {
            None => {
                tracing::debug!("no mount found at {}", self.path);
                sys.mount(
                    self.path.as_str(),
                    &MountInput {
                        mount_type: self.kind.type_name().to_string(),
                        description: self.description.clone(),
                    },
                )
                .await
                .map_err(|source| MountError::Create {
                    path: self.path.clone(),
                    source,
                })?;
                tracing::info!("mounted {} at '{}'", self.kind.type_name(), self.path);
                outcome.created = true;
                // a fresh mount carries the backend's default TTLs
                self.tuning.is_some()
            }
            Some(mount) => {
                self.check_type(&mount)?;
                tracing::debug!("mount '{}' already existing", self.path);
                self.tuning
                    .map(|tuning| tuning.differs_from(&mount.config))
                    .unwrap_or(false)
            }
        };

        if let (true, Some(tuning)) = (tune_required, self.tuning.as_ref()) {
            sys.tune_mount(self.path.as_str(), tuning)
                .await
                .map_err(|source| MountError::Tune {
                    path: self.path.clone(),
                    source,
                })?;
            tracing::info!(
                "tuned mount '{}': default_lease_ttl={}s max_lease_ttl={}s",
                self.path,
                tuning.default_lease_ttl.as_secs(),
                tuning.max_lease_ttl.as_secs()
            );
            outcome.tuned = true;
        } else {
            tracing::debug!("no tune required for '{}'", self.path);
        }

        Ok(outcome)
    }

    /// Whether [`MountSpec::ensure`] would change anything
    ///
    /// A mount with the wrong engine counts as a change; `ensure` itself
    ///  would refuse it.
    pub async fn ensure_dry_run<S>(&self, sys: &S) -> Result<bool, MountError>
    where
        S: SysAdmin + ?Sized,
    {
        let Some(mount) = find_mount(sys, &self.path).await? else {
            return Ok(true);
        };
        if self.check_type(&mount).is_err() {
            tracing::warn!(
                "mount '{}' has type '{}', expected '{}'",
                self.path,
                mount.mount_type,
                self.kind.type_name()
            );
            return Ok(true);
        }
        Ok(self
            .tuning
            .map(|tuning| tuning.differs_from(&mount.config))
            .unwrap_or(false))
    }

    fn check_type(&self, mount: &MountOutput) -> Result<(), MountError> {
        if self.kind.accepts(&mount.mount_type) {
            Ok(())
        } else {
            Err(MountError::WrongType {
                path: self.path.clone(),
                found: mount.mount_type.clone(),
            })
        }
    }
}

/// Look a mount up by path, comparing normalized forms
pub async fn find_mount<S>(sys: &S, path: &ResourcePath) -> Result<Option<MountOutput>, MountError>
where
    S: SysAdmin + ?Sized,
{
    let mounts = sys.list_mounts().await.map_err(MountError::List)?;
    Ok(mounts
        .into_iter()
        .find(|(candidate, _)| same_path(candidate, path.as_str()))
        .map(|(_, mount)| mount))
}

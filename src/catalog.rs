//! OS target matrix and snapshot image overrides.
//!
//! The catalog separates the stable, code-defined list of OS families under
//! test from the volatile choice of which pre-baked image to boot. Image
//! promotion happens by editing the snapshot override file, never the code.

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// OS family grouping used to select package-manager-specific behaviour.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OsFamily {
    /// Debian-derived targets using `apt`.
    Debian,
    /// Red Hat-derived targets using `dnf`.
    Rhel,
}

impl OsFamily {
    /// Returns the canonical lowercase name for the family.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debian => "debian",
            Self::Rhel => "rhel",
        }
    }

    /// Parses a family name, returning `None` for unknown values.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "debian" => Some(Self::Debian),
            "rhel" => Some(Self::Rhel),
            _ => None,
        }
    }
}

/// One (OS family, image) pair drawn from the test matrix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OsTarget {
    /// Stable matrix name (for example `ubuntu-24-04`).
    pub name: String,
    /// Provider image identifier to boot; replaced by snapshot overrides.
    pub image: String,
    /// Family grouping.
    pub family: OsFamily,
    /// Package manager binary expected on the target.
    pub package_manager: String,
    /// Ordered commands run on the instance before verification checks.
    pub setup_commands: Vec<String>,
}

const DEBIAN_SETUP: [&str; 2] = [
    "apt-get update",
    "apt-get install -y python3 python3-pip python3-venv",
];
const RHEL_SETUP: [&str; 1] = ["dnf install -y python3 python3-pip"];

fn debian_target(name: &str, image: &str) -> OsTarget {
    OsTarget {
        name: name.to_owned(),
        image: image.to_owned(),
        family: OsFamily::Debian,
        package_manager: String::from("apt"),
        setup_commands: DEBIAN_SETUP.iter().map(|cmd| (*cmd).to_owned()).collect(),
    }
}

fn rhel_target(name: &str, image: &str) -> OsTarget {
    OsTarget {
        name: name.to_owned(),
        image: image.to_owned(),
        family: OsFamily::Rhel,
        package_manager: String::from("dnf"),
        setup_commands: RHEL_SETUP.iter().map(|cmd| (*cmd).to_owned()).collect(),
    }
}

fn builtin_targets() -> Vec<OsTarget> {
    vec![
        debian_target("ubuntu-24-04", "ubuntu-24-04-x64"),
        debian_target("ubuntu-22-04", "ubuntu-22-04-x64"),
        debian_target("debian-12", "debian-12-x64"),
        rhel_target("centos-stream-9", "centos-stream-9-x64"),
        rhel_target("fedora-42", "fedora-42-x64"),
        rhel_target("almalinux-9", "almalinux-9-x64"),
    ]
}

/// Errors raised while loading or saving snapshot overrides.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the override file holds malformed JSON.
    #[error("failed to parse snapshot overrides in {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
}

/// Static table of OS targets with optional persisted image overrides.
///
/// Read-only after construction: overrides apply exactly once at load time.
#[derive(Clone, Debug)]
pub struct OsTargetCatalog {
    targets: Vec<OsTarget>,
    overrides: BTreeMap<String, String>,
}

impl OsTargetCatalog {
    /// Builds the catalog with the built-in image defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            targets: builtin_targets(),
            overrides: BTreeMap::new(),
        }
    }

    /// Builds the catalog and applies overrides from `path`.
    ///
    /// A missing file leaves the defaults untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Parse`] when the file exists but is not a
    /// JSON map of target name to image identifier, or [`CatalogError::Io`]
    /// when it exists but cannot be read.
    pub fn with_overrides(path: &Utf8Path) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        catalog.load_overrides(path)?;
        Ok(catalog)
    }

    /// Returns the target with the given name, or `None` when unknown.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OsTarget> {
        self.targets.iter().find(|target| target.name == name)
    }

    /// Returns all targets in matrix order.
    #[must_use]
    pub fn get_all(&self) -> &[OsTarget] {
        &self.targets
    }

    /// Returns the targets belonging to one family, in matrix order.
    #[must_use]
    pub fn get_by_family(&self, family: OsFamily) -> Vec<&OsTarget> {
        self.targets
            .iter()
            .filter(|target| target.family == family)
            .collect()
    }

    /// Applies the snapshot override map stored at `path`.
    ///
    /// Override entries naming unknown targets are ignored; only the image
    /// identifier of known targets changes.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Parse`] for malformed content and
    /// [`CatalogError::Io`] for read failures other than a missing file.
    pub fn load_overrides(&mut self, path: &Utf8Path) -> Result<(), CatalogError> {
        let Some(contents) = read_optional(path)? else {
            return Ok(());
        };

        let overrides: BTreeMap<String, String> =
            serde_json::from_str(&contents).map_err(|err| CatalogError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;

        for target in &mut self.targets {
            if let Some(image) = overrides.get(&target.name) {
                target.image.clone_from(image);
            }
        }
        self.overrides = overrides;
        Ok(())
    }

    /// Persists the current override map to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] when the file cannot be written.
    pub fn save_overrides(&self, path: &Utf8Path) -> Result<(), CatalogError> {
        let rendered =
            serde_json::to_string_pretty(&self.overrides).map_err(|err| CatalogError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        write_file(path, &rendered)
    }
}

impl Default for OsTargetCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), CatalogError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| CatalogError::Io {
        path: path.to_path_buf(),
        message: String::from("override file path is missing a filename"),
    })?;
    Ok((parent, file_name))
}

fn read_optional(path: &Utf8Path) -> Result<Option<String>, CatalogError> {
    let (parent, file_name) = split_path(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(CatalogError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            });
        }
    };

    match dir.read_to_string(file_name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(CatalogError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

fn write_file(path: &Utf8Path, contents: &str) -> Result<(), CatalogError> {
    let (parent, file_name) = split_path(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| CatalogError::Io {
        path: parent.to_path_buf(),
        message: err.to_string(),
    })?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| CatalogError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;
    dir.write(file_name, contents).map_err(|err| CatalogError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn temp_path(tmp: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().join(name))
            .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()))
    }

    #[rstest]
    fn get_returns_none_for_unknown_names() {
        let catalog = OsTargetCatalog::new();
        assert!(catalog.get("windows-server-2022").is_none());
    }

    #[rstest]
    fn get_all_preserves_matrix_order() {
        let catalog = OsTargetCatalog::new();
        let names: Vec<&str> = catalog
            .get_all()
            .iter()
            .map(|target| target.name.as_str())
            .collect();
        assert_eq!(
            names,
            [
                "ubuntu-24-04",
                "ubuntu-22-04",
                "debian-12",
                "centos-stream-9",
                "fedora-42",
                "almalinux-9",
            ]
        );
    }

    #[rstest]
    #[case(OsFamily::Debian, 3, "apt")]
    #[case(OsFamily::Rhel, 3, "dnf")]
    fn get_by_family_filters_targets(
        #[case] family: OsFamily,
        #[case] expected_count: usize,
        #[case] package_manager: &str,
    ) {
        let catalog = OsTargetCatalog::new();
        let targets = catalog.get_by_family(family);
        assert_eq!(targets.len(), expected_count);
        assert!(
            targets
                .iter()
                .all(|target| target.package_manager == package_manager)
        );
    }

    #[rstest]
    fn overrides_replace_only_named_images() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = temp_path(&tmp, "snapshots.json");
        std::fs::write(&path, "{\"ubuntu-24-04\": \"snap-123\"}")
            .unwrap_or_else(|err| panic!("seed overrides: {err}"));

        let catalog =
            OsTargetCatalog::with_overrides(&path).unwrap_or_else(|err| panic!("load: {err}"));

        let ubuntu = catalog.get("ubuntu-24-04").expect("known target");
        assert_eq!(ubuntu.image, "snap-123");
        let debian = catalog.get("debian-12").expect("known target");
        assert_eq!(debian.image, "debian-12-x64");
    }

    #[rstest]
    fn missing_override_file_is_a_no_op() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = temp_path(&tmp, "absent.json");

        let catalog =
            OsTargetCatalog::with_overrides(&path).unwrap_or_else(|err| panic!("load: {err}"));

        let ubuntu = catalog.get("ubuntu-24-04").expect("known target");
        assert_eq!(ubuntu.image, "ubuntu-24-04-x64");
    }

    #[rstest]
    fn malformed_override_file_is_fatal() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = temp_path(&tmp, "snapshots.json");
        std::fs::write(&path, "not-json").unwrap_or_else(|err| panic!("seed overrides: {err}"));

        let err = OsTargetCatalog::with_overrides(&path).expect_err("parse should fail");
        assert!(matches!(err, CatalogError::Parse { .. }));
    }

    #[rstest]
    fn save_overrides_round_trips_the_map() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let seed = temp_path(&tmp, "snapshots.json");
        std::fs::write(&seed, "{\"fedora-42\": \"snap-9\"}")
            .unwrap_or_else(|err| panic!("seed overrides: {err}"));
        let catalog =
            OsTargetCatalog::with_overrides(&seed).unwrap_or_else(|err| panic!("load: {err}"));

        let saved = temp_path(&tmp, "saved.json");
        catalog
            .save_overrides(&saved)
            .unwrap_or_else(|err| panic!("save: {err}"));

        let mut reloaded = OsTargetCatalog::new();
        reloaded
            .load_overrides(&saved)
            .unwrap_or_else(|err| panic!("reload: {err}"));
        assert_eq!(
            reloaded.get("fedora-42").expect("known target").image,
            "snap-9"
        );
    }
}

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid manifest: {0}")]
    Invalid(String),
}

/// Knobs for background shader compilation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompilerSettings {
    /// Master switch; when false every submission compiles synchronously.
    #[serde(default = "default_deferred")]
    pub deferred: bool,
    /// Delay before a freshly spawned worker starts draining, so bursts of
    /// submissions land in one batch.
    #[serde(
        default = "default_start_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub start_delay: Duration,
    /// Minimum spacing between progress updates sent to the job host.
    #[serde(
        default = "default_update_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub update_interval: Duration,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            deferred: default_deferred(),
            start_delay: default_start_delay(),
            update_interval: default_update_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShaderSet {
    pub version: u32,
    #[serde(default)]
    pub compiler: CompilerSettings,
    #[serde(default)]
    pub library: Vec<LibraryEntry>,
    #[serde(default)]
    pub programs: Vec<ProgramEntry>,
    #[serde(skip)]
    root: Option<PathBuf>,
}

/// One library fragment; entries are registered in file order.
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryEntry {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramEntry {
    pub name: String,
    #[serde(default)]
    pub vertex: Option<PathBuf>,
    #[serde(default)]
    pub geometry: Option<PathBuf>,
    #[serde(default)]
    pub fragment: Option<PathBuf>,
    #[serde(default)]
    pub compute: Option<PathBuf>,
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
    /// Per-program override of [`CompilerSettings::deferred`].
    #[serde(default)]
    pub deferred: Option<bool>,
}

impl ProgramEntry {
    pub fn is_deferred(&self, settings: &CompilerSettings) -> bool {
        self.deferred.unwrap_or(settings.deferred)
    }
}

fn default_deferred() -> bool {
    true
}

fn default_start_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_update_interval() -> Duration {
    Duration::from_millis(100)
}

/// TOML integers and floats are seconds; strings go through humantime.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            let secs = u64::try_from(v).map_err(|_| E::custom("duration must be non-negative"))?;
            Ok(Duration::from_secs(secs))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Duration::try_from_secs_f64(v)
                .map_err(|err| E::custom(format!("invalid duration {v}: {err}")))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl ShaderSet {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: ShaderSet = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates a manifest; relative paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut set = Self::from_toml_str(&input)?;
        set.root = path.parent().map(Path::to_path_buf);
        Ok(set)
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn program(&self, name: &str) -> Option<&ProgramEntry> {
        self.programs.iter().find(|program| program.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported manifest version {}; expected 1",
                self.version
            )));
        }

        for entry in &self.library {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "library entry '{}' must have a name",
                    entry.path.display()
                )));
            }
            if entry.name.contains(')') {
                return Err(ConfigError::Invalid(format!(
                    "library name '{}' cannot contain ')'",
                    entry.name
                )));
            }
        }

        if self.programs.is_empty() {
            return Err(ConfigError::Invalid(
                "manifest must define at least one program".into(),
            ));
        }

        let mut seen = HashSet::new();
        for program in &self.programs {
            if program.name.trim().is_empty() {
                return Err(ConfigError::Invalid("program names cannot be empty".into()));
            }
            if !seen.insert(program.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "program '{}' is defined more than once",
                    program.name
                )));
            }
            if program.fragment.is_none() && program.compute.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "program '{}' needs a fragment or compute stage",
                    program.name
                )));
            }
            if program.compute.is_some()
                && (program.vertex.is_some()
                    || program.geometry.is_some()
                    || program.fragment.is_some())
            {
                return Err(ConfigError::Invalid(format!(
                    "program '{}' mixes compute with graphics stages",
                    program.name
                )));
            }
        }

        Ok(())
    }
}

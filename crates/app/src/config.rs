use bookkeeper_core::{Category, CategoryId, CategoryRule, MappingField, RuleId};
use bookkeeper_import::{CategoryMatcher, FileFormatSpec, FormatError, RuleError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const ENV_CONFIG: &str = "BOOKKEEPER_CONFIG";
const ENV_DATABASE_PATH: &str = "BOOKKEEPER_DATABASE_PATH";
const ENV_LOG: &str = "BOOKKEEPER_LOG";
const ENV_FORMAT: &str = "BOOKKEEPER_FORMAT";
const ENV_INCOME_CATEGORY: &str = "BOOKKEEPER_INCOME_CATEGORY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{key}={value:?} is not valid")]
    InvalidEnv { key: &'static str, value: String },
    #[error("database_path must not be empty")]
    EmptyDatabasePath,
    #[error("unknown statement format '{0}'")]
    UnknownFormat(String),
    #[error("format '{name}': {source}")]
    InvalidFormat {
        name: String,
        #[source]
        source: FormatError,
    },
    #[error("seed categories: {0}")]
    SeedRule(#[from] RuleError),
}

/// A category declared in the settings file, inserted by `seed-categories`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedCategory {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub rules: Vec<SeedRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedRule {
    pub field: MappingField,
    pub pattern: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub log_filter: String,
    pub default_format: String,
    pub income_category_id: Option<i64>,
    pub formats: BTreeMap<String, FileFormatSpec>,
    pub categories: Vec<SeedCategory>,
}

impl Default for Settings {
    fn default() -> Self {
        let database_path = project_dirs()
            .map(|dirs| dirs.data_dir().join("bookkeeper.db"))
            .unwrap_or_else(|| PathBuf::from("bookkeeper.db"));
        Self {
            database_path,
            log_filter: "info".to_string(),
            default_format: "ing".to_string(),
            income_category_id: None,
            formats: BTreeMap::new(),
            categories: Vec::new(),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "bookkeeper")
}

impl Settings {
    /// Defaults, then the settings file, then `BOOKKEEPER_*` variables.
    ///
    /// An explicit path (flag or `BOOKKEEPER_CONFIG`) must exist; the
    /// platform config file is only read if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let fallback = project_dirs().map(|dirs| dirs.config_dir().join("config.toml"));
        Self::load_with(explicit, fallback, |key| std::env::var(key).ok())
    }

    fn load_with(
        explicit: Option<&Path>,
        fallback: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env(ENV_CONFIG).map(PathBuf::from));

        let mut settings = match (path, fallback) {
            (Some(path), _) => Self::from_file(&path)?,
            (None, Some(path)) if path.is_file() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        if let Some(value) = env(ENV_DATABASE_PATH) {
            settings.database_path = PathBuf::from(value);
        }
        if let Some(value) = env(ENV_LOG) {
            settings.log_filter = value;
        }
        if let Some(value) = env(ENV_FORMAT) {
            settings.default_format = value;
        }
        if let Some(value) = env(ENV_INCOME_CATEGORY) {
            let id = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_INCOME_CATEGORY,
                value: value.clone(),
            })?;
            settings.income_category_id = Some(id);
        }

        for (name, format) in settings.formats.iter_mut() {
            if format.name.is_empty() {
                format.name = name.clone();
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        for (name, format) in &self.formats {
            format.validate().map_err(|source| ConfigError::InvalidFormat {
                name: name.clone(),
                source,
            })?;
        }
        self.resolve_format(&self.default_format)?;
        CategoryMatcher::new(self.seed_categories())?;
        Ok(())
    }

    /// Configured formats shadow the built-in ones of the same name.
    pub fn resolve_format(&self, name: &str) -> Result<FileFormatSpec, ConfigError> {
        let format = self
            .formats
            .get(name)
            .cloned()
            .or_else(|| FileFormatSpec::builtin(name))
            .ok_or_else(|| ConfigError::UnknownFormat(name.to_string()))?;
        format.validate().map_err(|source| ConfigError::InvalidFormat {
            name: name.to_string(),
            source,
        })?;
        Ok(format)
    }

    /// Seed categories as domain values, numbered in declaration order.
    pub fn seed_categories(&self) -> Vec<Category> {
        let mut next_rule = 0;
        self.categories
            .iter()
            .zip(1..)
            .map(|(seed, id)| {
                let id = CategoryId(id);
                let rules = seed
                    .rules
                    .iter()
                    .map(|rule| {
                        next_rule += 1;
                        CategoryRule {
                            id: RuleId(next_rule),
                            category_id: id,
                            mapping_field: rule.field,
                            pattern: rule.pattern.clone(),
                            description: rule.description.clone(),
                        }
                    })
                    .collect();
                Category {
                    id,
                    name: seed.name.clone(),
                    description: seed.description.clone(),
                    color: seed.color.clone(),
                    rules,
                }
            })
            .collect()
    }
}

//! Compiler options loaded from TOML.
//!
//! ```toml
//! [planner]
//! target = "pull-iterator"
//! simplify = true
//! max_simplify_passes = 16
//!
//! [execution]
//! fetch_batch_size = 1024
//!
//! [dialects.warehouse]
//! base = "mysql"
//! null_collation = "high"
//! cast_types = { DOUBLE = "DECIMAL(30, 10)" }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::dialect::descriptor::{NullCollation, OffsetFetchStyle, SubstringStyle};
use crate::dialect::{EmitterRegistry, PipelineEmitter, SqlDialect, SqlEmitter};
use crate::plan::Convention;

/// Environment variable naming the default configuration file.
pub const CONFIG_ENV: &str = "PENUMBRA_CONFIG";

/// Resolved compiler configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct CompilerOptions {
    /// Convention the root of every plan is placed in.
    pub target: Convention,
    /// Whether programs are simplified before compilation.
    pub simplify: bool,
    /// Upper bound on simplifier fixpoint passes.
    pub max_simplify_passes: usize,
    /// Rows requested per round trip when pulling from a foreign store.
    pub fetch_batch_size: usize,
    /// Custom dialects, keyed by name.
    pub dialects: BTreeMap<String, SqlDialect>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            target: Convention::PullIterator,
            simplify: true,
            max_simplify_passes: 16,
            fetch_batch_size: 1024,
            dialects: BTreeMap::new(),
        }
    }
}

impl CompilerOptions {
    /// Loads options from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let options = Self::from_raw(raw)?;
        info!(
            path = %path.display(),
            target = %options.target,
            dialects = options.dialects.len(),
            "loaded compiler options"
        );
        Ok(options)
    }

    /// Loads options from the file named by `PENUMBRA_CONFIG`, or the
    /// defaults when it is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    /// Parses options from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let target = match raw.planner.target {
            Some(text) => text.parse().map_err(|_| ConfigError::InvalidValue {
                key: "planner.target".into(),
                value: text.clone(),
            })?,
            None => defaults.target,
        };
        if target == Convention::None {
            return Err(ConfigError::InvalidValue {
                key: "planner.target".into(),
                value: target.to_string(),
            });
        }
        let dialects = raw
            .dialects
            .into_iter()
            .map(|(name, raw)| Ok((name.clone(), build_dialect(&name, raw)?)))
            .collect::<Result<_, ConfigError>>()?;
        Ok(Self {
            target,
            simplify: raw.planner.simplify.unwrap_or(defaults.simplify),
            max_simplify_passes: raw
                .planner
                .max_simplify_passes
                .unwrap_or(defaults.max_simplify_passes),
            fetch_batch_size: raw
                .execution
                .fetch_batch_size
                .unwrap_or(defaults.fetch_batch_size),
            dialects,
        })
    }

    /// SQL emitter knowing every preset plus the configured dialects.
    pub fn sql_emitter(&self) -> SqlEmitter {
        self.dialects
            .values()
            .cloned()
            .fold(SqlEmitter::new(), SqlEmitter::with_dialect)
    }

    /// Emitter registry built from these options.
    pub fn emitter_registry(&self) -> EmitterRegistry {
        EmitterRegistry::empty()
            .with_emitter(Arc::new(self.sql_emitter()))
            .with_emitter(Arc::new(PipelineEmitter::new()))
    }
}

fn invalid(name: &str, field: &str, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: format!("dialects.{name}.{field}"),
        value: value.into(),
    }
}

fn build_dialect(name: &str, raw: RawDialect) -> Result<SqlDialect, ConfigError> {
    let base = raw.base.as_deref().unwrap_or("ansi");
    let mut dialect = SqlDialect::preset(base, raw.version.as_deref())
        .ok_or_else(|| ConfigError::UnknownDialect {
            name: name.to_owned(),
            base: base.to_owned(),
        })?
        .renamed(name);
    if let Some(quote) = raw.quote {
        let mut chars = quote.chars();
        dialect.quote = match (chars.next(), chars.next(), chars.next()) {
            (None, _, _) => None,
            (Some(open), None, _) => Some((open, open)),
            (Some(open), Some(close), None) => Some((open, close)),
            _ => return Err(invalid(name, "quote", quote)),
        };
    }
    if let Some(text) = raw.null_collation {
        dialect.null_collation =
            NullCollation::parse(&text).ok_or_else(|| invalid(name, "null_collation", text))?;
    }
    if let Some(text) = raw.offset_fetch {
        dialect.offset_fetch = match text.as_str() {
            "limit-offset" => OffsetFetchStyle::LimitOffset,
            "offset-fetch" => OffsetFetchStyle::OffsetFetch,
            _ => return Err(invalid(name, "offset_fetch", text)),
        };
    }
    if let Some(text) = raw.substring {
        dialect.substring = match text.as_str() {
            "from-for" => SubstringStyle::FromFor,
            "substr" => SubstringStyle::Substr,
            "mssql" => SubstringStyle::Mssql,
            _ => return Err(invalid(name, "substring", text)),
        };
    }
    let flags = [
        (raw.supports_nulls_syntax, &mut dialect.supports_nulls_syntax),
        (
            raw.supports_nested_aggregations,
            &mut dialect.supports_nested_aggregations,
        ),
        (
            raw.offset_fetch_needs_order_by,
            &mut dialect.offset_fetch_needs_order_by,
        ),
        (raw.set_op_distinct_keyword, &mut dialect.set_op_distinct_keyword),
        (raw.alias_with_as, &mut dialect.alias_with_as),
        (raw.cast_params, &mut dialect.cast_params),
        (raw.values_in_from, &mut dialect.values_in_from),
        (raw.boolean_literals, &mut dialect.boolean_literals),
        (raw.array_literals, &mut dialect.array_literals),
        (
            raw.parenthesized_set_operands,
            &mut dialect.parenthesized_set_operands,
        ),
    ];
    for (value, slot) in flags {
        if let Some(value) = value {
            *slot = value;
        }
    }
    if let Some(keyword) = raw.minus_keyword {
        dialect.minus_keyword = keyword;
    }
    if raw.dual_table.is_some() {
        dialect.dual_table = raw.dual_table;
    }
    dialect.functions.extend(raw.functions);
    dialect.cast_types.extend(raw.cast_types);
    dialect.max_precision.extend(raw.max_precision);
    Ok(dialect)
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    planner: PlannerSection,
    #[serde(default)]
    execution: ExecutionSection,
    #[serde(default)]
    dialects: BTreeMap<String, RawDialect>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlannerSection {
    target: Option<String>,
    simplify: Option<bool>,
    max_simplify_passes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExecutionSection {
    fetch_batch_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDialect {
    base: Option<String>,
    version: Option<String>,
    quote: Option<String>,
    null_collation: Option<String>,
    offset_fetch: Option<String>,
    substring: Option<String>,
    supports_nulls_syntax: Option<bool>,
    supports_nested_aggregations: Option<bool>,
    offset_fetch_needs_order_by: Option<bool>,
    set_op_distinct_keyword: Option<bool>,
    alias_with_as: Option<bool>,
    cast_params: Option<bool>,
    values_in_from: Option<bool>,
    boolean_literals: Option<bool>,
    array_literals: Option<bool>,
    parenthesized_set_operands: Option<bool>,
    minus_keyword: Option<String>,
    dual_table: Option<String>,
    #[serde(default)]
    functions: BTreeMap<String, String>,
    #[serde(default)]
    cast_types: BTreeMap<String, String>,
    #[serde(default)]
    max_precision: BTreeMap<String, u32>,
}

/// Failure to load compiler options.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read compiler config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for the expected layout.
    #[error("failed to parse compiler config {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// A custom dialect names a base that is not a preset.
    #[error("dialect '{name}' is based on unknown preset '{base}'")]
    UnknownDialect {
        /// Custom dialect name.
        name: String,
        /// Requested base.
        base: String,
    },
    /// A setting holds a value outside its domain.
    #[error("invalid value '{value}' for {key}")]
    InvalidValue {
        /// Dotted setting path.
        key: String,
        /// Offending value.
        value: String,
    },
}

impl ConfigError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "ConfigRead",
            ConfigError::Parse { .. } => "ConfigParse",
            ConfigError::UnknownDialect { .. } => "UnknownDialect",
            ConfigError::InvalidValue { .. } => "InvalidValue",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_defaults() {
        assert_eq!(CompilerOptions::from_toml_str("").unwrap(), CompilerOptions::default());
    }

    #[test]
    fn custom_dialect_overrides_its_base() {
        let options = CompilerOptions::from_toml_str(
            r#"
            [planner]
            simplify = false

            [dialects.warehouse]
            base = "mysql"
            quote = "[]"
            null_collation = "high"
            cast_types = { DOUBLE = "DECIMAL(30, 10)" }
            "#,
        )
        .unwrap();
        assert!(!options.simplify);
        let warehouse = &options.dialects["warehouse"];
        assert_eq!(warehouse.name, "warehouse");
        assert_eq!(warehouse.quote, Some(('[', ']')));
        assert_eq!(warehouse.null_collation, NullCollation::High);
        assert_eq!(warehouse.cast_types["DOUBLE"], "DECIMAL(30, 10)");
        assert_eq!(warehouse.cast_types["INTEGER"], "SIGNED");
        assert!(options.sql_emitter().dialect("warehouse").is_some());
    }

    #[test]
    fn unknown_base_and_bad_values_are_reported() {
        let err = CompilerOptions::from_toml_str("[dialects.x]\nbase = \"db2\"").unwrap_err();
        assert_eq!(err.code(), "UnknownDialect");
        let err = CompilerOptions::from_toml_str("[dialects.x]\nnull_collation = \"middle\"").unwrap_err();
        assert_eq!(err.to_string(), "invalid value 'middle' for dialects.x.null_collation");
        let err = CompilerOptions::from_toml_str("[planner]\ntarget = \"NONE\"").unwrap_err();
        assert_eq!(err.code(), "InvalidValue");
    }
}

//! Immutable SQL dialect descriptors and the built-in presets.
//!
//! A descriptor is plain data: every quirk the unparser honours is a field,
//! so a configuration file can derive a custom dialect from a preset by
//! overriding individual fields.

use std::collections::BTreeMap;

use crate::plan::NullDirection;
use crate::types::SqlType;

/// Where a dialect sorts nulls when the query does not say.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NullCollation {
    /// Unknown; never assumed to match a requested position.
    None,
    /// Nulls first in either direction.
    First,
    /// Nulls last in either direction.
    Last,
    /// Nulls sort as the smallest value.
    Low,
    /// Nulls sort as the largest value.
    High,
}

impl NullCollation {
    /// Whether nulls come first for a key in the given direction, or `None`
    /// when the position is unknown.
    pub fn nulls_first(self, descending: bool) -> Option<bool> {
        match self {
            NullCollation::None => None,
            NullCollation::First => Some(true),
            NullCollation::Last => Some(false),
            NullCollation::Low => Some(!descending),
            NullCollation::High => Some(descending),
        }
    }

    /// Parses the configuration spelling (`none`, `first`, `last`, `low`,
    /// `high`).
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "none" => Some(NullCollation::None),
            "first" => Some(NullCollation::First),
            "last" => Some(NullCollation::Last),
            "low" => Some(NullCollation::Low),
            "high" => Some(NullCollation::High),
            _ => None,
        }
    }
}

/// Row-limiting syntax.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OffsetFetchStyle {
    /// `LIMIT n OFFSET m`
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`
    OffsetFetch,
}

/// Spelling of the substring function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubstringStyle {
    /// `SUBSTRING(s FROM a FOR b)`
    FromFor,
    /// `SUBSTR(s, a, b)`
    Substr,
    /// `SUBSTRING(s, a, b)`, where the length is mandatory.
    Mssql,
}

/// How a sort key's null position is rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullsRendering {
    /// The dialect default already yields the requested position.
    Native,
    /// `NULLS FIRST` (`true`) or `NULLS LAST` (`false`).
    Syntax(bool),
    /// An extra `x IS NULL` key: descending for nulls first.
    Emulate(bool),
}

/// Everything the SQL unparser needs to know about a target system.
#[derive(Clone, Debug, PartialEq)]
pub struct SqlDialect {
    /// Dialect name; also the parameter of [`crate::plan::Convention::Sql`].
    pub name: String,
    /// Product version, when quirks depend on it.
    pub version: Option<String>,
    /// Identifier quote pair; `None` leaves identifiers unquoted.
    pub quote: Option<(char, char)>,
    /// Default null position.
    pub null_collation: NullCollation,
    /// Whether `NULLS FIRST` / `NULLS LAST` is accepted.
    pub supports_nulls_syntax: bool,
    /// Whether `AGG(AGG(x))` is accepted.
    pub supports_nested_aggregations: bool,
    /// Row-limiting syntax.
    pub offset_fetch: OffsetFetchStyle,
    /// Whether OFFSET/FETCH is only valid after an ORDER BY.
    pub offset_fetch_needs_order_by: bool,
    /// Whether `UNION`/`INTERSECT` need an explicit `DISTINCT`.
    pub set_op_distinct_keyword: bool,
    /// Keyword for set difference.
    pub minus_keyword: String,
    /// Whether aliases are introduced with `AS`.
    pub alias_with_as: bool,
    /// Whether dynamic parameters are wrapped in `CAST(? AS type)`.
    pub cast_params: bool,
    /// Whether `VALUES` may appear in `FROM`.
    pub values_in_from: bool,
    /// Whether `TRUE` and `FALSE` literals exist. Dialects without them
    /// cannot sort by a predicate either.
    pub boolean_literals: bool,
    /// Whether array values and element access are supported.
    pub array_literals: bool,
    /// Whether a set-operation operand may be a parenthesized query. When
    /// not, operands with their own ORDER BY, LIMIT or set operation are
    /// selected from a derived table instead.
    pub parenthesized_set_operands: bool,
    /// Substring spelling.
    pub substring: SubstringStyle,
    /// Function renames keyed by the standard name (`CHAR_LENGTH`, `MOD`,
    /// `||`, ...). A mapping to `%` renders `MOD` as an operator.
    pub functions: BTreeMap<String, String>,
    /// Cast target renames keyed by [`SqlType::type_name`].
    pub cast_types: BTreeMap<String, String>,
    /// Maximum precision (or length) keyed by [`SqlType::type_name`].
    pub max_precision: BTreeMap<String, u32>,
    /// Table to select literals from when `FROM` is mandatory.
    pub dual_table: Option<String>,
}

/// Names accepted by [`SqlDialect::preset`].
pub const PRESET_NAMES: [&str; 8] = [
    "ansi",
    "postgresql",
    "mysql",
    "hive",
    "mssql",
    "oracle",
    "bigquery",
    "sqlite",
];

impl SqlDialect {
    /// ANSI SQL:2008.
    pub fn ansi() -> Self {
        Self {
            name: "ansi".into(),
            version: None,
            quote: Some(('"', '"')),
            null_collation: NullCollation::High,
            supports_nulls_syntax: true,
            supports_nested_aggregations: true,
            offset_fetch: OffsetFetchStyle::OffsetFetch,
            offset_fetch_needs_order_by: false,
            set_op_distinct_keyword: false,
            minus_keyword: "EXCEPT".into(),
            alias_with_as: true,
            cast_params: true,
            values_in_from: true,
            boolean_literals: true,
            array_literals: false,
            parenthesized_set_operands: true,
            substring: SubstringStyle::FromFor,
            functions: BTreeMap::new(),
            cast_types: BTreeMap::new(),
            max_precision: BTreeMap::new(),
            dual_table: None,
        }
    }

    /// PostgreSQL.
    pub fn postgresql() -> Self {
        Self {
            name: "postgresql".into(),
            offset_fetch: OffsetFetchStyle::LimitOffset,
            supports_nested_aggregations: false,
            array_literals: true,
            cast_types: renames([("DOUBLE", "DOUBLE PRECISION"), ("VARBINARY", "BYTEA")]),
            max_precision: precisions([("DECIMAL", 1000), ("VARCHAR", 10_485_760)]),
            ..Self::ansi()
        }
    }

    /// MySQL.
    pub fn mysql() -> Self {
        Self {
            name: "mysql".into(),
            quote: Some(('`', '`')),
            null_collation: NullCollation::Low,
            supports_nulls_syntax: false,
            supports_nested_aggregations: false,
            offset_fetch: OffsetFetchStyle::LimitOffset,
            cast_params: false,
            values_in_from: false,
            functions: renames([("||", "CONCAT")]),
            cast_types: renames([
                ("BIGINT", "SIGNED"),
                ("INTEGER", "SIGNED"),
                ("VARCHAR", "CHAR"),
                ("VARBINARY", "BINARY"),
                ("TIMESTAMP", "DATETIME"),
            ]),
            max_precision: precisions([("DECIMAL", 65), ("VARCHAR", 65_535)]),
            ..Self::ansi()
        }
    }

    /// Apache Hive; `NULLS FIRST/LAST` exists from version 2.1.
    pub fn hive(version: Option<&str>) -> Self {
        let nulls_syntax = version
            .and_then(parse_version)
            .map(|v| v >= (2, 1))
            .unwrap_or(false);
        Self {
            name: "hive".into(),
            version: version.map(str::to_owned),
            quote: Some(('`', '`')),
            null_collation: NullCollation::Low,
            supports_nulls_syntax: nulls_syntax,
            supports_nested_aggregations: false,
            offset_fetch: OffsetFetchStyle::LimitOffset,
            cast_params: false,
            values_in_from: false,
            array_literals: true,
            substring: SubstringStyle::Substr,
            functions: renames([("CHAR_LENGTH", "LENGTH")]),
            cast_types: renames([("VARCHAR", "STRING"), ("VARBINARY", "BINARY")]),
            max_precision: precisions([("DECIMAL", 38)]),
            ..Self::ansi()
        }
    }

    /// Microsoft SQL Server.
    pub fn mssql() -> Self {
        Self {
            name: "mssql".into(),
            quote: Some(('[', ']')),
            null_collation: NullCollation::Low,
            supports_nulls_syntax: false,
            supports_nested_aggregations: false,
            offset_fetch_needs_order_by: true,
            cast_params: false,
            values_in_from: true,
            boolean_literals: false,
            substring: SubstringStyle::Mssql,
            functions: renames([("CHAR_LENGTH", "LEN"), ("MOD", "%"), ("||", "CONCAT")]),
            cast_types: renames([
                ("DOUBLE", "FLOAT"),
                ("BOOLEAN", "BIT"),
                ("TIMESTAMP", "DATETIME2"),
            ]),
            max_precision: precisions([("DECIMAL", 38), ("VARCHAR", 8000)]),
            ..Self::ansi()
        }
    }

    /// Oracle Database.
    pub fn oracle() -> Self {
        Self {
            name: "oracle".into(),
            alias_with_as: false,
            values_in_from: false,
            boolean_literals: false,
            minus_keyword: "MINUS".into(),
            substring: SubstringStyle::Substr,
            functions: renames([("CHAR_LENGTH", "LENGTH")]),
            cast_types: renames([
                ("VARCHAR", "VARCHAR2"),
                ("DOUBLE", "BINARY_DOUBLE"),
                ("BIGINT", "NUMBER(19)"),
                ("INTEGER", "NUMBER(10)"),
                ("BOOLEAN", "NUMBER(1)"),
                ("VARBINARY", "RAW"),
            ]),
            max_precision: precisions([("DECIMAL", 38), ("VARCHAR", 4000)]),
            dual_table: Some("DUAL".into()),
            ..Self::ansi()
        }
    }

    /// Google BigQuery.
    pub fn bigquery() -> Self {
        Self {
            name: "bigquery".into(),
            quote: Some(('`', '`')),
            null_collation: NullCollation::Low,
            supports_nested_aggregations: false,
            offset_fetch: OffsetFetchStyle::LimitOffset,
            set_op_distinct_keyword: true,
            minus_keyword: "EXCEPT".into(),
            cast_params: false,
            values_in_from: false,
            array_literals: true,
            substring: SubstringStyle::Substr,
            functions: renames([("CHAR_LENGTH", "LENGTH"), ("ARRAY", ""), ("ITEM", "ORDINAL")]),
            cast_types: renames([
                ("BIGINT", "INT64"),
                ("INTEGER", "INT64"),
                ("DOUBLE", "FLOAT64"),
                ("VARCHAR", "STRING"),
                ("BOOLEAN", "BOOL"),
                ("DECIMAL", "NUMERIC"),
                ("VARBINARY", "BYTES"),
            ]),
            ..Self::ansi()
        }
    }

    /// SQLite.
    pub fn sqlite() -> Self {
        Self {
            name: "sqlite".into(),
            null_collation: NullCollation::Low,
            supports_nested_aggregations: false,
            offset_fetch: OffsetFetchStyle::LimitOffset,
            cast_params: false,
            values_in_from: false,
            parenthesized_set_operands: false,
            substring: SubstringStyle::Substr,
            functions: renames([("CHAR_LENGTH", "LENGTH"), ("MOD", "%")]),
            cast_types: renames([
                ("DOUBLE", "REAL"),
                ("VARCHAR", "TEXT"),
                ("BOOLEAN", "INTEGER"),
                ("VARBINARY", "BLOB"),
            ]),
            ..Self::ansi()
        }
    }

    /// Preset by name; `version` only matters for dialects with
    /// version-dependent quirks.
    pub fn preset(name: &str, version: Option<&str>) -> Option<Self> {
        let dialect = match name.to_ascii_lowercase().as_str() {
            "ansi" => Self::ansi(),
            "postgresql" | "postgres" => Self::postgresql(),
            "mysql" => Self::mysql(),
            "hive" => Self::hive(version),
            "mssql" | "sqlserver" => Self::mssql(),
            "oracle" => Self::oracle(),
            "bigquery" => Self::bigquery(),
            "sqlite" => Self::sqlite(),
            _ => return None,
        };
        Some(Self {
            version: version.map(str::to_owned).or(dialect.version.clone()),
            ..dialect
        })
    }

    /// Same descriptor under another name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Whether nulls come first by default for a key in the given
    /// direction; `None` when unknown.
    pub fn default_nulls_first(&self, descending: bool) -> Option<bool> {
        self.null_collation.nulls_first(descending)
    }

    /// How to obtain the requested null position for one sort key.
    pub fn nulls_rendering(&self, nulls: NullDirection, descending: bool) -> NullsRendering {
        let wanted = match nulls {
            NullDirection::First => true,
            NullDirection::Last => false,
            NullDirection::Unspecified => return NullsRendering::Native,
        };
        if self.default_nulls_first(descending) == Some(wanted) {
            NullsRendering::Native
        } else if self.supports_nulls_syntax {
            NullsRendering::Syntax(wanted)
        } else {
            NullsRendering::Emulate(wanted)
        }
    }

    /// Quotes one identifier, doubling embedded closing quotes.
    pub fn quote_identifier(&self, name: &str) -> String {
        match self.quote {
            Some((open, close)) => {
                let mut quoted = String::with_capacity(name.len() + 2);
                quoted.push(open);
                for ch in name.chars() {
                    if ch == close {
                        quoted.push(close);
                    }
                    quoted.push(ch);
                }
                quoted.push(close);
                quoted
            }
            None => name.to_owned(),
        }
    }

    /// Dialect spelling of a standard function or operator name.
    pub fn function_name<'a>(&'a self, standard: &'a str) -> &'a str {
        self.functions
            .get(standard)
            .map(String::as_str)
            .unwrap_or(standard)
    }

    /// Cast target spelling for `ty`, clamped to the dialect's precision.
    pub fn cast_type_name(&self, ty: &SqlType) -> String {
        if let Some(renamed) = self.cast_types.get(ty.type_name()) {
            return renamed.clone();
        }
        let clamp = |value: u32| {
            self.max_precision
                .get(ty.type_name())
                .map(|max| value.min(*max))
                .unwrap_or(value)
        };
        match ty {
            SqlType::Varchar(Some(len)) => format!("VARCHAR({})", clamp(*len)),
            SqlType::Decimal { precision, scale } => {
                let precision = clamp(*precision);
                format!("DECIMAL({precision}, {})", (*scale).min(precision))
            }
            SqlType::Array(inner) => format!("{} ARRAY", self.cast_type_name(inner)),
            other => other.type_name().to_owned(),
        }
    }
}

fn renames<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(from, to)| (from.to_owned(), to.to_owned()))
        .collect()
}

fn precisions<const N: usize>(pairs: [(&str, u32); N]) -> BTreeMap<String, u32> {
    pairs
        .into_iter()
        .map(|(ty, max)| (ty.to_owned(), max))
        .collect()
}

fn parse_version(text: &str) -> Option<(u32, u32)> {
    let mut parts = text.split('.');
    let major = parts.next()?.trim().parse().ok()?;
    let minor = parts
        .next()
        .map(|minor| minor.trim().parse().ok())
        .unwrap_or(Some(0))?;
    Some((major, minor))
}

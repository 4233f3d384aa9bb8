#![forbid(unsafe_code)]

//! Semantic types and row schemas.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Semantic type of a field or expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    /// Three-valued boolean.
    Boolean,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Double precision float.
    Double,
    /// Exact numeric with precision and scale.
    Decimal {
        /// Total digits.
        precision: u32,
        /// Digits after the decimal point.
        scale: u32,
    },
    /// Character string with optional maximum length.
    Varchar(Option<u32>),
    /// Binary string.
    Binary,
    /// Calendar date.
    Date,
    /// Timestamp without time zone.
    Timestamp,
    /// Multi-valued column.
    Array(Box<SqlType>),
    /// Unknown or polymorphic type.
    Any,
    /// Type of the `NULL` literal.
    Null,
}

impl SqlType {
    /// Whether the type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::Integer | SqlType::BigInt | SqlType::Double | SqlType::Decimal { .. }
        )
    }

    /// Whether the type is an exact integer type.
    pub fn is_integral(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt)
    }

    /// Whether the type is a string type.
    pub fn is_character(&self) -> bool {
        matches!(self, SqlType::Varchar(_))
    }

    /// Type name without parameters, used as key in dialect tables.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE",
            SqlType::Decimal { .. } => "DECIMAL",
            SqlType::Varchar(_) => "VARCHAR",
            SqlType::Binary => "VARBINARY",
            SqlType::Date => "DATE",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Array(_) => "ARRAY",
            SqlType::Any => "ANY",
            SqlType::Null => "NULL",
        }
    }

    /// Least restrictive numeric type of two operands.
    pub fn numeric_join(&self, other: &SqlType) -> SqlType {
        match (self, other) {
            (SqlType::Double, _) | (_, SqlType::Double) => SqlType::Double,
            (SqlType::Decimal { .. }, _) | (_, SqlType::Decimal { .. }) => SqlType::Double,
            (SqlType::BigInt, _) | (_, SqlType::BigInt) => SqlType::BigInt,
            (SqlType::Integer, SqlType::Integer) => SqlType::Integer,
            (SqlType::Null, other) | (other, SqlType::Null) => other.clone(),
            _ => SqlType::Any,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Decimal { precision, scale } => write!(f, "DECIMAL({precision}, {scale})"),
            SqlType::Varchar(Some(len)) => write!(f, "VARCHAR({len})"),
            SqlType::Array(inner) => write!(f, "{inner} ARRAY"),
            other => f.write_str(other.type_name()),
        }
    }
}

/// Single named, typed column of a row type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Semantic type.
    pub ty: SqlType,
    /// Whether the column admits `NULL`.
    pub nullable: bool,
}

impl Field {
    /// Creates a nullable field.
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
        }
    }

    /// Creates a non-nullable field.
    pub fn not_null(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
        }
    }
}

/// Ordered, immutable row schema. Clones share the field list.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RowType {
    fields: Arc<[Field]>,
}

impl RowType {
    /// Creates a row type from its fields.
    pub fn new(fields: impl Into<Vec<Field>>) -> Self {
        Self {
            fields: fields.into().into(),
        }
    }

    /// Row type with no columns.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Single non-null `BIGINT` column named `ROWCOUNT`, the output of DML.
    pub fn row_count() -> Self {
        Self::new(vec![Field::not_null("ROWCOUNT", SqlType::BigInt)])
    }

    /// Fields in order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the row type has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field at `index`, if any.
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Position of the first field called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Field names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    /// Compatible row types agree on field count, order and types; names and
    /// nullability may differ.
    pub fn is_compatible(&self, other: &RowType) -> bool {
        self.len() == other.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.ty == b.ty || a.ty == SqlType::Any || b.ty == SqlType::Any)
    }

    /// Concatenation of two row types, as produced by a join. Fields of the
    /// right side become nullable when `right_nullable` is set, and likewise
    /// for the left side.
    pub fn join(&self, right: &RowType, left_nullable: bool, right_nullable: bool) -> RowType {
        let mut fields = Vec::with_capacity(self.len() + right.len());
        let mut names: Vec<String> = Vec::with_capacity(self.len() + right.len());
        for field in self.fields.iter() {
            let mut field = field.clone();
            field.nullable |= left_nullable;
            names.push(field.name.clone());
            fields.push(field);
        }
        for field in right.fields.iter() {
            let mut field = field.clone();
            field.nullable |= right_nullable;
            field.name = uniquify(&field.name, &names);
            names.push(field.name.clone());
            fields.push(field);
        }
        RowType::new(fields)
    }

    /// Same types with new names.
    pub fn rename<I, S>(&self, names: I) -> RowType
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = self
            .fields
            .iter()
            .zip(names)
            .map(|(field, name)| Field {
                name: name.into(),
                ty: field.ty.clone(),
                nullable: field.nullable,
            })
            .collect::<Vec<_>>();
        RowType::new(fields)
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", field.name, field.ty)?;
            if !field.nullable {
                f.write_str(" NOT NULL")?;
            }
        }
        f.write_str(")")
    }
}

/// Returns `name`, or `name` suffixed with the first free counter (`name0`,
/// `name1`, ...) when it collides with `taken`.
pub fn uniquify(name: &str, taken: &[String]) -> String {
    if !taken.iter().any(|existing| existing == name) {
        return name.to_owned();
    }
    (0..)
        .map(|i| format!("{name}{i}"))
        .find(|candidate| !taken.iter().any(|existing| existing == candidate))
        .unwrap_or_else(|| name.to_owned())
}

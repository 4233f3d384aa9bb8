//! Physical traits attached to every plan node: calling convention,
//! collation and distribution.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Execution backend family a node is implemented in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Convention {
    /// Logical; not executable.
    None,
    /// In-process pull iterators.
    PullIterator,
    /// SQL text for the named dialect.
    Sql(String),
    /// Document-store aggregation pipeline.
    DocumentPipeline,
}

/// Convention without its parameters; registries are keyed by kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConventionKind {
    /// See [`Convention::None`].
    None,
    /// See [`Convention::PullIterator`].
    PullIterator,
    /// See [`Convention::Sql`].
    Sql,
    /// See [`Convention::DocumentPipeline`].
    DocumentPipeline,
}

impl Convention {
    /// SQL convention for `dialect`.
    pub fn sql(dialect: impl Into<String>) -> Self {
        Convention::Sql(dialect.into())
    }

    /// Parameterless kind.
    pub fn kind(&self) -> ConventionKind {
        match self {
            Convention::None => ConventionKind::None,
            Convention::PullIterator => ConventionKind::PullIterator,
            Convention::Sql(_) => ConventionKind::Sql,
            Convention::DocumentPipeline => ConventionKind::DocumentPipeline,
        }
    }

    /// Whether this is the logical convention.
    pub fn is_none(&self) -> bool {
        matches!(self, Convention::None)
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Convention::None => f.write_str("NONE"),
            Convention::PullIterator => f.write_str("pull-iterator"),
            Convention::Sql(dialect) => write!(f, "sql:{dialect}"),
            Convention::DocumentPipeline => f.write_str("document-pipeline"),
        }
    }
}

impl FromStr for Convention {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NONE" | "none" => Ok(Convention::None),
            "pull-iterator" => Ok(Convention::PullIterator),
            "document-pipeline" => Ok(Convention::DocumentPipeline),
            other => match other.strip_prefix("sql:") {
                Some(dialect) if !dialect.is_empty() => Ok(Convention::sql(dialect)),
                _ => Err(Error::unsupported(
                    "planner",
                    other,
                    format!("unknown calling convention '{other}'"),
                )),
            },
        }
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Ascending.
    Ascending,
    /// Descending.
    Descending,
}

/// Requested null position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NullDirection {
    /// Nulls before non-null values.
    First,
    /// Nulls after non-null values.
    Last,
    /// Engine default; nulls sort high.
    Unspecified,
}

/// Sort key over one field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldCollation {
    /// Field position.
    pub field: usize,
    /// Direction.
    pub direction: Direction,
    /// Null position.
    pub nulls: NullDirection,
}

impl FieldCollation {
    /// Ascending key with unspecified null position.
    pub fn asc(field: usize) -> Self {
        Self {
            field,
            direction: Direction::Ascending,
            nulls: NullDirection::Unspecified,
        }
    }

    /// Descending key with unspecified null position.
    pub fn desc(field: usize) -> Self {
        Self {
            field,
            direction: Direction::Descending,
            nulls: NullDirection::Unspecified,
        }
    }

    /// Same key with nulls first.
    pub fn nulls_first(mut self) -> Self {
        self.nulls = NullDirection::First;
        self
    }

    /// Same key with nulls last.
    pub fn nulls_last(mut self) -> Self {
        self.nulls = NullDirection::Last;
        self
    }

    /// Whether the key is descending.
    pub fn is_descending(&self) -> bool {
        self.direction == Direction::Descending
    }

    /// Whether nulls come first once the unspecified default (nulls high)
    /// is resolved.
    pub fn nulls_first_effective(&self) -> bool {
        match self.nulls {
            NullDirection::First => true,
            NullDirection::Last => false,
            NullDirection::Unspecified => self.is_descending(),
        }
    }
}

impl fmt::Display for FieldCollation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.field)?;
        if self.is_descending() {
            f.write_str(" DESC")?;
        }
        match self.nulls {
            NullDirection::First => f.write_str(" NULLS FIRST"),
            NullDirection::Last => f.write_str(" NULLS LAST"),
            NullDirection::Unspecified => Ok(()),
        }
    }
}

/// Ordered list of sort keys; empty means unordered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Collation(Vec<FieldCollation>);

impl Collation {
    /// Collation over `keys`.
    pub fn new(keys: impl Into<Vec<FieldCollation>>) -> Self {
        Self(keys.into())
    }

    /// Unordered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sort keys in priority order.
    pub fn keys(&self) -> &[FieldCollation] {
        &self.0
    }

    /// Whether no order is imposed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// An ordering satisfies `required` when `required` is a prefix of it.
    pub fn satisfies(&self, required: &Collation) -> bool {
        required.0.len() <= self.0.len() && self.0.iter().zip(&required.0).all(|(a, b)| a == b)
    }

    /// Re-indexes the keys, truncating at the first key whose field has no
    /// image.
    pub fn remap(&self, mapping: &impl Fn(usize) -> Option<usize>) -> Collation {
        Collation(
            self.0
                .iter()
                .map_while(|key| {
                    mapping(key.field).map(|field| FieldCollation { field, ..*key })
                })
                .collect(),
        )
    }
}

impl fmt::Display for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}")?;
        }
        f.write_str("]")
    }
}

/// How rows are spread across partitions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Distribution {
    /// Unconstrained.
    #[default]
    Any,
    /// All rows in one partition.
    Singleton,
    /// Partitioned by a hash of the key fields.
    Hash(Vec<usize>),
    /// Partitioned by ranges of the key fields.
    Range(Vec<usize>),
    /// Rows dealt out in turn.
    RoundRobin,
    /// Every partition holds every row.
    Broadcast,
    /// Arbitrary partition per row.
    Random,
}

impl Distribution {
    /// Whether a node with this distribution meets `required`.
    pub fn satisfies(&self, required: &Distribution) -> bool {
        matches!(required, Distribution::Any) || self == required
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distribution::Any => f.write_str("any"),
            Distribution::Singleton => f.write_str("single"),
            Distribution::Hash(keys) => write!(f, "hash{keys:?}"),
            Distribution::Range(keys) => write!(f, "range{keys:?}"),
            Distribution::RoundRobin => f.write_str("rr"),
            Distribution::Broadcast => f.write_str("broadcast"),
            Distribution::Random => f.write_str("random"),
        }
    }
}

/// One value per trait dimension.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TraitSet {
    /// Calling convention.
    pub convention: Convention,
    /// Output order.
    pub collation: Collation,
    /// Partitioning.
    pub distribution: Distribution,
}

impl Default for TraitSet {
    fn default() -> Self {
        Self::logical()
    }
}

impl TraitSet {
    /// Unconstrained logical traits.
    pub fn logical() -> Self {
        Self {
            convention: Convention::None,
            collation: Collation::empty(),
            distribution: Distribution::Any,
        }
    }

    /// Same traits in another convention.
    pub fn with_convention(&self, convention: Convention) -> Self {
        Self {
            convention,
            ..self.clone()
        }
    }

    /// Same traits with another collation.
    pub fn with_collation(&self, collation: Collation) -> Self {
        Self {
            collation,
            ..self.clone()
        }
    }

    /// Whether these traits meet `required` in every dimension; a logical
    /// requirement accepts any convention.
    pub fn satisfies(&self, required: &TraitSet) -> bool {
        (required.convention.is_none() || self.convention == required.convention)
            && self.collation.satisfies(&required.collation)
            && self.distribution.satisfies(&required.distribution)
    }
}

impl fmt::Display for TraitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.convention)?;
        if !self.collation.is_empty() {
            write!(f, ".{}", self.collation)?;
        }
        if self.distribution != Distribution::Any {
            write!(f, ".{}", self.distribution)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convention_display_and_parse() {
        for text in ["NONE", "pull-iterator", "sql:postgresql", "document-pipeline"] {
            let convention: Convention = text.parse().unwrap();
            assert_eq!(convention.to_string(), text);
        }
        assert!("sql:".parse::<Convention>().is_err());
        assert_eq!(Convention::sql("hive").kind(), ConventionKind::Sql);
    }

    #[test]
    fn unspecified_nulls_sort_high() {
        assert!(!FieldCollation::asc(0).nulls_first_effective());
        assert!(FieldCollation::desc(0).nulls_first_effective());
        assert!(!FieldCollation::desc(0).nulls_last().nulls_first_effective());
    }

    #[test]
    fn collation_prefix_satisfies() {
        let ab = Collation::new(vec![FieldCollation::asc(0), FieldCollation::desc(1)]);
        let a = Collation::new(vec![FieldCollation::asc(0)]);
        assert!(ab.satisfies(&a));
        assert!(!a.satisfies(&ab));
        assert!(a.satisfies(&Collation::empty()));
        assert_eq!(ab.remap(&|i| (i == 0).then_some(3)).keys().len(), 1);
    }

    #[test]
    fn logical_requirement_accepts_any_convention() {
        let physical = TraitSet::logical().with_convention(Convention::PullIterator);
        assert!(physical.satisfies(&TraitSet::logical()));
        assert!(!TraitSet::logical().satisfies(&physical));
        assert_eq!(physical.to_string(), "pull-iterator");
    }
}

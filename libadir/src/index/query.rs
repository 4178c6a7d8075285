// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::cmp::Ordering;

use sqlx::{QueryBuilder, Sqlite};

use crate::naming::version;

use super::Error;

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

/// The closed set of searchable attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Attribute {
    Name,
    Version,
    SkillId,
    SkillName,
    Locator,
    ModuleName,
    ModuleId,
    DomainId,
    DomainName,
    Author,
    CreatedAt,
    SchemaVersion,
}

impl Attribute {
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "name" => Ok(Self::Name),
            "version" => Ok(Self::Version),
            "skill-id" => Ok(Self::SkillId),
            "skill-name" => Ok(Self::SkillName),
            "locator" => Ok(Self::Locator),
            "module-name" => Ok(Self::ModuleName),
            "module-id" => Ok(Self::ModuleId),
            "domain-id" => Ok(Self::DomainId),
            "domain-name" => Ok(Self::DomainName),
            "author" => Ok(Self::Author),
            "created-at" => Ok(Self::CreatedAt),
            "schema-version" => Ok(Self::SchemaVersion),
            other => Err(Error::UnknownAttribute(other.to_owned())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Version => "version",
            Self::SkillId => "skill-id",
            Self::SkillName => "skill-name",
            Self::Locator => "locator",
            Self::ModuleName => "module-name",
            Self::ModuleId => "module-id",
            Self::DomainId => "domain-id",
            Self::DomainName => "domain-name",
            Self::Author => "author",
            Self::CreatedAt => "created-at",
            Self::SchemaVersion => "schema-version",
        }
    }

    fn target(&self) -> Target {
        match self {
            Self::Name => Target::Column("r.name"),
            Self::Version => Target::Column("r.version"),
            Self::CreatedAt => Target::Column("r.created_at"),
            Self::SchemaVersion => Target::Column("r.schema_version"),
            Self::Author => Target::child("record_authors", "author"),
            Self::SkillName => Target::child("record_skills", "name"),
            Self::SkillId => Target::child("record_skills", "skill_id"),
            Self::Locator => Target::child("record_locators", "type"),
            Self::ModuleName => Target::child("record_modules", "name"),
            Self::ModuleId => Target::child("record_modules", "module_id"),
            Self::DomainName => Target::child("record_domains", "name"),
            Self::DomainId => Target::child("record_domains", "domain_id"),
        }
    }

    fn numeric(&self) -> bool {
        matches!(self, Self::SkillId | Self::ModuleId | Self::DomainId)
    }

    /// Attributes whose values admit `>= > <= < =` comparison prefixes.
    fn comparable(&self) -> bool {
        matches!(self, Self::Version | Self::CreatedAt)
    }
}

enum Target {
    Column(&'static str),
    Child { table: &'static str, column: &'static str },
}

impl Target {
    fn child(table: &'static str, column: &'static str) -> Self {
        Self::Child { table, column }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub attribute: Attribute,
    pub value: String,
}

#[derive(Clone, Debug, Default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl Query {
    pub fn filtered(filters: Vec<Filter>) -> Self {
        Self {
            filters,
            limit: None,
            offset: 0,
        }
    }

    pub fn effective_limit(&self) -> u32 {
        match self.limit {
            None | Some(0) => DEFAULT_LIMIT,
            Some(n) => n.min(MAX_LIMIT),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Op {
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
}

impl Op {
    fn parse(value: &str) -> Option<(Self, &str)> {
        for (prefix, op) in [
            (">=", Self::Ge),
            ("<=", Self::Le),
            (">", Self::Gt),
            ("<", Self::Lt),
            ("=", Self::Eq),
        ] {
            if let Some(rest) = value.strip_prefix(prefix) {
                return Some((op, rest.trim_start()));
            }
        }
        None
    }

    fn sql(&self) -> &'static str {
        match self {
            Self::Ge => ">=",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Lt => "<",
            Self::Eq => "=",
        }
    }

    pub(super) fn admits(&self, ord: Ordering) -> bool {
        match self {
            Self::Ge => ord != Ordering::Less,
            Self::Gt => ord == Ordering::Greater,
            Self::Le => ord != Ordering::Greater,
            Self::Lt => ord == Ordering::Less,
            Self::Eq => ord == Ordering::Equal,
        }
    }
}

#[derive(Clone, Debug)]
enum Shape {
    Eq(String),
    Like(String),
    Cmp(Op, String),
    Id(i64),
}

impl Shape {
    fn of(attribute: Attribute, value: &str) -> Result<Self, Error> {
        if attribute.numeric() {
            let id = value.parse::<i64>().map_err(|_| Error::Numeric {
                attribute: attribute.as_str(),
                value: value.to_owned(),
            })?;
            return Ok(Self::Id(id));
        }
        if attribute.comparable() {
            if let Some((op, rest)) = Op::parse(value) {
                return Ok(Self::Cmp(op, rest.to_owned()));
            }
        }
        Ok(if like_pattern(value).is_some() {
            // the raw glob is kept; LIKE translation happens at push time,
            // globset matching in the deferred version pass
            Self::Like(value.to_owned())
        } else {
            Self::Eq(value.to_owned())
        })
    }
}

/// A query compiled into SQL groups plus the version shapes that have to
/// run after the fact (semver order is not SQL order).
pub(super) struct Compiled {
    groups: Vec<(Attribute, Vec<Shape>)>,
    version_post: Vec<Shape>,
}

pub(super) fn compile(filters: &[Filter]) -> Result<Compiled, Error> {
    let mut groups: Vec<(Attribute, Vec<Shape>)> = Vec::new();
    for filter in filters {
        let shape = Shape::of(filter.attribute, &filter.value)?;
        match groups.iter_mut().find(|(attr, _)| *attr == filter.attribute) {
            Some((_, shapes)) => shapes.push(shape),
            None => groups.push((filter.attribute, vec![shape])),
        }
    }

    // a version group containing any comparison moves to the post pass
    // wholesale, keeping the within-attribute disjunction in one place
    let version_post = match groups
        .iter()
        .position(|(attr, shapes)| {
            *attr == Attribute::Version && shapes.iter().any(|s| matches!(s, Shape::Cmp(..)))
        }) {
        Some(pos) => groups.remove(pos).1,
        None => Vec::new(),
    };

    Ok(Compiled {
        groups,
        version_post,
    })
}

impl Compiled {
    pub(super) fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        let mut first = true;
        for (attribute, shapes) in &self.groups {
            qb.push(if first { " WHERE (" } else { " AND (" });
            first = false;

            let target = attribute.target();
            for (i, shape) in shapes.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                match &target {
                    Target::Column(column) => push_condition(qb, column, shape),
                    Target::Child { table, column } => {
                        qb.push("EXISTS (SELECT 1 FROM ");
                        qb.push(*table);
                        qb.push(" c WHERE c.cid = r.cid AND ");
                        push_condition(qb, &format!("c.{}", column), shape);
                        qb.push(")");
                    },
                }
            }
            qb.push(")");
        }
    }

    pub(super) fn paged_in_sql(&self) -> bool {
        self.version_post.is_empty()
    }

    /// Disjunction over the deferred version shapes; vacuously true.
    pub(super) fn version_matches(&self, recorded: &str) -> bool {
        if self.version_post.is_empty() {
            return true;
        }
        self.version_post.iter().any(|shape| match shape {
            Shape::Eq(value) => recorded == value,
            Shape::Like(glob) => globset::Glob::new(glob)
                .map(|g| g.compile_matcher().is_match(recorded))
                .unwrap_or(false),
            Shape::Cmp(op, bound) => op.admits(version::compare(recorded, bound)),
            Shape::Id(_) => false,
        })
    }
}

fn push_condition(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, shape: &Shape) {
    match shape {
        Shape::Eq(value) => {
            qb.push(column.to_owned());
            qb.push(" = ");
            qb.push_bind(value.clone());
        },
        Shape::Like(raw) => {
            let pattern = like_pattern(raw).unwrap_or_else(|| raw.clone());
            qb.push(column.to_owned());
            qb.push(" LIKE ");
            qb.push_bind(pattern);
            qb.push(" ESCAPE '\\'");
        },
        Shape::Cmp(op, value) => {
            qb.push(column.to_owned());
            qb.push(" ");
            qb.push(op.sql());
            qb.push(" ");
            qb.push_bind(value.clone());
        },
        Shape::Id(id) => {
            qb.push(column.to_owned());
            qb.push(" = ");
            qb.push_bind(*id);
        },
    }
}

/// Translate a glob into a LIKE pattern, or `None` when the value carries
/// no wildcard and plain equality applies.
fn like_pattern(glob: &str) -> Option<String> {
    let mut out = String::with_capacity(glob.len());
    let mut wild = false;
    for ch in glob.chars() {
        match ch {
            '*' => {
                wild = true;
                out.push('%');
            },
            '?' => {
                wild = true;
                out.push('_');
            },
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            },
            _ => out.push(ch),
        }
    }
    wild.then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn attribute_set_is_closed() {
        for known in [
            "name",
            "version",
            "skill-id",
            "skill-name",
            "locator",
            "module-name",
            "module-id",
            "domain-id",
            "domain-name",
            "author",
            "created-at",
            "schema-version",
        ] {
            let attribute = Attribute::parse(known).unwrap();
            assert_eq!(attribute.as_str(), known);
        }
        assert!(Attribute::parse("extension-name").is_err());
        assert!(Attribute::parse("extension-version").is_err());
    }

    #[test]
    fn like_patterns() {
        assert_eq!(like_pattern("nlp*"), Some("nlp%".to_owned()));
        assert_eq!(like_pattern("a?c"), Some("a_c".to_owned()));
        assert_eq!(like_pattern("50%*"), Some("50\\%%".to_owned()));
        assert_eq!(like_pattern("plain"), None);
    }

    #[test]
    fn comparison_prefixes() {
        assert!(matches!(Op::parse(">=v1.0.0"), Some((Op::Ge, "v1.0.0"))));
        assert!(matches!(Op::parse("<2024"), Some((Op::Lt, "2024"))));
        assert!(matches!(Op::parse("=x"), Some((Op::Eq, "x"))));
        assert!(Op::parse("v1.0.0").is_none());
    }

    #[test]
    fn numeric_attributes_reject_text() {
        assert!(matches!(
            Shape::of(Attribute::SkillId, "nlp"),
            Err(Error::Numeric { .. })
        ));
    }

    #[test]
    fn limit_defaults_and_caps() {
        assert_eq!(Query::default().effective_limit(), DEFAULT_LIMIT);
        assert_eq!(
            Query {
                limit: Some(5000),
                ..Query::default()
            }
            .effective_limit(),
            MAX_LIMIT
        );
    }
}

//! Field-name based predicates.
//!
//! # Responsibility
//! - Describe row predicates without binding them to an entity type.
//! - Resolve them against an entity type before any query runs.
//! - Render resolved predicates to SQL or evaluate them in memory.
//!
//! # Invariants
//! - Every field name is resolved through the accessor cache; an unknown
//!   name fails with `PropertyNotFound` before the store is touched.
//! - Evaluation is three-valued as in SQL: a comparison involving NULL is
//!   UNKNOWN, `NOT UNKNOWN` stays UNKNOWN, and only TRUE matches.
//!   Use `is_null` to select NULLs.
//! - `LIKE` is ASCII case-insensitive with `%` and `_` wildcards.

use crate::model::entity::Entity;
use crate::model::value::FieldValue;
use crate::query::accessor::{resolve, Accessor};
use crate::query::quote_ident;
use crate::repo::error::{RepoError, RepoResult};
use regex::Regex;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// Unresolved predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        field: String,
        op: CompareOp,
        value: FieldValue,
    },
    IsNull {
        field: String,
        negated: bool,
    },
    Like {
        field: String,
        pattern: String,
    },
    In {
        field: String,
        values: Vec<FieldValue>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<FieldValue>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull {
            field: field.into(),
            negated: false,
        }
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::IsNull {
            field: field.into(),
            negated: true,
        }
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    pub fn in_list<V: Into<FieldValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Binds every field name to `T`.
    ///
    /// # Errors
    /// - `PropertyNotFound` for the first unknown field, depth first.
    /// - `InvalidFilter` when a LIKE pattern cannot be compiled.
    pub fn resolve<T: Entity>(&self) -> RepoResult<ResolvedFilter<T>> {
        Ok(ResolvedFilter {
            node: resolve_node(self)?,
        })
    }
}

/// Predicate bound to one entity type.
#[derive(Clone)]
pub struct ResolvedFilter<T: 'static> {
    node: Node<T>,
}

#[derive(Clone)]
enum Node<T: 'static> {
    Compare {
        accessor: Accessor<T>,
        op: CompareOp,
        value: FieldValue,
    },
    IsNull {
        accessor: Accessor<T>,
        negated: bool,
    },
    Like {
        accessor: Accessor<T>,
        pattern: String,
        matcher: Regex,
    },
    In {
        accessor: Accessor<T>,
        values: Vec<FieldValue>,
    },
    And(Vec<Node<T>>),
    Or(Vec<Node<T>>),
    Not(Box<Node<T>>),
}

impl<T: Entity> ResolvedFilter<T> {
    /// Evaluates the predicate against one in-memory entity. An UNKNOWN
    /// result does not match, so `NOT` over a NULL comparison excludes the
    /// row as the store does.
    pub fn matches(&self, entity: &T) -> bool {
        eval(&self.node, entity) == Some(true)
    }

    /// Appends the predicate as SQL with positional `?` parameters.
    pub fn write_sql(&self, sql: &mut String, params: &mut Vec<FieldValue>) {
        write_node(&self.node, sql, params);
    }
}

fn resolve_node<T: Entity>(filter: &Filter) -> RepoResult<Node<T>> {
    Ok(match filter {
        Filter::Compare { field, op, value } => Node::Compare {
            accessor: resolve::<T>(field)?,
            op: *op,
            value: value.clone(),
        },
        Filter::IsNull { field, negated } => Node::IsNull {
            accessor: resolve::<T>(field)?,
            negated: *negated,
        },
        Filter::Like { field, pattern } => Node::Like {
            accessor: resolve::<T>(field)?,
            pattern: pattern.clone(),
            matcher: like_to_regex(pattern)?,
        },
        Filter::In { field, values } => Node::In {
            accessor: resolve::<T>(field)?,
            values: values.clone(),
        },
        Filter::And(parts) => Node::And(
            parts
                .iter()
                .map(resolve_node::<T>)
                .collect::<RepoResult<_>>()?,
        ),
        Filter::Or(parts) => Node::Or(
            parts
                .iter()
                .map(resolve_node::<T>)
                .collect::<RepoResult<_>>()?,
        ),
        Filter::Not(inner) => Node::Not(Box::new(resolve_node::<T>(inner)?)),
    })
}

/// Three-valued evaluation; `None` is SQL's UNKNOWN.
fn eval<T: Entity>(node: &Node<T>, entity: &T) -> Option<bool> {
    match node {
        Node::Compare {
            accessor,
            op,
            value,
        } => {
            let current = accessor.value(entity);
            if current.is_null() || value.is_null() {
                return None;
            }
            Some(op.holds(current.sort_cmp(value)))
        }
        Node::IsNull { accessor, negated } => {
            Some(accessor.value(entity).is_null() != *negated)
        }
        Node::Like {
            accessor, matcher, ..
        } => match accessor.value(entity) {
            FieldValue::Null => None,
            FieldValue::Blob(_) => Some(false),
            FieldValue::Text(text) => Some(matcher.is_match(&text)),
            other => Some(matcher.is_match(&other.to_string())),
        },
        Node::In { accessor, values } => {
            let current = accessor.value(entity);
            if current.is_null() {
                return None;
            }
            if values
                .iter()
                .any(|value| !value.is_null() && current.sort_cmp(value) == Ordering::Equal)
            {
                Some(true)
            } else if values.iter().any(FieldValue::is_null) {
                None
            } else {
                Some(false)
            }
        }
        Node::And(parts) => {
            let mut outcome = Some(true);
            for part in parts {
                match eval(part, entity) {
                    Some(false) => return Some(false),
                    None => outcome = None,
                    Some(true) => {}
                }
            }
            outcome
        }
        Node::Or(parts) => {
            let mut outcome = Some(false);
            for part in parts {
                match eval(part, entity) {
                    Some(true) => return Some(true),
                    None => outcome = None,
                    Some(false) => {}
                }
            }
            outcome
        }
        Node::Not(inner) => eval(inner, entity).map(|held| !held),
    }
}

fn write_node<T: Entity>(node: &Node<T>, sql: &mut String, params: &mut Vec<FieldValue>) {
    match node {
        Node::Compare {
            accessor,
            op,
            value,
        } => {
            sql.push_str(&format!("{} {} ?", quote_ident(accessor.column()), op.as_sql()));
            params.push(value.clone());
        }
        Node::IsNull { accessor, negated } => {
            let test = if *negated { "IS NOT NULL" } else { "IS NULL" };
            sql.push_str(&format!("{} {test}", quote_ident(accessor.column())));
        }
        Node::Like {
            accessor, pattern, ..
        } => {
            sql.push_str(&format!("{} LIKE ?", quote_ident(accessor.column())));
            params.push(FieldValue::Text(pattern.clone()));
        }
        Node::In { accessor, values } => {
            if values.is_empty() {
                sql.push_str("0 = 1");
                return;
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            sql.push_str(&format!(
                "{} IN ({placeholders})",
                quote_ident(accessor.column())
            ));
            params.extend(values.iter().cloned());
        }
        Node::And(parts) => write_group(parts, "AND", "1 = 1", sql, params),
        Node::Or(parts) => write_group(parts, "OR", "0 = 1", sql, params),
        Node::Not(inner) => {
            sql.push_str("NOT (");
            write_node(inner, sql, params);
            sql.push(')');
        }
    }
}

fn write_group<T: Entity>(
    parts: &[Node<T>],
    joiner: &str,
    empty: &str,
    sql: &mut String,
    params: &mut Vec<FieldValue>,
) {
    if parts.is_empty() {
        sql.push_str(empty);
        return;
    }
    sql.push('(');
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            sql.push_str(&format!(" {joiner} "));
        }
        write_node(part, sql, params);
    }
    sql.push(')');
}

fn like_to_regex(pattern: &str) -> RepoResult<Regex> {
    let mut expression = String::from("(?is)^");
    for ch in pattern.chars() {
        match ch {
            '%' => expression.push_str(".*"),
            '_' => expression.push('.'),
            other => expression.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expression.push('$');
    Regex::new(&expression).map_err(|err| RepoError::InvalidFilter(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::Filter;
    use crate::config::StoreOptions;
    use crate::model::entity::{Entity, Field};
    use crate::model::value::FieldValue;
    use crate::query::source::{MemoryQuery, QuerySource};
    use crate::repo::error::RepoError;
    use crate::session::Session;
    use rusqlite::{Connection, Row};

    #[derive(Debug, Clone)]
    struct Row2 {
        id: i64,
        name: Option<String>,
    }

    static ROW2_FIELDS: &[Field<Row2>] = &[
        Field::new("Id", "id", |r| FieldValue::from(r.id)),
        Field::new("Name", "name", |r| FieldValue::from(r.name.clone())),
    ];

    impl Entity for Row2 {
        const NAME: &'static str = "Row2";
        const TABLE: &'static str = "row2";
        const KEY_COLUMN: &'static str = "id";

        fn fields() -> &'static [Field<Self>] {
            ROW2_FIELDS
        }

        fn key(&self) -> FieldValue {
            FieldValue::from(self.id)
        }

        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get("id")?,
                name: row.get("name")?,
            })
        }
    }

    fn row(id: i64, name: Option<&str>) -> Row2 {
        Row2 {
            id,
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn renders_sql_with_positional_params() {
        let filter = Filter::gt("id", 3)
            .and(Filter::like("NAME", "ab%"))
            .and(Filter::in_list("id", [5, 6]));
        let resolved = filter.resolve::<Row2>().unwrap();

        let mut sql = String::new();
        let mut params = Vec::new();
        resolved.write_sql(&mut sql, &mut params);

        assert_eq!(
            sql,
            r#"("id" > ? AND "name" LIKE ? AND "id" IN (?, ?))"#
        );
        assert_eq!(params.len(), 4);
        assert_eq!(params[1], FieldValue::from("ab%"));
    }

    #[test]
    fn evaluates_in_memory_with_sql_null_semantics() {
        let named = Filter::eq("name", "Alpha").resolve::<Row2>().unwrap();
        assert!(named.matches(&row(1, Some("Alpha"))));
        assert!(!named.matches(&row(1, None)));

        let missing = Filter::is_null("name").resolve::<Row2>().unwrap();
        assert!(missing.matches(&row(1, None)));

        let like = Filter::like("name", "al_h%").resolve::<Row2>().unwrap();
        assert!(like.matches(&row(1, Some("ALPHA"))));
        assert!(!like.matches(&row(1, Some("beta"))));

        let either = Filter::eq("id", 1)
            .or(Filter::eq("id", 2))
            .negate()
            .resolve::<Row2>()
            .unwrap();
        assert!(either.matches(&row(3, None)));
        assert!(!either.matches(&row(2, None)));
    }

    #[test]
    fn unknown_field_fails_resolution() {
        let err = Filter::eq("id", 1)
            .and(Filter::eq("Foo", 1))
            .resolve::<Row2>()
            .err()
            .unwrap();
        assert!(matches!(err, RepoError::PropertyNotFound { .. }));
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let filter = Filter::in_list::<i64>("id", []).resolve::<Row2>().unwrap();
        assert!(!filter.matches(&row(1, None)));

        let mut sql = String::new();
        filter.write_sql(&mut sql, &mut Vec::new());
        assert_eq!(sql, "0 = 1");
    }

    #[test]
    fn negation_over_null_is_unknown() {
        let not_x = Filter::eq("name", "x").negate().resolve::<Row2>().unwrap();
        assert!(!not_x.matches(&row(1, None)));
        assert!(!not_x.matches(&row(2, Some("x"))));
        assert!(not_x.matches(&row(3, Some("y"))));

        // UNKNOWN OR TRUE is TRUE; UNKNOWN AND FALSE is FALSE.
        let either = Filter::eq("name", "x")
            .or(Filter::eq("id", 1))
            .resolve::<Row2>()
            .unwrap();
        assert!(either.matches(&row(1, None)));
        let neither = Filter::eq("name", "x")
            .and(Filter::eq("id", 2))
            .negate()
            .resolve::<Row2>()
            .unwrap();
        assert!(neither.matches(&row(1, None)));
        assert!(!neither.matches(&row(2, None)));

        let not_in = Filter::in_list("id", [FieldValue::from(1), FieldValue::Null])
            .negate()
            .resolve::<Row2>()
            .unwrap();
        assert!(!not_in.matches(&row(1, None)));
        assert!(!not_in.matches(&row(5, None)));
    }

    #[test]
    fn memory_and_store_agree_on_negated_nullable_comparisons() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE row2 (id INTEGER PRIMARY KEY NOT NULL, name TEXT);
             INSERT INTO row2 (id, name) VALUES (1, NULL), (2, 'x'), (3, 'y');",
        )
        .unwrap();
        let session = Session::from_connection(conn, StoreOptions::default());
        let rows = vec![row(1, None), row(2, Some("x")), row(3, Some("y"))];

        let filters = [
            Filter::eq("name", "x").negate(),
            Filter::ne("name", "x"),
            Filter::like("name", "x%").negate(),
            Filter::in_list("name", ["x"]).negate(),
            Filter::eq("name", "x").or(Filter::eq("id", 1)).negate(),
            Filter::is_null("name").negate(),
        ];
        for filter in filters {
            let resolved = filter.resolve::<Row2>().unwrap();
            let ids = |found: Vec<Row2>| found.iter().map(|r| r.id).collect::<Vec<_>>();
            let from_store = ids(session
                .set::<Row2>()
                .query()
                .no_tracking()
                .filter(&resolved)
                .to_vec()
                .unwrap());
            let from_memory = ids(MemoryQuery::new(rows.clone())
                .filter(&resolved)
                .to_vec()
                .unwrap());
            assert_eq!(from_store, from_memory, "filter {filter:?}");
        }
    }
}

//! INSERT, UPDATE and DELETE builders, and upsert conflict resolution.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::field::Value;

use super::builder::{Builder, Render};
use super::dialect::Dialect;
use super::predicate::P;

/// Right-hand side of a `SET column = ..` assignment.
#[derive(Clone, Debug, PartialEq)]
pub enum SetExpr {
    Value(Value),
    Null,
    /// `COALESCE(column, 0) + value`
    Add(Value),
    /// The value proposed for insertion (upsert only).
    Excluded,
    /// Keep the stored value (upsert only).
    Ignore,
    Raw(String),
}

fn render_set(b: &mut Builder, table: Option<&str>, column: &str, expr: &SetExpr) {
    let qualified = match table {
        Some(table) => format!("{table}.{column}"),
        None => column.to_string(),
    };
    b.ident(column).write(" = ");
    match expr {
        SetExpr::Value(v) => {
            b.arg(v.clone());
        }
        SetExpr::Null => {
            b.write("NULL");
        }
        SetExpr::Add(v) => {
            b.write("COALESCE(")
                .ident(&qualified)
                .write(", 0) + ")
                .arg(v.clone());
        }
        SetExpr::Excluded => {
            let excluded = b.dialect().excluded(column);
            b.write(&excluded);
        }
        SetExpr::Ignore => {
            b.ident(&qualified);
        }
        SetExpr::Raw(expr) => {
            b.write(expr);
        }
    }
}

/// Assignments applied when an upsert hits a conflict.
#[derive(Clone, Debug, Default)]
pub struct UpdateSet {
    table: String,
    columns: Vec<String>,
    sets: IndexMap<String, SetExpr>,
}

impl UpdateSet {
    fn new(table: &str, columns: &[String]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.to_vec(),
            sets: IndexMap::new(),
        }
    }

    /// Table the insert targets.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns of the INSERT statement.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Columns that will be assigned on conflict.
    pub fn update_columns(&self) -> Vec<&str> {
        self.sets.keys().map(String::as_str).collect()
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.sets
            .insert(column.to_string(), SetExpr::Value(value.into()));
        self
    }

    pub fn add(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.sets
            .insert(column.to_string(), SetExpr::Add(value.into()));
        self
    }

    pub fn set_null(&mut self, column: &str) -> &mut Self {
        self.sets.insert(column.to_string(), SetExpr::Null);
        self
    }

    pub fn set_excluded(&mut self, column: &str) -> &mut Self {
        self.sets.insert(column.to_string(), SetExpr::Excluded);
        self
    }

    pub fn set_ignore(&mut self, column: &str) -> &mut Self {
        self.sets.insert(column.to_string(), SetExpr::Ignore);
        self
    }

    pub fn set_raw(&mut self, column: &str, expr: impl Into<String>) -> &mut Self {
        self.sets
            .insert(column.to_string(), SetExpr::Raw(expr.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

pub type Resolver = Arc<dyn Fn(&mut UpdateSet) + Send + Sync>;

/// One piece of an `ON CONFLICT` / `ON DUPLICATE KEY` clause. Options are
/// applied in order; resolvers see the assignments made by earlier ones.
#[derive(Clone)]
pub enum ConflictOption {
    /// Conflict target columns.
    Columns(Vec<String>),
    /// Conflict target constraint (PostgreSQL).
    Constraint(String),
    DoNothing,
    /// Set every inserted column to its stored value.
    ResolveWithIgnore,
    /// Set every inserted column to its proposed value.
    ResolveWithNewValues,
    ResolveWith(Resolver),
    /// Condition on the DO UPDATE action.
    UpdateWhere(P),
}

impl ConflictOption {
    pub fn columns<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        ConflictOption::Columns(columns.into_iter().map(Into::into).collect())
    }

    pub fn resolve_with(f: impl Fn(&mut UpdateSet) + Send + Sync + 'static) -> Self {
        ConflictOption::ResolveWith(Arc::new(f))
    }

    pub fn is_target(&self) -> bool {
        matches!(
            self,
            ConflictOption::Columns(_) | ConflictOption::Constraint(_)
        )
    }
}

impl fmt::Debug for ConflictOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictOption::Columns(c) => f.debug_tuple("Columns").field(c).finish(),
            ConflictOption::Constraint(c) => f.debug_tuple("Constraint").field(c).finish(),
            ConflictOption::DoNothing => f.write_str("DoNothing"),
            ConflictOption::ResolveWithIgnore => f.write_str("ResolveWithIgnore"),
            ConflictOption::ResolveWithNewValues => f.write_str("ResolveWithNewValues"),
            ConflictOption::ResolveWith(_) => f.write_str("ResolveWith(<fn>)"),
            ConflictOption::UpdateWhere(p) => f.debug_tuple("UpdateWhere").field(p).finish(),
        }
    }
}

/// INSERT statement builder.
#[derive(Clone, Debug, Default)]
pub struct InsertBuilder {
    table: String,
    columns: Vec<String>,
    values: Vec<Vec<Value>>,
    returning: Vec<String>,
    conflict: Vec<ConflictOption>,
}

impl InsertBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Sets a column of a single-row insert.
    pub fn set(&mut self, column: &str, value: Value) -> &mut Self {
        if self.values.is_empty() {
            self.values.push(Vec::new());
        }
        match self.columns.iter().position(|c| c == column) {
            Some(i) => self.values[0][i] = value,
            None => {
                self.columns.push(column.to_string());
                self.values[0].push(value);
            }
        }
        self
    }

    pub fn columns(&mut self, columns: Vec<String>) -> &mut Self {
        self.columns = columns;
        self
    }

    pub fn values(&mut self, row: Vec<Value>) -> &mut Self {
        self.values.push(row);
        self
    }

    pub fn returning(&mut self, columns: Vec<String>) -> &mut Self {
        self.returning = columns;
        self
    }

    pub fn on_conflict(&mut self, options: Vec<ConflictOption>) -> &mut Self {
        self.conflict.extend(options);
        self
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.values.len()
    }

    pub fn has_conflict(&self) -> bool {
        !self.conflict.is_empty()
    }

    fn render_conflict(&self, b: &mut Builder) {
        let mut target_columns: Vec<String> = Vec::new();
        let mut constraint: Option<&str> = None;
        let mut do_nothing = false;
        let mut update_where: Option<&P> = None;
        let mut set = UpdateSet::new(&self.table, &self.columns);
        for option in &self.conflict {
            match option {
                ConflictOption::Columns(columns) => target_columns = columns.clone(),
                ConflictOption::Constraint(name) => constraint = Some(name),
                ConflictOption::DoNothing => do_nothing = true,
                ConflictOption::ResolveWithIgnore => {
                    for column in &self.columns {
                        set.set_ignore(column);
                    }
                }
                ConflictOption::ResolveWithNewValues => {
                    for column in &self.columns {
                        set.set_excluded(column);
                    }
                }
                ConflictOption::ResolveWith(f) => f(&mut set),
                ConflictOption::UpdateWhere(p) => update_where = Some(p),
            }
        }
        let table = self.table.as_str();
        if b.dialect() == Dialect::MySql {
            b.write(" ON DUPLICATE KEY UPDATE ");
            if do_nothing || set.is_empty() {
                if let Some(first) = self.columns.first() {
                    render_set(b, None, first, &SetExpr::Raw(Dialect::MySql.quote(first)));
                }
                return;
            }
            for (i, (column, expr)) in set.sets.iter().enumerate() {
                if i > 0 {
                    b.write(", ");
                }
                render_set(b, Some(table), column, expr);
            }
            return;
        }
        b.write(" ON CONFLICT");
        if let Some(name) = constraint {
            b.write(" ON CONSTRAINT ").ident(name);
        } else if !target_columns.is_empty() {
            b.write(" ").wrap(|b| {
                b.idents(&target_columns);
            });
        }
        if do_nothing || set.is_empty() {
            b.write(" DO NOTHING");
            return;
        }
        b.write(" DO UPDATE SET ");
        for (i, (column, expr)) in set.sets.iter().enumerate() {
            if i > 0 {
                b.write(", ");
            }
            render_set(b, Some(table), column, expr);
        }
        if let Some(p) = update_where {
            b.write(" WHERE ");
            p.render(b);
        }
    }
}

impl Render for InsertBuilder {
    fn render(&self, b: &mut Builder) {
        b.write("INSERT INTO ").ident(&self.table);
        if self.columns.is_empty() {
            match b.dialect() {
                Dialect::MySql => b.write(" VALUES ()"),
                Dialect::Sqlite | Dialect::Postgres => b.write(" DEFAULT VALUES"),
            };
        } else {
            b.write(" ").wrap(|b| {
                b.idents(&self.columns);
            });
            b.write(" VALUES ");
            for (i, row) in self.values.iter().enumerate() {
                if i > 0 {
                    b.write(", ");
                }
                b.wrap(|b| {
                    b.args(row);
                });
            }
        }
        if !self.conflict.is_empty() {
            self.render_conflict(b);
        }
        if !self.returning.is_empty() && b.dialect().supports_returning() {
            b.write(" RETURNING ").idents(&self.returning);
        }
    }
}

/// UPDATE statement builder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateBuilder {
    table: String,
    sets: Vec<(String, SetExpr)>,
    where_: Option<P>,
}

impl UpdateBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    fn push(&mut self, column: &str, expr: SetExpr) -> &mut Self {
        match self.sets.iter_mut().find(|(c, _)| c == column) {
            Some(slot) => slot.1 = expr,
            None => self.sets.push((column.to_string(), expr)),
        }
        self
    }

    pub fn set(&mut self, column: &str, value: Value) -> &mut Self {
        self.push(column, SetExpr::Value(value))
    }

    pub fn set_null(&mut self, column: &str) -> &mut Self {
        self.push(column, SetExpr::Null)
    }

    pub fn add(&mut self, column: &str, value: Value) -> &mut Self {
        self.push(column, SetExpr::Add(value))
    }

    pub fn where_(&mut self, p: P) -> &mut Self {
        self.where_ = Some(match self.where_.take() {
            Some(existing) => existing.and_with(p),
            None => p,
        });
        self
    }

    /// Reports whether there is nothing to SET.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl Render for UpdateBuilder {
    fn render(&self, b: &mut Builder) {
        b.write("UPDATE ").ident(&self.table).write(" SET ");
        for (i, (column, expr)) in self.sets.iter().enumerate() {
            if i > 0 {
                b.write(", ");
            }
            render_set(b, None, column, expr);
        }
        if let Some(p) = &self.where_ {
            b.write(" WHERE ");
            p.render(b);
        }
    }
}

/// DELETE statement builder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeleteBuilder {
    table: String,
    where_: Option<P>,
}

impl DeleteBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_: None,
        }
    }

    pub fn where_(&mut self, p: P) -> &mut Self {
        self.where_ = Some(match self.where_.take() {
            Some(existing) => existing.and_with(p),
            None => p,
        });
        self
    }
}

impl Render for DeleteBuilder {
    fn render(&self, b: &mut Builder) {
        b.write("DELETE FROM ").ident(&self.table);
        if let Some(p) = &self.where_ {
            b.write(" WHERE ");
            p.render(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert() -> InsertBuilder {
        let mut insert = InsertBuilder::new("users");
        insert
            .set("name", Value::from("a8m"))
            .set("value", Value::Int(1));
        insert
    }

    #[test]
    fn upsert_with_new_values_per_dialect() {
        let mut i = insert();
        i.on_conflict(vec![
            ConflictOption::columns(["value"]),
            ConflictOption::ResolveWithNewValues,
        ])
        .returning(vec!["id".into()]);
        assert_eq!(
            i.query(Dialect::Sqlite).sql,
            "INSERT INTO \"users\" (\"name\", \"value\") VALUES (?, ?) ON CONFLICT (\"value\") DO UPDATE SET \"name\" = \"excluded\".\"name\", \"value\" = \"excluded\".\"value\" RETURNING \"id\""
        );
        assert_eq!(
            i.query(Dialect::MySql).sql,
            "INSERT INTO `users` (`name`, `value`) VALUES (?, ?) ON DUPLICATE KEY UPDATE `name` = VALUES(`name`), `value` = VALUES(`value`)"
        );
    }

    #[test]
    fn custom_resolver_sees_insert_columns() {
        let mut i = insert();
        i.on_conflict(vec![
            ConflictOption::columns(["value"]),
            ConflictOption::ResolveWithNewValues,
            ConflictOption::resolve_with(|u| {
                if u.has_column("name") {
                    u.set_ignore("name");
                }
                u.add("value", 10);
            }),
        ]);
        let stmt = i.query(Dialect::Postgres);
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"users\" (\"name\", \"value\") VALUES ($1, $2) ON CONFLICT (\"value\") DO UPDATE SET \"name\" = \"users\".\"name\", \"value\" = COALESCE(\"users\".\"value\", 0) + $3"
        );
        assert_eq!(stmt.args.len(), 3);
    }

    #[test]
    fn do_nothing_and_default_values() {
        let mut i = InsertBuilder::new("groups");
        i.on_conflict(vec![ConflictOption::DoNothing]);
        assert_eq!(
            i.query(Dialect::Postgres).sql,
            "INSERT INTO \"groups\" DEFAULT VALUES ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn update_set_add_and_null() {
        let mut u = UpdateBuilder::new("users");
        u.set("name", Value::from("a8m"))
            .add("age", Value::Int(1))
            .set_null("nickname")
            .where_(P::eq("id", 1));
        assert_eq!(
            u.query(Dialect::Sqlite).sql,
            "UPDATE \"users\" SET \"name\" = ?, \"age\" = COALESCE(\"age\", 0) + ?, \"nickname\" = NULL WHERE \"id\" = ?"
        );
    }
}

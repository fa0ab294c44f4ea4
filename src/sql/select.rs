use super::builder::{Builder, Render};
use super::predicate::P;

/// A table, or a sub-select with an alias, used in FROM and JOIN clauses.
#[derive(Clone, Debug, PartialEq)]
pub enum TableRef {
    Table { name: String, alias: Option<String> },
    Select { select: Box<Selector>, alias: String },
}

impl TableRef {
    pub fn table(name: impl Into<String>) -> Self {
        TableRef::Table {
            name: name.into(),
            alias: None,
        }
    }

    pub fn select(select: Selector, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        let mut select = select;
        select.alias = Some(alias.clone());
        TableRef::Select {
            select: Box::new(select),
            alias,
        }
    }

    pub fn alias(self, alias: impl Into<String>) -> Self {
        match self {
            TableRef::Table { name, .. } => TableRef::Table {
                name,
                alias: Some(alias.into()),
            },
            TableRef::Select { select, .. } => TableRef::select(*select, alias),
        }
    }

    /// Name other clauses use to refer to this source.
    pub fn name(&self) -> &str {
        match self {
            TableRef::Table {
                alias: Some(alias), ..
            } => alias,
            TableRef::Table { name, .. } => name,
            TableRef::Select { alias, .. } => alias,
        }
    }

    /// Qualified column reference.
    pub fn c(&self, column: &str) -> String {
        format!("{}.{}", self.name(), column)
    }
}

impl Render for TableRef {
    fn render(&self, b: &mut Builder) {
        match self {
            TableRef::Table { name, alias } => {
                b.ident(name);
                if let Some(alias) = alias {
                    b.write(" AS ").ident(alias);
                }
            }
            TableRef::Select { select, alias } => {
                b.wrap(|b| select.render(b)).write(" AS ").ident(alias);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: P,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectItem {
    Column(String),
    Count { columns: Vec<String>, distinct: bool },
    Raw(String),
}

/// SELECT statement builder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selector {
    items: Vec<SelectItem>,
    distinct: bool,
    from: Option<TableRef>,
    alias: Option<String>,
    joins: Vec<Join>,
    where_: Option<P>,
    group: Vec<String>,
    order: Vec<(String, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            from: Some(TableRef::table(table)),
            ..Self::default()
        }
    }

    pub fn from(&mut self, table: TableRef) -> &mut Self {
        self.from = Some(table);
        self
    }

    pub fn from_ref(&self) -> Option<&TableRef> {
        self.from.as_ref()
    }

    /// Sets the alias this selector is known by when nested in another.
    pub fn as_(&mut self, alias: impl Into<String>) -> &mut Self {
        self.alias = Some(alias.into());
        self
    }

    /// Name used to qualify columns of this selector.
    pub fn table(&self) -> &str {
        if let Some(alias) = &self.alias {
            return alias;
        }
        self.from.as_ref().map(TableRef::name).unwrap_or_default()
    }

    /// Qualifies `column` with this selector's table, unless it is already
    /// qualified or there is no table to qualify with.
    pub fn c(&self, column: &str) -> String {
        let table = self.table();
        if column.contains('.') || column.contains('(') || table.is_empty() {
            return column.to_string();
        }
        format!("{table}.{column}")
    }

    pub fn select(&mut self, columns: Vec<String>) -> &mut Self {
        self.items = columns.into_iter().map(SelectItem::Column).collect();
        self
    }

    pub fn append_select(&mut self, columns: Vec<String>) -> &mut Self {
        self.items
            .extend(columns.into_iter().map(SelectItem::Column));
        self
    }

    pub fn select_raw(&mut self, expr: impl Into<String>) -> &mut Self {
        self.items = vec![SelectItem::Raw(expr.into())];
        self
    }

    pub fn selected_columns(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| match item {
                SelectItem::Column(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&mut self, columns: Vec<String>, distinct: bool) -> &mut Self {
        self.items = vec![SelectItem::Count { columns, distinct }];
        self
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.distinct = true;
        self
    }

    pub fn set_distinct(&mut self, distinct: bool) -> &mut Self {
        self.distinct = distinct;
        self
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn join(&mut self, table: TableRef, on: P) -> &mut Self {
        self.joins.push(Join {
            kind: JoinKind::Inner,
            table,
            on,
        });
        self
    }

    pub fn left_join(&mut self, table: TableRef, on: P) -> &mut Self {
        self.joins.push(Join {
            kind: JoinKind::Left,
            table,
            on,
        });
        self
    }

    /// Adds a WHERE condition, AND-ed with any existing one.
    pub fn where_(&mut self, p: P) -> &mut Self {
        self.where_ = Some(match self.where_.take() {
            Some(existing) => existing.and_with(p),
            None => p,
        });
        self
    }

    pub fn where_clause(&self) -> Option<&P> {
        self.where_.as_ref()
    }

    pub fn take_where(&mut self) -> Option<P> {
        self.where_.take()
    }

    pub fn clear_where(&mut self) -> &mut Self {
        self.where_ = None;
        self
    }

    pub fn group_by(&mut self, columns: Vec<String>) -> &mut Self {
        self.group.extend(columns);
        self
    }

    pub fn order_by(&mut self, column: impl Into<String>, desc: bool) -> &mut Self {
        self.order.push((column.into(), desc));
        self
    }

    pub fn clear_order(&mut self) -> &mut Self {
        self.order.clear();
        self
    }

    pub fn has_order(&self) -> bool {
        !self.order.is_empty()
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn get_limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn get_offset(&self) -> Option<u64> {
        self.offset
    }

    fn render_items(&self, b: &mut Builder) {
        if self.items.is_empty() {
            b.write("*");
            return;
        }
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                b.write(", ");
            }
            match item {
                SelectItem::Column(c) => {
                    b.ident(c);
                }
                SelectItem::Raw(expr) => {
                    b.write(expr);
                }
                SelectItem::Count { columns, distinct } => {
                    b.write("COUNT(");
                    if columns.is_empty() {
                        b.write("*");
                    } else {
                        if *distinct {
                            b.write("DISTINCT ");
                        }
                        b.idents(columns);
                    }
                    b.write(")");
                }
            }
        }
    }
}

impl Render for Selector {
    fn render(&self, b: &mut Builder) {
        b.write("SELECT ");
        if self.distinct {
            b.write("DISTINCT ");
        }
        self.render_items(b);
        if let Some(from) = &self.from {
            b.write(" FROM ");
            from.render(b);
        }
        for join in &self.joins {
            b.write(match join.kind {
                JoinKind::Inner => " JOIN ",
                JoinKind::Left => " LEFT JOIN ",
            });
            join.table.render(b);
            b.write(" ON ");
            join.on.render(b);
        }
        if let Some(p) = &self.where_ {
            b.write(" WHERE ");
            p.render(b);
        }
        if !self.group.is_empty() {
            b.write(" GROUP BY ").idents(&self.group);
        }
        if !self.order.is_empty() {
            b.write(" ORDER BY ");
            for (i, (column, desc)) in self.order.iter().enumerate() {
                if i > 0 {
                    b.write(", ");
                }
                b.ident(column);
                if *desc {
                    b.write(" DESC");
                }
            }
        }
        if let Some(limit) = self.limit {
            b.write(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            b.write(&format!(" OFFSET {offset}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Dialect;

    #[test]
    fn renders_join_on_aliased_subselect() {
        let mut set = Selector::from_table("users");
        set.where_(P::eq(set.c("name"), "a8m"));
        let c = set.c("id");
        set.select(vec![c]);
        let set = TableRef::select(set, "t1");

        let mut q = Selector::from_table("pets");
        let on = P::columns_eq(q.c("owner_id"), set.c("id"));
        q.join(set, on);
        let stmt = q.query(Dialect::Sqlite);
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"pets\" JOIN (SELECT \"users\".\"id\" FROM \"users\" WHERE \"users\".\"name\" = ?) AS \"t1\" ON \"pets\".\"owner_id\" = \"t1\".\"id\""
        );
    }

    #[test]
    fn renders_count_distinct_and_paging() {
        let mut s = Selector::from_table("users");
        let id = s.c("id");
        s.count(vec![id], true);
        assert_eq!(
            s.query(Dialect::MySql).sql,
            "SELECT COUNT(DISTINCT `users`.`id`) FROM `users`"
        );

        let mut s = Selector::from_table("users");
        s.order_by("users.name", true).limit(10).offset(20);
        assert_eq!(
            s.query(Dialect::Postgres).sql,
            "SELECT * FROM \"users\" ORDER BY \"users\".\"name\" DESC LIMIT 10 OFFSET 20"
        );
    }
}

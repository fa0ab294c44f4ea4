use serde::{Deserialize, Serialize};

/// SQL dialect a statement is rendered for.
///
/// The dialect only picks syntax variants: identifier quoting, placeholder
/// style, `RETURNING` support and the upsert clause shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    #[default]
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite3",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }

    fn quote_char(self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Sqlite | Dialect::Postgres => '"',
        }
    }

    /// Quotes an identifier. Dotted names are quoted per segment; `*`,
    /// expressions and already-quoted names are written as-is.
    pub fn quote(self, ident: &str) -> String {
        if ident == "*" || ident.contains('(') || ident.contains(self.quote_char()) {
            return ident.to_string();
        }
        let q = self.quote_char();
        ident
            .split('.')
            .map(|part| {
                if part == "*" {
                    part.to_string()
                } else {
                    format!("{q}{part}{q}")
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Placeholder for the `n`-th (1-based) argument.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    /// Whether `INSERT .. RETURNING` can capture generated keys.
    pub fn supports_returning(self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    /// Whether `ON CONFLICT .. DO NOTHING` is available.
    pub fn supports_do_nothing(self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    /// Reference to the value proposed for insertion in an upsert clause.
    pub fn excluded(self, column: &str) -> String {
        match self {
            Dialect::MySql => format!("VALUES({})", self.quote(column)),
            Dialect::Sqlite | Dialect::Postgres => {
                format!("{}.{}", self.quote("excluded"), self.quote(column))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_dotted_identifiers() {
        assert_eq!(Dialect::Sqlite.quote("users.id"), "\"users\".\"id\"");
        assert_eq!(Dialect::MySql.quote("users.id"), "`users`.`id`");
        assert_eq!(Dialect::Postgres.quote("COUNT(*)"), "COUNT(*)");
        assert_eq!(Dialect::Postgres.quote("t1.*"), "\"t1\".*");
    }

    #[test]
    fn placeholders_follow_dialect() {
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::Sqlite.placeholder(3), "?");
    }
}

use serde::Serialize;

use crate::field::Value;

use super::dialect::Dialect;

/// A compiled statement: SQL text plus positional arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

/// Anything that renders itself into a [`Builder`].
///
/// Rendering never fails and never depends on anything but the value and
/// the dialect, so rendering the same value twice yields identical output.
pub trait Render {
    fn render(&self, b: &mut Builder);

    fn query(&self, dialect: Dialect) -> Statement {
        let mut b = Builder::new(dialect);
        self.render(&mut b);
        b.finish()
    }
}

/// Accumulates SQL text and arguments for one statement.
///
/// Sub-selects render into the same builder as their parent so that
/// numbered placeholders (`$1`, `$2`, ..) stay in argument order.
#[derive(Debug)]
pub struct Builder {
    dialect: Dialect,
    sql: String,
    args: Vec<Value>,
}

impl Builder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            args: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn write(&mut self, s: &str) -> &mut Self {
        self.sql.push_str(s);
        self
    }

    /// Writes a quoted identifier.
    pub fn ident(&mut self, name: &str) -> &mut Self {
        let quoted = self.dialect.quote(name);
        self.sql.push_str(&quoted);
        self
    }

    /// Writes a comma separated list of quoted identifiers.
    pub fn idents<S: AsRef<str>>(&mut self, names: &[S]) -> &mut Self {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.ident(name.as_ref());
        }
        self
    }

    /// Binds one argument and writes its placeholder.
    pub fn arg(&mut self, value: Value) -> &mut Self {
        self.args.push(value);
        let placeholder = self.dialect.placeholder(self.args.len());
        self.sql.push_str(&placeholder);
        self
    }

    /// Binds a comma separated list of arguments.
    pub fn args(&mut self, values: &[Value]) -> &mut Self {
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.arg(value.clone());
        }
        self
    }

    /// Writes `(..)` around whatever `f` renders.
    pub fn wrap(&mut self, f: impl FnOnce(&mut Builder)) -> &mut Self {
        self.sql.push('(');
        f(self);
        self.sql.push(')');
        self
    }

    pub fn render(&mut self, part: &dyn Render) -> &mut Self {
        part.render(self);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    pub fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            args: self.args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_postgres_placeholders_in_order() {
        let mut b = Builder::new(Dialect::Postgres);
        b.write("SELECT * FROM ")
            .ident("users")
            .write(" WHERE ")
            .ident("age")
            .write(" > ")
            .arg(Value::Int(30))
            .write(" AND ")
            .ident("name")
            .write(" IN ")
            .wrap(|b| {
                b.args(&[Value::from("a8m"), Value::from("nati")]);
            });
        let stmt = b.finish();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"users\" WHERE \"age\" > $1 AND \"name\" IN ($2, $3)"
        );
        assert_eq!(stmt.args.len(), 3);
    }
}

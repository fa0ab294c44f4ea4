//! WHERE-clause expressions and the selector-bound predicate functions
//! used by specs.

use std::fmt;
use std::sync::Arc;

use crate::field::Value;

use super::builder::{Builder, Render};
use super::dialect::Dialect;
use super::select::Selector;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CmpOp {
    fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => " = ",
            CmpOp::Neq => " <> ",
            CmpOp::Lt => " < ",
            CmpOp::Lte => " <= ",
            CmpOp::Gt => " > ",
            CmpOp::Gte => " >= ",
        }
    }
}

/// A boolean SQL expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum P {
    True,
    False,
    Cmp {
        column: String,
        op: CmpOp,
        value: Value,
    },
    Columns {
        left: String,
        op: CmpOp,
        right: String,
    },
    In {
        column: String,
        values: Vec<Value>,
        negate: bool,
    },
    InSelect {
        column: String,
        select: Box<Selector>,
        negate: bool,
    },
    IsNull {
        column: String,
        negate: bool,
    },
    Like {
        column: String,
        pattern: String,
        escaped: bool,
    },
    And(Vec<P>),
    Or(Vec<P>),
    Not(Box<P>),
    Exists {
        select: Box<Selector>,
        negate: bool,
    },
}

impl P {
    fn cmp(column: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> P {
        P::Cmp {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> P {
        P::cmp(column, CmpOp::Eq, value)
    }

    pub fn neq(column: impl Into<String>, value: impl Into<Value>) -> P {
        P::cmp(column, CmpOp::Neq, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> P {
        P::cmp(column, CmpOp::Lt, value)
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> P {
        P::cmp(column, CmpOp::Lte, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> P {
        P::cmp(column, CmpOp::Gt, value)
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> P {
        P::cmp(column, CmpOp::Gte, value)
    }

    pub fn columns_eq(left: impl Into<String>, right: impl Into<String>) -> P {
        P::Columns {
            left: left.into(),
            op: CmpOp::Eq,
            right: right.into(),
        }
    }

    pub fn in_values(column: impl Into<String>, values: Vec<Value>) -> P {
        P::In {
            column: column.into(),
            values,
            negate: false,
        }
    }

    pub fn not_in(column: impl Into<String>, values: Vec<Value>) -> P {
        P::In {
            column: column.into(),
            values,
            negate: true,
        }
    }

    pub fn in_select(column: impl Into<String>, select: Selector) -> P {
        P::InSelect {
            column: column.into(),
            select: Box::new(select),
            negate: false,
        }
    }

    pub fn not_in_select(column: impl Into<String>, select: Selector) -> P {
        P::InSelect {
            column: column.into(),
            select: Box::new(select),
            negate: true,
        }
    }

    pub fn is_null(column: impl Into<String>) -> P {
        P::IsNull {
            column: column.into(),
            negate: false,
        }
    }

    pub fn not_null(column: impl Into<String>) -> P {
        P::IsNull {
            column: column.into(),
            negate: true,
        }
    }

    /// Raw `LIKE` with a caller-supplied pattern.
    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> P {
        P::Like {
            column: column.into(),
            pattern: pattern.into(),
            escaped: false,
        }
    }

    pub fn has_prefix(column: impl Into<String>, prefix: &str) -> P {
        P::Like {
            column: column.into(),
            pattern: format!("{}%", escape_like(prefix)),
            escaped: true,
        }
    }

    pub fn has_suffix(column: impl Into<String>, suffix: &str) -> P {
        P::Like {
            column: column.into(),
            pattern: format!("%{}", escape_like(suffix)),
            escaped: true,
        }
    }

    pub fn contains(column: impl Into<String>, sub: &str) -> P {
        P::Like {
            column: column.into(),
            pattern: format!("%{}%", escape_like(sub)),
            escaped: true,
        }
    }

    pub fn and(preds: Vec<P>) -> P {
        P::And(preds)
    }

    pub fn or(preds: Vec<P>) -> P {
        P::Or(preds)
    }

    pub fn not(pred: P) -> P {
        P::Not(Box::new(pred))
    }

    pub fn exists(select: Selector) -> P {
        P::Exists {
            select: Box::new(select),
            negate: false,
        }
    }

    pub fn not_exists(select: Selector) -> P {
        P::Exists {
            select: Box::new(select),
            negate: true,
        }
    }

    /// Conjunction of `self` and `other`, flattening nested ANDs.
    pub fn and_with(self, other: P) -> P {
        match (self, other) {
            (P::True, other) => other,
            (this, P::True) => this,
            (P::And(mut left), P::And(right)) => {
                left.extend(right);
                P::And(left)
            }
            (P::And(mut left), other) => {
                left.push(other);
                P::And(left)
            }
            (this, other) => P::And(vec![this, other]),
        }
    }

    fn is_compound(&self) -> bool {
        matches!(self, P::And(v) | P::Or(v) if v.len() > 1)
    }

    fn render_child(&self, b: &mut Builder) {
        if self.is_compound() {
            b.wrap(|b| self.render(b));
        } else {
            self.render(b);
        }
    }

    fn render_joined(b: &mut Builder, preds: &[P], sep: &str, empty: &str) {
        match preds {
            [] => {
                b.write(empty);
            }
            [single] => single.render(b),
            many => {
                for (i, p) in many.iter().enumerate() {
                    if i > 0 {
                        b.write(sep);
                    }
                    p.render_child(b);
                }
            }
        }
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl Render for P {
    fn render(&self, b: &mut Builder) {
        match self {
            P::True => {
                b.write("TRUE");
            }
            P::False => {
                b.write("FALSE");
            }
            P::Cmp { column, op, value } => {
                b.ident(column).write(op.as_str()).arg(value.clone());
            }
            P::Columns { left, op, right } => {
                b.ident(left).write(op.as_str()).ident(right);
            }
            P::In {
                column,
                values,
                negate,
            } => {
                if values.is_empty() {
                    b.write(if *negate { "TRUE" } else { "FALSE" });
                    return;
                }
                b.ident(column)
                    .write(if *negate { " NOT IN " } else { " IN " })
                    .wrap(|b| {
                        b.args(values);
                    });
            }
            P::InSelect {
                column,
                select,
                negate,
            } => {
                b.ident(column)
                    .write(if *negate { " NOT IN " } else { " IN " })
                    .wrap(|b| select.render(b));
            }
            P::IsNull { column, negate } => {
                b.ident(column)
                    .write(if *negate { " IS NOT NULL" } else { " IS NULL" });
            }
            P::Like {
                column,
                pattern,
                escaped,
            } => {
                b.ident(column)
                    .write(" LIKE ")
                    .arg(Value::String(pattern.clone()));
                if *escaped && b.dialect() == Dialect::Sqlite {
                    b.write(" ESCAPE '\\'");
                }
            }
            P::And(preds) => P::render_joined(b, preds, " AND ", "TRUE"),
            P::Or(preds) => P::render_joined(b, preds, " OR ", "FALSE"),
            P::Not(inner) => {
                b.write("NOT ").wrap(|b| inner.render(b));
            }
            P::Exists { select, negate } => {
                b.write(if *negate { "NOT EXISTS " } else { "EXISTS " })
                    .wrap(|b| select.render(b));
            }
        }
    }
}

/// A filter applied to a [`Selector`], typically adding a WHERE condition
/// qualified with the selector's table.
pub type Predicate = Arc<dyn Fn(&mut Selector) + Send + Sync>;

/// Wraps a closure as a [`Predicate`].
pub fn predicate(f: impl Fn(&mut Selector) + Send + Sync + 'static) -> Predicate {
    Arc::new(f)
}

/// Debug helper for structures holding predicate lists.
pub(crate) struct Opaque(pub usize);

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} fn>", self.0)
    }
}

macro_rules! field_cmp {
    ($(#[$doc:meta] $name:ident => $ctor:ident),* $(,)?) => {
        $(
            #[$doc]
            pub fn $name(column: &str, value: impl Into<Value>) -> Predicate {
                let column = column.to_string();
                let value = value.into();
                Arc::new(move |s: &mut Selector| {
                    let p = P::$ctor(s.c(&column), value.clone());
                    s.where_(p);
                })
            }
        )*
    };
}

field_cmp! {
    /// `column = value`
    field_eq => eq,
    /// `column <> value`
    field_neq => neq,
    /// `column < value`
    field_lt => lt,
    /// `column <= value`
    field_lte => lte,
    /// `column > value`
    field_gt => gt,
    /// `column >= value`
    field_gte => gte,
}

pub fn field_in(column: &str, values: Vec<Value>) -> Predicate {
    let column = column.to_string();
    Arc::new(move |s: &mut Selector| {
        let p = P::in_values(s.c(&column), values.clone());
        s.where_(p);
    })
}

pub fn field_not_in(column: &str, values: Vec<Value>) -> Predicate {
    let column = column.to_string();
    Arc::new(move |s: &mut Selector| {
        let p = P::not_in(s.c(&column), values.clone());
        s.where_(p);
    })
}

pub fn field_is_null(column: &str) -> Predicate {
    let column = column.to_string();
    Arc::new(move |s: &mut Selector| {
        let p = P::is_null(s.c(&column));
        s.where_(p);
    })
}

pub fn field_not_null(column: &str) -> Predicate {
    let column = column.to_string();
    Arc::new(move |s: &mut Selector| {
        let p = P::not_null(s.c(&column));
        s.where_(p);
    })
}

pub fn field_has_prefix(column: &str, prefix: &str) -> Predicate {
    let column = column.to_string();
    let prefix = prefix.to_string();
    Arc::new(move |s: &mut Selector| {
        let p = P::has_prefix(s.c(&column), &prefix);
        s.where_(p);
    })
}

pub fn field_contains(column: &str, sub: &str) -> Predicate {
    let column = column.to_string();
    let sub = sub.to_string();
    Arc::new(move |s: &mut Selector| {
        let p = P::contains(s.c(&column), &sub);
        s.where_(p);
    })
}

/// Runs each predicate against a scratch copy of the selector and collects
/// the conditions it adds.
fn collect(s: &Selector, preds: &[Predicate]) -> Vec<P> {
    preds
        .iter()
        .filter_map(|pred| {
            let mut probe = s.clone();
            probe.clear_where();
            pred(&mut probe);
            probe.take_where()
        })
        .collect()
}

pub fn and_preds(preds: Vec<Predicate>) -> Predicate {
    Arc::new(move |s: &mut Selector| {
        let parts = collect(s, &preds);
        s.where_(P::and(parts));
    })
}

pub fn or_preds(preds: Vec<Predicate>) -> Predicate {
    Arc::new(move |s: &mut Selector| {
        let parts = collect(s, &preds);
        s.where_(P::or(parts));
    })
}

pub fn not_pred(pred: Predicate) -> Predicate {
    Arc::new(move |s: &mut Selector| {
        let parts = collect(s, std::slice::from_ref(&pred));
        s.where_(P::not(P::and(parts)));
    })
}

/// `ORDER BY column ASC`
pub fn asc(column: &str) -> Predicate {
    let column = column.to_string();
    Arc::new(move |s: &mut Selector| {
        let c = s.c(&column);
        s.order_by(c, false);
    })
}

/// `ORDER BY column DESC`
pub fn desc(column: &str) -> Predicate {
    let column = column.to_string();
    Arc::new(move |s: &mut Selector| {
        let c = s.c(&column);
        s.order_by(c, true);
    })
}

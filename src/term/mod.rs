//! Query AST: `Term`, the builder API, and canonical JSON encoding.

mod datum;
mod print;
mod types;

pub use datum::{DecodeOpts, Datum, Format};
pub use print::pretty_print;
pub use types::{RenderStyle, TermType};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Number, Value};

use crate::connection::{Connection, QueryResult, RunOpts};
use crate::error::{Error, Result};

/// A node in the query AST. Immutable once built; every combinator takes
/// `self` by value and returns a new `Term`.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// A scalar leaf: null, bool, number, or string.
    Scalar(Datum),
    /// An array-of-Term literal (spec §3); encodes as `MAKE_ARRAY`.
    Array(Vec<Term>),
    /// An object-of-Term literal; encodes as a plain JSON object unless it
    /// carries a `$reql_type$` key.
    Object(BTreeMap<String, Term>),
    /// `(type_code, positional_args, optional_args)`.
    Op {
        term_type: TermType,
        args: Vec<Term>,
        optargs: BTreeMap<String, Term>,
    },
}

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(1);

impl Term {
    fn op(term_type: TermType, args: Vec<Term>) -> Term {
        Term::Op {
            term_type,
            args,
            optargs: BTreeMap::new(),
        }
    }

    fn op_opts(term_type: TermType, args: Vec<Term>, optargs: BTreeMap<String, Term>) -> Term {
        Term::Op {
            term_type,
            args,
            optargs,
        }
    }

    /// Build a one-argument anonymous function term (`FUNC`): a fresh
    /// variable id is minted, `f` is applied to a `VAR` referencing it, and
    /// the result is wrapped with the parameter list per the wire format.
    pub fn func1(f: impl FnOnce(Term) -> Term) -> Term {
        let var_id = NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed);
        let param = Term::op(TermType::Var, vec![Term::from(var_id as i64)]);
        let body = f(param);
        let params = Term::Array(vec![Term::from(var_id as i64)]);
        Term::op(TermType::Func, vec![params, body])
    }

    /// Two-argument variant, used by `inner_join`/`outer_join`/`reduce`.
    pub fn func2(f: impl FnOnce(Term, Term) -> Term) -> Term {
        let a = NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed);
        let b = NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed);
        let pa = Term::op(TermType::Var, vec![Term::from(a as i64)]);
        let pb = Term::op(TermType::Var, vec![Term::from(b as i64)]);
        let body = f(pa, pb);
        let params = Term::Array(vec![Term::from(a as i64), Term::from(b as i64)]);
        Term::op(TermType::Func, vec![params, body])
    }

    /// The implicit-row reference used by shorthand filter/map predicates
    /// (`r.row()`).
    pub fn row() -> Term {
        Term::op(TermType::Implicit, vec![])
    }

    // -- arithmetic / comparison / logical -----------------------------

    pub fn add(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::Add, vec![self, rhs.into()])
    }
    pub fn sub(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::Sub, vec![self, rhs.into()])
    }
    pub fn mul(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::Mul, vec![self, rhs.into()])
    }
    pub fn div(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::Div, vec![self, rhs.into()])
    }
    pub fn rem(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::Mod, vec![self, rhs.into()])
    }
    pub fn eq(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::Eq, vec![self, rhs.into()])
    }
    pub fn ne(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::Ne, vec![self, rhs.into()])
    }
    pub fn lt(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::Lt, vec![self, rhs.into()])
    }
    pub fn le(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::Le, vec![self, rhs.into()])
    }
    pub fn gt(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::Gt, vec![self, rhs.into()])
    }
    pub fn ge(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::Ge, vec![self, rhs.into()])
    }
    pub fn and(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::And, vec![self, rhs.into()])
    }
    pub fn or(self, rhs: impl Into<Term>) -> Term {
        Term::op(TermType::Or, vec![self, rhs.into()])
    }
    pub fn not(self) -> Term {
        Term::op(TermType::Not, vec![self])
    }

    // -- access ---------------------------------------------------------

    /// Index by position (array) or key (object), or field access.
    pub fn bracket(self, index: impl Into<Term>) -> Term {
        Term::op(TermType::Bracket, vec![self, index.into()])
    }

    pub fn get_field(self, name: impl Into<String>) -> Term {
        Term::op(TermType::GetField, vec![self, Term::from(name.into())])
    }

    pub fn get(self, key: impl Into<Term>) -> Term {
        Term::op(TermType::Get, vec![self, key.into()])
    }

    pub fn has_fields(self, fields: Vec<&str>) -> Term {
        Term::op(
            TermType::HasFields,
            vec![self, Term::Array(fields.into_iter().map(Term::from).collect())],
        )
    }

    pub fn pluck(self, fields: Vec<&str>) -> Term {
        Term::op(
            TermType::Pluck,
            vec![self, Term::Array(fields.into_iter().map(Term::from).collect())],
        )
    }

    pub fn without(self, fields: Vec<&str>) -> Term {
        Term::op(
            TermType::Without,
            vec![self, Term::Array(fields.into_iter().map(Term::from).collect())],
        )
    }

    pub fn merge(self, other: impl Into<Term>) -> Term {
        Term::op(TermType::Merge, vec![self, other.into()])
    }

    // -- collection ops ---------------------------------------------------

    pub fn filter(self, predicate: Term) -> Term {
        Term::op(TermType::Filter, vec![self, predicate])
    }

    pub fn map(self, f: Term) -> Term {
        Term::op(TermType::Map, vec![self, f])
    }

    pub fn concat_map(self, f: Term) -> Term {
        Term::op(TermType::ConcatMap, vec![self, f])
    }

    pub fn order_by(self, keys: Vec<Term>) -> Term {
        let mut args = vec![self];
        args.extend(keys);
        Term::op(TermType::OrderBy, args)
    }

    pub fn group(self, keys: Vec<&str>) -> Term {
        let mut args = vec![self];
        args.extend(keys.into_iter().map(Term::from));
        Term::op(TermType::Group, args)
    }

    pub fn count(self) -> Term {
        Term::op(TermType::Count, vec![self])
    }

    pub fn sum(self, field: Option<&str>) -> Term {
        let mut args = vec![self];
        if let Some(f) = field {
            args.push(Term::from(f));
        }
        Term::op(TermType::Sum, args)
    }

    pub fn avg(self, field: Option<&str>) -> Term {
        let mut args = vec![self];
        if let Some(f) = field {
            args.push(Term::from(f));
        }
        Term::op(TermType::Avg, args)
    }

    pub fn min(self, field: Option<&str>) -> Term {
        let mut args = vec![self];
        if let Some(f) = field {
            args.push(Term::from(f));
        }
        Term::op(TermType::Min, args)
    }

    pub fn max(self, field: Option<&str>) -> Term {
        let mut args = vec![self];
        if let Some(f) = field {
            args.push(Term::from(f));
        }
        Term::op(TermType::Max, args)
    }

    pub fn distinct(self) -> Term {
        Term::op(TermType::Distinct, vec![self])
    }

    pub fn contains(self, value: impl Into<Term>) -> Term {
        Term::op(TermType::Contains, vec![self, value.into()])
    }

    pub fn union(self, other: impl Into<Term>) -> Term {
        Term::op(TermType::Union, vec![self, other.into()])
    }

    pub fn inner_join(self, other: impl Into<Term>, predicate: Term) -> Term {
        Term::op(TermType::InnerJoin, vec![self, other.into(), predicate])
    }

    pub fn outer_join(self, other: impl Into<Term>, predicate: Term) -> Term {
        Term::op(TermType::OuterJoin, vec![self, other.into(), predicate])
    }

    pub fn eq_join(self, left_field: &str, other: impl Into<Term>) -> Term {
        Term::op(
            TermType::EqJoin,
            vec![self, Term::from(left_field), other.into()],
        )
    }

    pub fn zip(self) -> Term {
        Term::op(TermType::Zip, vec![self])
    }

    pub fn slice(self, start: impl Into<Term>, end: impl Into<Term>) -> Term {
        Term::op(TermType::Slice, vec![self, start.into(), end.into()])
    }

    pub fn skip(self, n: impl Into<Term>) -> Term {
        Term::op(TermType::Skip, vec![self, n.into()])
    }

    pub fn limit(self, n: impl Into<Term>) -> Term {
        Term::op(TermType::Limit, vec![self, n.into()])
    }

    pub fn nth(self, index: impl Into<Term>) -> Term {
        Term::op(TermType::Nth, vec![self, index.into()])
    }

    pub fn sample(self, n: impl Into<Term>) -> Term {
        Term::op(TermType::Sample, vec![self, n.into()])
    }

    pub fn fold(self, base: impl Into<Term>, f: Term) -> Term {
        Term::op(TermType::Fold, vec![self, base.into(), f])
    }

    // -- table/db ---------------------------------------------------------

    pub fn db(name: impl Into<String>) -> Term {
        Term::op(TermType::Db, vec![Term::from(name.into())])
    }

    pub fn table(self, name: impl Into<String>) -> Term {
        Term::op(TermType::Table, vec![self, Term::from(name.into())])
    }

    /// Table access without an explicit db term; `run`'s `db` global opt
    /// (or the connection's default db) supplies the database.
    pub fn table_from_default_db(name: impl Into<String>) -> Term {
        Term::op(TermType::Table, vec![Term::from(name.into())])
    }

    pub fn get_all(self, keys: Vec<Term>, index: Option<&str>) -> Term {
        let mut args = vec![self];
        args.extend(keys);
        let mut optargs = BTreeMap::new();
        if let Some(idx) = index {
            optargs.insert("index".to_string(), Term::from(idx));
        }
        Term::op_opts(TermType::GetAll, args, optargs)
    }

    pub fn between(self, lower: impl Into<Term>, upper: impl Into<Term>) -> Term {
        Term::op(TermType::Between, vec![self, lower.into(), upper.into()])
    }

    pub fn insert(self, docs: impl Into<Term>) -> Term {
        Term::op(TermType::Insert, vec![self, docs.into()])
    }

    pub fn update(self, patch: Term) -> Term {
        Term::op(TermType::Update, vec![self, patch])
    }

    pub fn replace(self, doc: Term) -> Term {
        Term::op(TermType::Replace, vec![self, doc])
    }

    pub fn delete(self) -> Term {
        Term::op(TermType::Delete, vec![self])
    }

    pub fn table_create(self, name: impl Into<String>) -> Term {
        Term::op(TermType::TableCreate, vec![self, Term::from(name.into())])
    }

    pub fn table_drop(self, name: impl Into<String>) -> Term {
        Term::op(TermType::TableDrop, vec![self, Term::from(name.into())])
    }

    pub fn table_list(self) -> Term {
        Term::op(TermType::TableList, vec![self])
    }

    pub fn db_create(name: impl Into<String>) -> Term {
        Term::op(TermType::DbCreate, vec![Term::from(name.into())])
    }

    pub fn db_drop(name: impl Into<String>) -> Term {
        Term::op(TermType::DbDrop, vec![Term::from(name.into())])
    }

    pub fn db_list() -> Term {
        Term::op(TermType::DbList, vec![])
    }

    pub fn index_create(self, name: impl Into<String>) -> Term {
        Term::op(TermType::IndexCreate, vec![self, Term::from(name.into())])
    }

    pub fn index_drop(self, name: impl Into<String>) -> Term {
        Term::op(TermType::IndexDrop, vec![self, Term::from(name.into())])
    }

    pub fn index_list(self) -> Term {
        Term::op(TermType::IndexList, vec![self])
    }

    pub fn index_wait(self, name: Option<&str>) -> Term {
        let mut args = vec![self];
        if let Some(n) = name {
            args.push(Term::from(n));
        }
        Term::op(TermType::IndexWait, args)
    }

    pub fn index_status(self, name: Option<&str>) -> Term {
        let mut args = vec![self];
        if let Some(n) = name {
            args.push(Term::from(n));
        }
        Term::op(TermType::IndexStatus, args)
    }

    // -- control ----------------------------------------------------------

    pub fn branch(condition: impl Into<Term>, then: impl Into<Term>, otherwise: impl Into<Term>) -> Term {
        Term::op(
            TermType::Branch,
            vec![condition.into(), then.into(), otherwise.into()],
        )
    }

    /// `do`: evaluate `f` with `self` as its argument. Named `do_` because
    /// `do` is a Rust keyword.
    pub fn do_(self, f: Term) -> Term {
        Term::op(TermType::Funcall, vec![f, self])
    }

    pub fn for_each(self, f: Term) -> Term {
        Term::op(TermType::ForEach, vec![self, f])
    }

    pub fn error(message: impl Into<String>) -> Term {
        Term::op(TermType::Error, vec![Term::from(message.into())])
    }

    pub fn default(self, value: impl Into<Term>) -> Term {
        Term::op(TermType::Default, vec![self, value.into()])
    }

    pub fn coerce_to(self, type_name: impl Into<String>) -> Term {
        Term::op(TermType::CoerceTo, vec![self, Term::from(type_name.into())])
    }

    pub fn type_of(self) -> Term {
        Term::op(TermType::TypeOf, vec![self])
    }

    // -- realtime -----------------------------------------------------------

    /// Produces a term whose result is an infinite cursor (spec §4.1).
    pub fn changes(self) -> Term {
        Term::op(TermType::Changes, vec![self])
    }

    // -- encoding ---------------------------------------------------------

    /// Canonical JSON encoding (spec §4.1).
    pub fn encode(&self) -> Value {
        match self {
            Term::Scalar(d) => d.to_json(),
            Term::Array(items) => {
                let encoded: Vec<Value> = items.iter().map(Term::encode).collect();
                Value::Array(vec![
                    Value::Number(Number::from(TermType::MakeArray as i64)),
                    Value::Array(encoded),
                ])
            }
            Term::Object(map) => {
                let mut obj = Map::new();
                for (k, v) in map {
                    obj.insert(k.clone(), v.encode());
                }
                Value::Object(obj)
            }
            Term::Op {
                term_type,
                args,
                optargs,
            } => {
                let encoded_args: Vec<Value> = args.iter().map(Term::encode).collect();
                if optargs.is_empty() {
                    Value::Array(vec![
                        Value::Number(Number::from(*term_type as i64)),
                        Value::Array(encoded_args),
                    ])
                } else {
                    let mut obj = Map::new();
                    for (k, v) in optargs {
                        obj.insert(k.clone(), v.encode());
                    }
                    Value::Array(vec![
                        Value::Number(Number::from(*term_type as i64)),
                        Value::Array(encoded_args),
                        Value::Object(obj),
                    ])
                }
            }
        }
    }

    /// Decode a pure-datum-leaf term back from JSON (Testable Property 2).
    /// Operator nodes that are not `MAKE_ARRAY` cannot round-trip through
    /// this path since a bare encoded operator is indistinguishable from
    /// the server wanting to evaluate it; this is only meaningful for
    /// terms built entirely out of scalars/arrays/objects.
    pub fn decode(value: &Value) -> Result<Term> {
        match value {
            Value::Array(items) if items.len() >= 2 => {
                let code = items[0]
                    .as_i64()
                    .ok_or_else(|| Error::driver("malformed term: non-integer type code"))?;
                if code == TermType::MakeArray as i64 {
                    let elems = items[1]
                        .as_array()
                        .ok_or_else(|| Error::driver("malformed MAKE_ARRAY term"))?;
                    let mut out = Vec::with_capacity(elems.len());
                    for e in elems {
                        out.push(Term::decode(e)?);
                    }
                    Ok(Term::Array(out))
                } else {
                    Err(Error::driver("cannot decode non-datum operator term"))
                }
            }
            Value::Object(_) => Ok(Term::Scalar(Datum::from_json(value)?)),
            other => Ok(Term::Scalar(Datum::from_json(other)?)),
        }
    }

    /// Submit this term through `connection`, returning a scalar, a
    /// `Cursor`, or `None` per spec §4.4 step 6.
    pub async fn run(self, connection: &Connection, opts: RunOpts) -> Result<Option<QueryResult>> {
        connection.run(self, opts).await
    }

    /// Like `run`, but uses the task-local default connection registered by
    /// a prior `Connection::repl()` call (SPEC_FULL §B.1).
    pub async fn run_repl(self, opts: RunOpts) -> Result<Option<QueryResult>> {
        let connection = Connection::default()
            .ok_or_else(|| Error::driver("no default connection; call Connection::repl() first"))?;
        connection.run(self, opts).await
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Self {
        Term::Scalar(Datum::Bool(b))
    }
}
impl From<i64> for Term {
    fn from(n: i64) -> Self {
        Term::Scalar(Datum::from(n))
    }
}
impl From<i32> for Term {
    fn from(n: i32) -> Self {
        Term::Scalar(Datum::from(n as i64))
    }
}
impl From<f64> for Term {
    fn from(n: f64) -> Self {
        Term::Scalar(Datum::from(n))
    }
}
impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term::Scalar(Datum::from(s))
    }
}
impl From<String> for Term {
    fn from(s: String) -> Self {
        Term::Scalar(Datum::from(s))
    }
}
impl From<Datum> for Term {
    fn from(d: Datum) -> Self {
        Term::Scalar(d)
    }
}
impl<T: Into<Term>> From<Vec<T>> for Term {
    fn from(items: Vec<T>) -> Self {
        Term::Array(items.into_iter().map(Into::into).collect())
    }
}

/// `r.expr(..)`: lift a plain value into a `Term`.
pub fn expr(value: impl Into<Term>) -> Term {
    value.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_a_add_encodes_to_pinned_literal() {
        let term = expr(1i64).add(2i64);
        assert_eq!(term.encode(), serde_json::json!([24, [1, 2]]));
    }

    #[test]
    fn scenario_b_map_places_make_array_and_func() {
        let term = expr(vec![1i64, 2, 3]).map(Term::func1(|x| x.mul(2i64)));
        let encoded = term.encode();
        let arr = encoded.as_array().unwrap();
        assert_eq!(arr[0], serde_json::json!(38)); // MAP
        let args = arr[1].as_array().unwrap();
        assert_eq!(args[0][0], serde_json::json!(2)); // MAKE_ARRAY
        assert_eq!(args[1][0], serde_json::json!(69)); // FUNC
    }

    #[test]
    fn pure_datum_term_round_trips() {
        let term = expr(vec![1i64, 2, 3]);
        let encoded = term.encode();
        let decoded = Term::decode(&encoded).unwrap();
        assert_eq!(term, decoded);
    }

    #[test]
    fn db_table_get_chains_without_opts() {
        let term = Term::db("test").table("m").get(1i64);
        let encoded = term.encode();
        assert_eq!(encoded[0], serde_json::json!(16)); // GET
    }
}

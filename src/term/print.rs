//! Backtrace-aware pretty printer (spec §4.1, Testable Property 9).
//!
//! Renders a term as a human-readable expression while threading a
//! parallel "mark" string of the same length; descending into the child
//! indexed by each backtrace step turns its span into carets, everything
//! else becomes spaces.

use super::types::RenderStyle;
use super::{Datum, Term, TermType};
use crate::error::BacktraceFrame;

/// The two aligned output lines: the pretty-printed query and the caret
/// trail marking the sub-term blamed by `backtrace`.
pub struct Printed {
    pub query: String,
    pub carets: String,
}

pub fn pretty_print(term: &Term, backtrace: &[BacktraceFrame]) -> Printed {
    let mut query = String::new();
    let mut carets = String::new();
    render(term, backtrace, &mut query, &mut carets, true);
    Printed { query, carets }
}

/// Appends `term`'s rendering to `query`/`carets`. `marked` is true when
/// this subtree (or an ancestor on the path so far) is still being
/// tracked by a remaining backtrace step; once the path is exhausted
/// everything rendered afterward is left unmarked (spaces).
fn render(term: &Term, backtrace: &[BacktraceFrame], query: &mut String, carets: &mut String, marked: bool) {
    let start = query.len();
    match term {
        Term::Scalar(datum) => render_datum(datum, query),
        Term::Array(items) => {
            query.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    query.push_str(", ");
                }
                render_child(item, backtrace, BacktraceFrame::Index(i), query, carets, marked);
            }
            query.push(']');
        }
        Term::Object(map) => render_object_terms(map, query),
        Term::Op {
            term_type,
            args,
            optargs,
        } => render_op(*term_type, args, optargs, backtrace, query, carets, marked),
    }
    let end = query.len();
    let span_is_blamed = marked && backtrace.is_empty();
    pad_carets(carets, start, end, span_is_blamed);
}

fn render_child(
    child: &Term,
    backtrace: &[BacktraceFrame],
    this_frame: BacktraceFrame,
    query: &mut String,
    carets: &mut String,
    marked: bool,
) {
    let (child_marked, rest) = match backtrace.first() {
        None => (marked, backtrace),
        Some(frame) if marked && *frame == this_frame => (true, &backtrace[1..]),
        Some(_) => (false, &backtrace[0..0]),
    };
    render(child, rest, query, carets, child_marked);
}

fn render_datum(datum: &Datum, out: &mut String) {
    match datum {
        Datum::Null => out.push_str("null"),
        Datum::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Datum::Number(n) => out.push_str(&n.to_string()),
        Datum::String(s) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
        Datum::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_datum(item, out);
            }
            out.push(']');
        }
        Datum::Object(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(k);
                out.push_str(": ");
                render_datum(v, out);
            }
            out.push('}');
        }
        Datum::Time { .. } => out.push_str("<time>"),
        Datum::Binary(_) => out.push_str("<binary>"),
        Datum::GroupedData(_) => out.push_str("<grouped_data>"),
    }
}

fn render_object_terms(map: &std::collections::BTreeMap<String, Term>, out: &mut String) {
    out.push('{');
    for (i, (k, v)) in map.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(k);
        out.push_str(": ");
        out.push_str(&pretty_print(v, &[]).query);
    }
    out.push('}');
}

fn render_op(
    term_type: TermType,
    args: &[Term],
    optargs: &std::collections::BTreeMap<String, Term>,
    backtrace: &[BacktraceFrame],
    query: &mut String,
    carets: &mut String,
    marked: bool,
) {
    match term_type.render_style() {
        RenderStyle::Infix if args.len() == 2 => {
            let op = infix_symbol(term_type);
            render_child(&args[0], backtrace, BacktraceFrame::Index(0), query, carets, marked);
            query.push(' ');
            query.push_str(op);
            query.push(' ');
            render_child(&args[1], backtrace, BacktraceFrame::Index(1), query, carets, marked);
        }
        RenderStyle::BracketIndex if args.len() == 2 => {
            render_child(&args[0], backtrace, BacktraceFrame::Index(0), query, carets, marked);
            query.push('[');
            render_child(&args[1], backtrace, BacktraceFrame::Index(1), query, carets, marked);
            query.push(']');
        }
        _ => render_method_call(term_type, args, optargs, backtrace, query, carets, marked),
    }
}

fn render_method_call(
    term_type: TermType,
    args: &[Term],
    optargs: &std::collections::BTreeMap<String, Term>,
    backtrace: &[BacktraceFrame],
    query: &mut String,
    carets: &mut String,
    marked: bool,
) {
    let name = term_type.name();
    if args.is_empty() {
        query.push_str("r.");
        query.push_str(name);
        query.push_str("()");
        return;
    }
    // First argument is the receiver for a method-style call; remaining
    // are parenthesized parameters. Unknown/zero-arity cases fall back to
    // `r.<name>(...)`.
    render_child(&args[0], backtrace, BacktraceFrame::Index(0), query, carets, marked);
    query.push('.');
    query.push_str(name);
    query.push('(');
    for (i, arg) in args[1..].iter().enumerate() {
        if i > 0 {
            query.push_str(", ");
        }
        render_child(arg, backtrace, BacktraceFrame::Index(i + 1), query, carets, marked);
    }
    let mut first = args.len() <= 1;
    for (key, value) in optargs {
        if !first {
            query.push_str(", ");
        }
        first = false;
        query.push_str(key);
        query.push_str(" = ");
        render_child(value, backtrace, BacktraceFrame::Key(key.clone()), query, carets, marked);
    }
    query.push(')');
}

fn infix_symbol(term_type: TermType) -> &'static str {
    match term_type {
        TermType::Add => "+",
        TermType::Sub => "-",
        TermType::Mul => "*",
        TermType::Div => "/",
        TermType::Mod => "%",
        TermType::Eq => "==",
        TermType::Ne => "!=",
        TermType::Lt => "<",
        TermType::Le => "<=",
        TermType::Gt => ">",
        TermType::Ge => ">=",
        TermType::And => "&&",
        TermType::Or => "||",
        _ => "?",
    }
}

fn pad_carets(carets: &mut String, start: usize, end: usize, mark: bool) {
    let ch = if mark { '^' } else { ' ' };
    while carets.len() < end {
        carets.push(if carets.len() >= start { ch } else { ' ' });
    }
}

use winnow::combinator::{alt, terminated};
use winnow::error::ModalResult;
use winnow::prelude::*;
use winnow::token::rest;

use super::{CompareOp, Operand, Pattern};
use crate::types::canonical_text;

// -- Markers ----------------------------------------------------------------

fn marker_name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    terminated(
        alt((
            "lower", "wildcard", "regex", "gte", "gt", "lte", "lt", "inlist",
        )),
        '(',
    )
    .parse_next(input)
}

/// Everything up to the last closing parenthesis; trailing text is ignored.
fn until_last_close(body: &str) -> Option<&str> {
    body.rfind(')').map(|end| &body[..end])
}

fn marked<'i>(input: &mut &'i str) -> ModalResult<(&'i str, &'i str)> {
    let name = marker_name.parse_next(input)?;
    let body = rest.verify_map(until_last_close).parse_next(input)?;
    Ok((name, body))
}

// -- Classification ---------------------------------------------------------

fn clean(raw: &str) -> String {
    canonical_text(&raw.replace('"', ""))
}

fn wildcard(body: &str) -> Operand {
    let leading = body.starts_with('*');
    let trailing = body.ends_with('*');
    let inner = body.strip_prefix('*').unwrap_or(body);
    let inner = inner.strip_suffix('*').unwrap_or(inner);
    let value = clean(inner);
    match (leading, trailing) {
        (true, true) => Operand::Contains(value),
        (true, false) => Operand::EndsWith(value),
        (false, true) => Operand::StartsWith(value),
        (false, false) => Operand::Equals(value),
    }
}

fn classify((name, body): (&str, &str)) -> Operand {
    match name {
        "lower" => Operand::Lower(clean(body)),
        "wildcard" => wildcard(body),
        "regex" => Operand::Regex(Pattern::new(&clean(body))),
        "gte" => Operand::Compare {
            op: CompareOp::Gte,
            bound: clean(body),
        },
        "gt" => Operand::Compare {
            op: CompareOp::Gt,
            bound: clean(body),
        },
        "lte" => Operand::Compare {
            op: CompareOp::Lte,
            bound: clean(body),
        },
        "lt" => Operand::Compare {
            op: CompareOp::Lt,
            bound: clean(body),
        },
        "inlist" => Operand::InList(body.trim().to_owned()),
        _ => Operand::Equals(clean(body)),
    }
}

pub(super) fn operand(input: &mut &str) -> ModalResult<Operand> {
    alt((
        marked.map(classify),
        rest.map(|raw: &str| Operand::Equals(clean(raw))),
    ))
    .parse_next(input)
}

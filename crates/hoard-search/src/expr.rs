//! The search expression language: whitespace-separated terms, quoted
//! phrases, leading `-` negation, and `operator:value` keywords, compiled
//! into the constraint tree.

use crate::constraint::{
    Constraint, FileConstraint, FloatConstraint, IntConstraint, PermanodeConstraint,
    SearchQuery, StringConstraint,
};
use crate::error::{SearchError, SearchResult};

/// Parse an expression into a query. Empty input yields the trivial
/// "all non-hidden permanodes" query.
pub fn parse_expression(expr: &str) -> SearchResult<SearchQuery> {
    let base = Constraint::all_non_hidden();
    let terms = split_expr(expr);
    let mut constraint = base;
    for term in &terms {
        let (negated, body) = match term.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, term.as_str()),
        };
        let mut atom = parse_atom(body)?;
        if negated {
            atom = Constraint::not(atom);
        }
        constraint = Constraint::and(constraint, atom);
    }
    Ok(SearchQuery {
        constraint: Some(constraint),
        ..Default::default()
    })
}

fn parse_atom(body: &str) -> SearchResult<Constraint> {
    if let Some((op, value)) = body.split_once(':') {
        return match op {
            "tag" => Ok(Constraint::permanode(PermanodeConstraint {
                attr: Some("tag".into()),
                value: Some(value.into()),
                skip_hidden: true,
                ..Default::default()
            })),
            "title" => Ok(Constraint::permanode(PermanodeConstraint {
                attr: Some("title".into()),
                value_matches: Some(StringConstraint {
                    contains: Some(value.into()),
                    case_insensitive: true,
                    ..Default::default()
                }),
                skip_hidden: true,
                ..Default::default()
            })),
            "attr" => {
                let (attr, v) = value.split_once(':').ok_or_else(|| {
                    SearchError::BadExpression(format!("attr:{value}: want attr:<name>:<value>"))
                })?;
                Ok(Constraint::permanode(PermanodeConstraint {
                    attr: Some(attr.into()),
                    value: Some(v.into()),
                    ..Default::default()
                }))
            }
            "is" => parse_is(value),
            "width" => Ok(content_matches(FileConstraint {
                is_image: true,
                width: Some(parse_int_range(value)?),
                ..Default::default()
            })),
            "height" => Ok(content_matches(FileConstraint {
                is_image: true,
                height: Some(parse_int_range(value)?),
                ..Default::default()
            })),
            "format" => Ok(content_matches(FileConstraint {
                mime_type: Some(mime_of_format(value)?),
                ..Default::default()
            })),
            _ => Err(SearchError::BadExpression(format!(
                "unknown operator {op:?}"
            ))),
        };
    }
    // A bare word searches tags exactly and titles loosely.
    Ok(Constraint::or(
        Constraint::permanode(PermanodeConstraint {
            attr: Some("tag".into()),
            value: Some(body.into()),
            skip_hidden: true,
            ..Default::default()
        }),
        Constraint::permanode(PermanodeConstraint {
            attr: Some("title".into()),
            value_matches: Some(StringConstraint {
                contains: Some(body.into()),
                case_insensitive: true,
                ..Default::default()
            }),
            skip_hidden: true,
            ..Default::default()
        }),
    ))
}

fn parse_is(value: &str) -> SearchResult<Constraint> {
    let fc = match value {
        "image" => FileConstraint {
            is_image: true,
            ..Default::default()
        },
        "pano" => FileConstraint {
            is_image: true,
            wh_ratio: Some(FloatConstraint {
                min: Some(2.0),
                ..Default::default()
            }),
            ..Default::default()
        },
        "landscape" => FileConstraint {
            is_image: true,
            wh_ratio: Some(FloatConstraint {
                min: Some(1.0),
                ..Default::default()
            }),
            ..Default::default()
        },
        "portrait" => FileConstraint {
            is_image: true,
            wh_ratio: Some(FloatConstraint {
                max: Some(1.0),
                ..Default::default()
            }),
            ..Default::default()
        },
        other => {
            return Err(SearchError::BadExpression(format!(
                "unknown is:{other} predicate"
            )))
        }
    };
    Ok(content_matches(fc))
}

/// Constrain a permanode by the file its `camliContent` points at.
fn content_matches(fc: FileConstraint) -> Constraint {
    Constraint::permanode(PermanodeConstraint {
        attr: Some("camliContent".into()),
        value_in_set: Some(Box::new(Constraint::file(fc))),
        ..Default::default()
    })
}

fn parse_int_range(s: &str) -> SearchResult<IntConstraint> {
    let (lo, hi) = s
        .split_once('-')
        .ok_or_else(|| SearchError::BadExpression(format!("{s:?}: want <min>-<max>")))?;
    let parse = |part: &str| -> SearchResult<Option<i64>> {
        if part.is_empty() {
            return Ok(None);
        }
        part.parse()
            .map(Some)
            .map_err(|_| SearchError::BadExpression(format!("bad number {part:?}")))
    };
    Ok(IntConstraint {
        min: parse(lo)?,
        max: parse(hi)?,
    })
}

fn mime_of_format(f: &str) -> SearchResult<String> {
    Ok(match f {
        "jpg" | "jpeg" => "image/jpeg".into(),
        "png" => "image/png".into(),
        "gif" => "image/gif".into(),
        "pdf" => "application/pdf".into(),
        other => {
            return Err(SearchError::BadExpression(format!(
                "unknown format:{other}"
            )))
        }
    })
}

/// Split an expression into terms: whitespace-separated, double-quoted
/// phrases kept intact (quotes stripped), `-` negation glued to its term.
pub fn split_expr(expr: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for token in tokenize_expr(expr) {
        match token.as_str() {
            " " => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            _ => {
                let trimmed = token.trim_matches('"');
                current.push_str(trimmed);
            }
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Tokenize into runs of whitespace (normalized to `" "`), `-`, quoted
/// strings, `op:` prefixes, and bare words.
pub fn tokenize_expr(expr: &str) -> Vec<String> {
    let mut out = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            out.push(" ".to_string());
            continue;
        }
        if c == '-' && (out.last().is_none_or(|t| t == " " || t == "-")) {
            out.push("-".to_string());
            i += 1;
            continue;
        }
        if c == '"' {
            let mut s = String::from('"');
            i += 1;
            while i < chars.len() && chars[i] != '"' {
                s.push(chars[i]);
                i += 1;
            }
            s.push('"');
            i += 1; // closing quote
            out.push(s);
            continue;
        }
        let mut word = String::new();
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '"' {
            word.push(chars[i]);
            i += 1;
            if word.ends_with(':') {
                break;
            }
        }
        out.push(word);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yields_all_non_hidden() {
        for input in ["", "  ", "\n"] {
            let q = parse_expression(input).unwrap();
            assert_eq!(q.constraint, Some(Constraint::all_non_hidden()));
        }
    }

    #[test]
    fn tag_atom() {
        let q = parse_expression("tag:funny").unwrap();
        let expected = Constraint::and(
            Constraint::all_non_hidden(),
            Constraint::permanode(PermanodeConstraint {
                attr: Some("tag".into()),
                value: Some("funny".into()),
                skip_hidden: true,
                ..Default::default()
            }),
        );
        assert_eq!(q.constraint, Some(expected));
    }

    #[test]
    fn title_atom_is_loose_match() {
        let q = parse_expression("title:Doggies").unwrap();
        let c = q.constraint.unwrap();
        let logical = c.logical.unwrap();
        let pc = logical.b.unwrap().permanode.clone().unwrap();
        let vm = pc.value_matches.unwrap();
        assert_eq!(vm.contains.as_deref(), Some("Doggies"));
        assert!(vm.case_insensitive);
    }

    #[test]
    fn is_pano_constrains_ratio() {
        let q = parse_expression("is:pano").unwrap();
        let json = serde_json::to_value(&q).unwrap();
        let fc = &json["constraint"]["logical"]["b"]["permanode"]["valueInSet"]["file"];
        assert_eq!(fc["isImage"], true);
        assert_eq!(fc["whRatio"]["min"], 2.0);
    }

    #[test]
    fn width_range() {
        let q = parse_expression("width:0-640").unwrap();
        let json = serde_json::to_value(&q).unwrap();
        let w = &json["constraint"]["logical"]["b"]["permanode"]["valueInSet"]["file"]["width"];
        assert_eq!(w["min"], 0);
        assert_eq!(w["max"], 640);
    }

    #[test]
    fn negation_wraps_in_not() {
        let q = parse_expression("-tag:boring").unwrap();
        let c = q.constraint.unwrap();
        let outer = c.logical.unwrap();
        assert_eq!(outer.op, "and");
        let negated = outer.b.unwrap().logical.clone().unwrap();
        assert_eq!(negated.op, "not");
        assert!(negated.b.is_none());
    }

    #[test]
    fn unknown_operator_is_an_error() {
        assert!(matches!(
            parse_expression("bogus:operator"),
            Err(SearchError::BadExpression(_))
        ));
    }

    #[test]
    fn parse_is_idempotent_on_canonical_json() {
        let q1 = parse_expression("tag:foo -tag:bar is:image").unwrap();
        let json1 = serde_json::to_string(&q1).unwrap();
        let q2: SearchQuery = serde_json::from_str(&json1).unwrap();
        assert_eq!(serde_json::to_string(&q2).unwrap(), json1);
    }

    #[test]
    fn split_handles_quoted_phrases() {
        assert_eq!(
            split_expr(r#"foo:"quoted string" bar"#),
            vec!["foo:quoted string".to_string(), "bar".to_string()]
        );
        assert_eq!(split_expr(" foo  bar "), vec!["foo", "bar"]);
        assert!(split_expr("").is_empty());
    }

    #[test]
    fn tokenize_matches_reference_shapes() {
        assert_eq!(tokenize_expr("foo bar"), vec!["foo", " ", "bar"]);
        assert_eq!(
            tokenize_expr(" -foo  bar"),
            vec![" ", "-", "foo", " ", "bar"]
        );
        assert_eq!(
            tokenize_expr(r#"foo:"quoted string" bar"#),
            vec!["foo:", r#""quoted string""#, " ", "bar"]
        );
        assert_eq!(
            tokenize_expr(r#"-"quote"foo"#),
            vec!["-", r#""quote""#, "foo"]
        );
    }
}

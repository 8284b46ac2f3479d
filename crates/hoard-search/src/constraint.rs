//! The query model: a tree of constraints over permanodes and files.
//!
//! Serialization is the wire format of the `camli/search/query` endpoint
//! and must stay stable; parsing an expression yields this tree.

use serde::{Deserialize, Serialize};

fn is_false(b: &bool) -> bool {
    !b
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// A search request: either an expression string or a constraint tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Constraint>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub limit: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical: Option<Box<LogicalConstraint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permanode: Option<PermanodeConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileConstraint>,
}

impl Constraint {
    pub fn permanode(pc: PermanodeConstraint) -> Self {
        Self {
            permanode: Some(pc),
            ..Default::default()
        }
    }

    pub fn file(fc: FileConstraint) -> Self {
        Self {
            file: Some(fc),
            ..Default::default()
        }
    }

    /// Everything the UI shows by default: permanodes not marked hidden.
    pub fn all_non_hidden() -> Self {
        Self::permanode(PermanodeConstraint {
            skip_hidden: true,
            ..Default::default()
        })
    }

    pub fn and(a: Constraint, b: Constraint) -> Self {
        Self {
            logical: Some(Box::new(LogicalConstraint {
                op: "and".into(),
                a: Box::new(a),
                b: Some(Box::new(b)),
            })),
            ..Default::default()
        }
    }

    pub fn or(a: Constraint, b: Constraint) -> Self {
        Self {
            logical: Some(Box::new(LogicalConstraint {
                op: "or".into(),
                a: Box::new(a),
                b: Some(Box::new(b)),
            })),
            ..Default::default()
        }
    }

    pub fn not(a: Constraint) -> Self {
        Self {
            logical: Some(Box::new(LogicalConstraint {
                op: "not".into(),
                a: Box::new(a),
                b: None,
            })),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalConstraint {
    /// "and", "or", or "not" (unary; `b` absent).
    pub op: String,
    pub a: Box<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<Box<Constraint>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermanodeConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
    /// Exact value match for `attr`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_matches: Option<StringConstraint>,
    /// Treat values of `attr` as blob refs; at least one must satisfy the
    /// nested constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_in_set: Option<Box<Constraint>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_hidden: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConstraint {
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<StringConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<IntConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<IntConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wh_ratio: Option<FloatConstraint>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub case_insensitive: bool,
}

impl StringConstraint {
    pub fn matches(&self, s: &str) -> bool {
        let (s_cmp, eq_cmp, contains_cmp);
        if self.case_insensitive {
            s_cmp = s.to_lowercase();
            eq_cmp = self.equals.as_ref().map(|e| e.to_lowercase());
            contains_cmp = self.contains.as_ref().map(|c| c.to_lowercase());
        } else {
            s_cmp = s.to_string();
            eq_cmp = self.equals.clone();
            contains_cmp = self.contains.clone();
        }
        if let Some(eq) = eq_cmp {
            if s_cmp != eq {
                return false;
            }
        }
        if let Some(sub) = contains_cmp {
            if !s_cmp.contains(&sub) {
                return false;
            }
        }
        true
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

impl IntConstraint {
    pub fn matches(&self, n: i64) -> bool {
        self.min.is_none_or(|m| n >= m) && self.max.is_none_or(|m| n <= m)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloatConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl FloatConstraint {
    pub fn matches(&self, f: f64) -> bool {
        self.min.is_none_or(|m| f >= m) && self.max.is_none_or(|m| f <= m)
    }
}

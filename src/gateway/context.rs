//! Per-request authorization context
//!
//! Built once from a verified token's claims and inserted into the request
//! extensions; handlers read it through `Extension<AuthorizationContext>`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Subject used when the token carries no usable name claim.
pub const UNKNOWN_SUBJECT: &str = "unknown";

/// One (type, value) pair from the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

/// Identity and claims of an authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationContext {
    subject: String,
    claims: Vec<Claim>,
}

impl AuthorizationContext {
    /// Flattens verified token claims.
    ///
    /// Array values become one pair per element, objects are rendered as
    /// compact JSON, and `null`s are dropped. The subject is the value of
    /// `name_claim`, or [`UNKNOWN_SUBJECT`].
    pub fn from_claims(claims: &Map<String, Value>, name_claim: &str) -> Self {
        let subject = claims
            .get(name_claim)
            .and_then(render_scalar)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN_SUBJECT.to_string());

        let mut flat = Vec::with_capacity(claims.len());
        for (claim_type, value) in claims {
            match value {
                Value::Array(items) => {
                    flat.extend(items.iter().filter_map(render_value).map(|value| Claim {
                        claim_type: claim_type.clone(),
                        value,
                    }))
                }
                other => {
                    if let Some(value) = render_value(other) {
                        flat.push(Claim {
                            claim_type: claim_type.clone(),
                            value,
                        });
                    }
                }
            }
        }

        Self {
            subject,
            claims: flat,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// First value of `claim_type`.
    pub fn claim(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    /// Whether any pair matches `claim_type` and `value`.
    pub fn has_claim(&self, claim_type: &str, value: &str) -> bool {
        self.claims
            .iter()
            .any(|c| c.claim_type == claim_type && c.value == value)
    }
}

fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
        scalar => render_scalar(scalar),
    }
}

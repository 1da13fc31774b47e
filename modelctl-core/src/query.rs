//! # Query Language
//!
//! Filters are written as comma separated clauses such as `name=mysite,id>=3,kind!=ext`.
//! Every clause names a field and compares it with a value; all clauses must hold (there is no
//! OR and no grouping).
//!
//! Parsing happens in two steps. [`parse_query_set`] splits the text into a map from field name
//! to the raw predicate text (`">=3"`). [`decode_operator`] later turns the raw text into an
//! [`Operator`], an invert flag and the value text, once the field is known to exist.
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Illegal operator/value string {0}")]
    IllegalQuery(String),
    #[error("Operator == is now illegal. Replace with =.")]
    DoubleEquals,
}

/// Comparison operators understood by the server's query message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl Operator {
    /// Name of the operator in the server's enum.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "EQUAL",
            Operator::GreaterThan => "GREATER_THAN",
            Operator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            Operator::LessThan => "LESS_THAN",
            Operator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A predicate before its value has been coerced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPredicate {
    pub value: String,
    pub operator: Operator,
    pub invert: bool,
}

/// A value already converted for the query message.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Sent as `iValue`.
    Integer(i64),
    /// Sent as `sValue`.
    Text(String),
}

/// One field level comparison, ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPredicate {
    pub name: String,
    pub operator: Operator,
    pub invert: bool,
    pub value: FilterValue,
}

// Two character operators are listed before their one character prefixes.
const OPERATORS: &[(&str, Operator, bool)] = &[
    ("!=", Operator::Equal, true),
    ("=", Operator::Equal, false),
    (">=", Operator::GreaterThanOrEqual, false),
    (">", Operator::GreaterThan, false),
    ("<=", Operator::LessThanOrEqual, false),
    ("<", Operator::LessThan, false),
];

/// Decodes the raw predicate text of a clause, e.g. `">= 3"`.
///
/// Text without a leading operator compares for equality.
pub fn decode_operator(raw: &str) -> Result<DecodedPredicate, QueryError> {
    if raw.starts_with("==") {
        return Err(QueryError::DoubleEquals);
    }

    for (symbol, operator, invert) in OPERATORS {
        if let Some(value) = raw.strip_prefix(symbol) {
            return Ok(DecodedPredicate {
                value: value.trim().to_string(),
                operator: *operator,
                invert: *invert,
            });
        }
    }

    // `!` only makes sense as part of `!=`.
    if raw.starts_with('!') {
        return Err(QueryError::IllegalQuery(raw.to_string()));
    }

    Ok(DecodedPredicate {
        value: raw.trim().to_string(),
        operator: Operator::Equal,
        invert: false,
    })
}

/// Splits clauses into a map from field name to raw predicate text.
///
/// Each clause must contain an operator. When `allow_inequality` is false only `=` is
/// recognized, which is what field assignments use. A field named twice keeps its last clause.
pub fn parse_clauses<'a>(
    clauses: impl IntoIterator<Item = &'a str>,
    allow_inequality: bool,
) -> Result<BTreeMap<String, String>, QueryError> {
    let mut queries = BTreeMap::new();

    for clause in clauses {
        let clause = clause.trim();

        let position = if allow_inequality {
            clause.find(['!', '=', '>', '<'])
        } else {
            clause.find('=')
        };

        let Some(position) = position else {
            return Err(QueryError::IllegalQuery(clause.to_string()));
        };

        queries.insert(
            clause[..position].trim().to_string(),
            clause[position..].to_string(),
        );
    }

    Ok(queries)
}

/// Parses a comma separated query. Empty text is an empty query.
pub fn parse_query_set(
    text: &str,
    allow_inequality: bool,
) -> Result<BTreeMap<String, String>, QueryError> {
    if text.is_empty() {
        return Ok(BTreeMap::new());
    }

    parse_clauses(text.split(','), allow_inequality)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_operator() {
        let cases = [
            ("=x", Operator::Equal, false),
            ("!=x", Operator::Equal, true),
            (">x", Operator::GreaterThan, false),
            (">=x", Operator::GreaterThanOrEqual, false),
            ("<x", Operator::LessThan, false),
            ("<=x", Operator::LessThanOrEqual, false),
        ];

        for (raw, operator, invert) in cases {
            let decoded = decode_operator(raw).unwrap();
            assert_eq!(decoded.value, "x", "value of {raw}");
            assert_eq!(decoded.operator, operator, "operator of {raw}");
            assert_eq!(decoded.invert, invert, "invert of {raw}");
        }
    }

    #[test]
    fn value_is_trimmed() {
        let decoded = decode_operator(">=  42 ").unwrap();
        assert_eq!(decoded.value, "42");
        assert_eq!(decoded.operator, Operator::GreaterThanOrEqual);
    }

    #[test]
    fn bare_value_means_equal() {
        let decoded = decode_operator(" mysite").unwrap();
        assert_eq!(decoded.value, "mysite");
        assert_eq!(decoded.operator, Operator::Equal);
    }

    #[test]
    fn double_equals_is_rejected() {
        assert_eq!(decode_operator("==x"), Err(QueryError::DoubleEquals));
        assert_eq!(decode_operator("=="), Err(QueryError::DoubleEquals));
    }

    #[test]
    fn lone_bang_is_illegal() {
        assert!(matches!(
            decode_operator("!x"),
            Err(QueryError::IllegalQuery(_))
        ));
    }

    #[test]
    fn query_set_keeps_operator_in_value() {
        let queries = parse_query_set("name=mysite, id>=3 ,kind!=ext", true).unwrap();

        assert_eq!(queries.len(), 3);
        assert_eq!(queries["name"], "=mysite");
        assert_eq!(queries["id"], ">=3");
        assert_eq!(queries["kind"], "!=ext");
    }

    #[test]
    fn query_set_last_clause_wins() {
        let queries = parse_query_set("id=1,id=2", true).unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries["id"], "=2");
    }

    #[test]
    fn query_set_without_inequality_only_splits_on_equals() {
        let queries = parse_query_set("description=a>b", false).unwrap();
        assert_eq!(queries["description"], "=a>b");

        assert!(matches!(
            parse_query_set("id>3", false),
            Err(QueryError::IllegalQuery(clause)) if clause == "id>3"
        ));
    }

    #[test]
    fn malformed_clause_fails() {
        assert!(parse_query_set("name=a,oops", true).is_err());
        assert!(parse_query_set("", true).unwrap().is_empty());
    }
}

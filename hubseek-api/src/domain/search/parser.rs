//! The structured-filter grammar layered over free-text queries.
//!
//! Operators like `label:"bug"` or `state:open` are extracted into filters;
//! what remains is the free text used for the query embedding.

use std::sync::LazyLock;

use regex::Regex;

use super::types::{ParsedQuery, StateFilter};

struct OperatorSpec {
    operator: &'static str,
    /// Quote-required operators only accept `op:"value"`; the rest also
    /// accept a bare token.
    enclosed_in_quotes: bool,
}

const SEARCH_OPERATORS: [OperatorSpec; 7] = [
    OperatorSpec {
        operator: "title",
        enclosed_in_quotes: true,
    },
    OperatorSpec {
        operator: "body",
        enclosed_in_quotes: true,
    },
    OperatorSpec {
        operator: "label",
        enclosed_in_quotes: true,
    },
    OperatorSpec {
        operator: "author",
        enclosed_in_quotes: false,
    },
    OperatorSpec {
        operator: "state",
        enclosed_in_quotes: false,
    },
    OperatorSpec {
        operator: "repo",
        enclosed_in_quotes: false,
    },
    OperatorSpec {
        operator: "org",
        enclosed_in_quotes: false,
    },
];

static OPERATOR_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    SEARCH_OPERATORS
        .iter()
        .map(|spec| {
            let pattern = if spec.enclosed_in_quotes {
                // With quotes only: title:"example"
                format!(r#"{}:"([^"]*)""#, spec.operator)
            } else {
                // Bare token, or quoted to allow values with spaces:
                // author:"john smith"
                format!(r#"{}:(?:"([^"]*)"|(\S*))"#, spec.operator)
            };
            Regex::new(&pattern).unwrap()
        })
        .collect()
});

static QUOTED_STRING_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]*)""#).unwrap());

/// Parse a query into structured filters and the remaining free text.
///
/// ```
/// use hubseek_api::domain::search::{parse_query, StateFilter};
///
/// let parsed = parse_query(r#"label:"bug" state:open panic on startup"#);
/// assert_eq!(parsed.label_queries, vec!["bug"]);
/// assert_eq!(parsed.state_queries, vec![StateFilter::Open]);
/// assert_eq!(parsed.remaining_query.as_deref(), Some("panic on startup"));
/// ```
pub fn parse_query(input_query: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();
    let mut remaining = input_query.to_string();

    for (spec, regex) in SEARCH_OPERATORS.iter().zip(OPERATOR_REGEXES.iter()) {
        let mut values: Vec<String> = Vec::new();
        for caps in regex.captures_iter(input_query) {
            let value = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            if !value.trim().is_empty() {
                values.push(value.to_string());
            }
        }
        if regex.is_match(&remaining) {
            remaining = regex.replace_all(&remaining, "").to_string();
        }
        if values.is_empty() {
            continue;
        }

        match spec.operator {
            "title" => parsed.title_queries = values,
            "body" => parsed.body_queries = values,
            "label" => parsed.label_queries = values,
            "author" => parsed.author_queries = values,
            "repo" => parsed.repo_queries = values,
            "org" => parsed.owner_queries = values,
            "state" => parsed.state_queries = normalize_states(&values),
            _ => unreachable!("unknown operator"),
        }
    }

    // Bare quoted strings in the residue are substring filters; they stay in
    // the free text so the embedding still sees them.
    parsed.substring_queries = QUOTED_STRING_REGEX
        .captures_iter(&remaining)
        .map(|caps| caps[1].to_string())
        .filter(|value| !value.trim().is_empty())
        .collect();

    let remaining = remaining.split_whitespace().collect::<Vec<_>>().join(" ");
    parsed.remaining_query = (!remaining.is_empty()).then_some(remaining);

    parsed
}

/// Case-insensitive, deduplicated; unknown values are dropped.
fn normalize_states(values: &[String]) -> Vec<StateFilter> {
    let mut states = Vec::new();
    for value in values {
        let state = match value.to_lowercase().as_str() {
            "open" => StateFilter::Open,
            "closed" => StateFilter::Closed,
            "all" => StateFilter::All,
            _ => continue,
        };
        if !states.contains(&state) {
            states.push(state);
        }
    }
    states
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_has_no_filters() {
        let parsed = parse_query("memory leak in websocket handler");
        assert_eq!(parsed, ParsedQuery {
            remaining_query: Some("memory leak in websocket handler".to_string()),
            ..Default::default()
        });
    }

    #[test]
    fn quoted_operators_extract_values() {
        let parsed = parse_query(r#"title:"connection refused" body:"stack trace" crash"#);
        assert_eq!(parsed.title_queries, vec!["connection refused"]);
        assert_eq!(parsed.body_queries, vec!["stack trace"]);
        assert_eq!(parsed.remaining_query.as_deref(), Some("crash"));
    }

    #[test]
    fn bare_operators_accept_unquoted_and_quoted_values() {
        let parsed = parse_query(r#"author:octocat repo:cargo org:rust-lang"#);
        assert_eq!(parsed.author_queries, vec!["octocat"]);
        assert_eq!(parsed.repo_queries, vec!["cargo"]);
        assert_eq!(parsed.owner_queries, vec!["rust-lang"]);

        let parsed = parse_query(r#"author:"john smith" flaky test"#);
        assert_eq!(parsed.author_queries, vec!["john smith"]);
        assert_eq!(parsed.remaining_query.as_deref(), Some("flaky test"));
    }

    #[test]
    fn state_values_are_normalized_and_deduplicated() {
        let parsed = parse_query("state:OPEN state:open state:bogus panic");
        assert_eq!(parsed.state_queries, vec![StateFilter::Open]);
        assert_eq!(parsed.remaining_query.as_deref(), Some("panic"));

        let parsed = parse_query("state:closed state:all");
        assert_eq!(
            parsed.state_queries,
            vec![StateFilter::Closed, StateFilter::All]
        );
    }

    #[test]
    fn bare_quoted_strings_become_substring_filters_but_stay_in_free_text() {
        let parsed = parse_query(r#"weird "exit code 137" in CI"#);
        assert_eq!(parsed.substring_queries, vec!["exit code 137"]);
        assert_eq!(
            parsed.remaining_query.as_deref(),
            Some(r#"weird "exit code 137" in CI"#)
        );
    }

    #[test]
    fn empty_operator_values_are_ignored() {
        let parsed = parse_query(r#"label:"" author: panic"#);
        assert!(parsed.label_queries.is_empty());
        assert!(parsed.author_queries.is_empty());
    }

    #[test]
    fn filter_only_query_has_no_remaining_text() {
        let parsed = parse_query("state:open repo:cargo");
        assert!(parsed.remaining_query.is_none());
    }

    #[test]
    fn multiple_values_for_one_operator() {
        let parsed = parse_query(r#"label:"bug" label:"regression""#);
        assert_eq!(parsed.label_queries, vec!["bug", "regression"]);
    }
}

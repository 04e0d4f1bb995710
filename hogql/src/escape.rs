//! Literal and identifier escaping.

/// Escapes a value for use inside a single-quoted HogQL string literal.
///
/// Every `'` is doubled. Backslashes are doubled as well since ClickHouse
/// reads `\` as an escape prefix inside literals, which would otherwise let
/// `\'` swallow the doubled quote.
pub fn escape_string_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '\'' => escaped.push_str("''"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch)
        }
    }
    escaped
}

/// Escapes the `LIKE` wildcards `%` and `_`, plus the `\` escape prefix, so
/// `value` matches only itself inside a `LIKE`/`ILIKE` pattern. The result
/// still goes through literal escaping when rendered.
pub fn escape_like_pattern(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Escapes `value` and wraps it in single quotes.
pub fn quote_string_literal(value: &str) -> String {
    format!("'{}'", escape_string_literal(value))
}

/// Renders a possibly dotted field path (`properties.$browser`) as a HogQL
/// identifier.
///
/// Plain segments are emitted unchanged; anything else is backtick-quoted so
/// a field name can never terminate the identifier and inject tokens.
pub fn escape_identifier(name: &str) -> String {
    name.split('.')
        .map(|segment| {
            if is_plain_identifier(segment) {
                segment.to_string()
            } else {
                quote_identifier(segment)
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn is_plain_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false
    }
}

fn quote_identifier(segment: &str) -> String {
    let mut quoted = String::with_capacity(segment.len() + 2);
    quoted.push('`');
    for ch in segment.chars() {
        match ch {
            '`' => quoted.push_str("\\`"),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(ch)
        }
    }
    quoted.push('`');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reverses the literal escaping the way ClickHouse reads it back.
    fn unescape(escaped: &str) -> String {
        let mut out = String::new();
        let mut chars = escaped.chars().peekable();
        while let Some(ch) = chars.next() {
            match (ch, chars.peek()) {
                ('\'', Some('\'')) | ('\\', Some('\\')) => {
                    out.push(ch);
                    chars.next();
                }
                _ => out.push(ch)
            }
        }
        out
    }

    const SAMPLES: &[&str] = &[
        "",
        "plain",
        "O'Brien",
        "''",
        "x' OR '1'='1",
        "trailing\\",
        "\\' OR 1=1 --",
        "unicode ünïcødé '引用'",
        "'; DROP TABLE events; --"
    ];

    #[test]
    fn test_quotes_are_doubled() {
        for sample in SAMPLES {
            let escaped = escape_string_literal(sample);
            assert_eq!(
                escaped.matches('\'').count(),
                2 * sample.matches('\'').count(),
                "quote count for {sample:?}"
            );
        }
    }

    #[test]
    fn test_round_trip_reconstructs_input() {
        for sample in SAMPLES {
            assert_eq!(unescape(&escape_string_literal(sample)), *sample);
        }
    }

    #[test]
    fn test_backslash_cannot_escape_closing_quote() {
        let quoted = quote_string_literal("\\");
        assert_eq!(quoted, "'\\\\'");
    }

    #[test]
    fn test_like_wildcards_are_escaped() {
        assert_eq!(escape_like_pattern("a_b"), "a\\_b");
        assert_eq!(escape_like_pattern("100%"), "100\\%");
        assert_eq!(escape_like_pattern("c:\\dir"), "c:\\\\dir");
        assert_eq!(escape_like_pattern("plain@example.com"), "plain@example.com");
        assert_eq!(
            quote_string_literal(&format!("%{}%", escape_like_pattern("a_b"))),
            "'%a\\\\_b%'"
        );
    }

    #[test]
    fn test_plain_identifiers_pass_through() {
        assert_eq!(escape_identifier("event"), "event");
        assert_eq!(
            escape_identifier("properties.$current_url"),
            "properties.$current_url"
        );
        assert_eq!(escape_identifier("person.properties.email"), "person.properties.email");
    }

    #[test]
    fn test_unusual_identifiers_are_quoted() {
        assert_eq!(escape_identifier("properties.plan type"), "properties.`plan type`");
        assert_eq!(escape_identifier("1st"), "`1st`");
        assert_eq!(
            escape_identifier("x` = 1 OR `y"),
            "`x\\` = 1 OR \\`y`"
        );
        assert_eq!(escape_identifier(""), "``");
    }
}

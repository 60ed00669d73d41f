/// Replace `${ENV_VAR}` and `${ENV_VAR:-default}` placeholders in raw config
/// text.
///
/// Unresolvable variables without a default are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// [`substitute_env`] with a custom lookup, so tests need not touch the
/// process environment.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next(); // consume '{'
        let mut body = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            body.push(c);
        }
        if !closed || body.is_empty() {
            // Malformed, emit literal.
            result.push_str("${");
            result.push_str(&body);
            if closed {
                result.push('}');
            }
            continue;
        }

        let (name, default) = match body.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (body.as_str(), None),
        };
        let value = match (lookup(name), default) {
            (Some(v), Some(d)) if v.is_empty() => Some(d.to_string()),
            (Some(v), _) => Some(v),
            (None, d) => d.map(str::to_string),
        };
        match value {
            Some(val) => result.push_str(&val),
            None => {
                result.push_str("${");
                result.push_str(&body);
                result.push('}');
            },
        }
    }

    result
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "BUILDCRON_TOKEN" => Some("hello".to_string()),
            "BUILDCRON_EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_env_with("token=${BUILDCRON_TOKEN}", lookup),
            "token=hello"
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env_with("${BUILDCRON_NONEXISTENT}", lookup),
            "${BUILDCRON_NONEXISTENT}"
        );
    }

    #[test]
    fn default_applies_when_unset_or_empty() {
        assert_eq!(
            substitute_env_with("${BUILDCRON_URL:-http://ci:8080}", lookup),
            "http://ci:8080"
        );
        assert_eq!(substitute_env_with("${BUILDCRON_EMPTY:-x}", lookup), "x");
        assert_eq!(substitute_env_with("${BUILDCRON_TOKEN:-x}", lookup), "hello");
        assert_eq!(substitute_env_with("${BUILDCRON_URL:-}", lookup), "");
    }

    #[test]
    fn malformed_is_literal() {
        assert_eq!(substitute_env_with("a ${unclosed", lookup), "a ${unclosed");
        assert_eq!(substitute_env_with("${}", lookup), "${}");
        assert_eq!(substitute_env_with("cost $5", lookup), "cost $5");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}

//! Pattern-matched hints for common script faults
//!
//! Purely a usability aid for learners: a hint is attached when an error message
//! looks familiar, and nothing depends on it being right.

use crate::types::RunResult;
use regex::Regex;
use std::sync::OnceLock;

struct Rule {
    pattern: Regex,
    hint: &'static str,
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (
                r"Maybe you meant '==' or ':=' instead of '='|cannot assign to .* here",
                "Use '==' to compare values; a single '=' assigns.",
            ),
            (
                r"expected ':'",
                "Statements such as if, for, while and def end with a colon.",
            ),
            (
                r"IndentationError|TabError",
                "Indent every line of a block by the same amount, using spaces.",
            ),
            (
                r"unterminated string literal|EOL while scanning string literal",
                "A string is missing its closing quote.",
            ),
            (
                r"ModuleNotFoundError|No module named",
                "The module is not available in the sandbox; check the spelling or the package list.",
            ),
            (
                r"NameError: name '\w+' is not defined",
                "A name is used before it is assigned; check the spelling and the order of your lines.",
            ),
            (
                r"ZeroDivisionError",
                "Division by zero; check the divisor before dividing.",
            ),
            (
                r#"can only concatenate str \(not "int"\) to str|unsupported operand type\(s\) for \+: 'int' and 'str'"#,
                "Convert numbers with str() before joining them to text.",
            ),
            (
                r"SyntaxError: invalid syntax",
                "Python could not parse this line; look for a missing bracket, quote or colon.",
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, hint)| {
            Regex::new(pattern).ok().map(|pattern| Rule { pattern, hint })
        })
        .collect()
    })
}

/// The first hint whose pattern matches `message`
pub fn hint_for(message: &str) -> Option<&'static str> {
    rules()
        .iter()
        .find(|rule| rule.pattern.is_match(message))
        .map(|rule| rule.hint)
}

/// Attach a hint to an error result that does not carry one yet
pub fn annotate(result: RunResult) -> RunResult {
    match result {
        RunResult::Error {
            message,
            hint: None,
        } => {
            let hint = hint_for(&message).map(str::to_string);
            RunResult::Error { message, hint }
        }
        other => other,
    }
}

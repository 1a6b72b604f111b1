use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%-?\s*macro\s+([A-Za-z_]\w*)\s*\(").expect("definition pattern")
});

/// `{{ name(` where `name` is the outermost expression of the output tag.
static OUTPUT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{-?\s*([A-Za-z_][\w.]*)\s*\(").expect("output call pattern")
});

/// `{% call name(` and `{% call(args) name(`.
static BLOCK_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%-?\s*call(?:\s*\([^)]*\))?\s+([A-Za-z_][\w.]*)\s*\(")
        .expect("block call pattern")
});

/// Result of scanning a template for macro usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroCalls {
    /// Every macro invoked.
    pub calls: BTreeSet<String>,
    /// Every macro defined.
    pub definitions: BTreeSet<String>,
    /// Invoked but not defined here, `calls - definitions`.
    pub externals: BTreeSet<String>,
}

/// Scans template source for macro invocations and definitions without
/// building a syntax tree. Runs on malformed source too.
///
/// ```
/// use macrojsp::analyze;
///
/// let calls = analyze("{% macro a() %}{{ b() }}{% endmacro %}{{ a() }}");
/// assert!(calls.externals.contains("b"));
/// assert!(!calls.externals.contains("a"));
/// ```
pub fn analyze(source: &str) -> MacroCalls {
    let capture = |re: &Regex| -> BTreeSet<String> {
        re.captures_iter(source)
            .filter_map(|c| c.get(1).map(|name| name.as_str().to_string()))
            .filter(|name| name != "caller")
            .collect()
    };

    let definitions = capture(&DEFINITION);
    let mut calls = capture(&OUTPUT_CALL);
    calls.extend(capture(&BLOCK_CALL));
    let externals = calls.difference(&definitions).cloned().collect();

    MacroCalls {
        calls,
        definitions,
        externals,
    }
}

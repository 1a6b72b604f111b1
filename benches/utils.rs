use std::sync::Arc;

use macrojsp::{EntityRef, MemoryContentModel};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::Map;

pub const SITE: &str = "bench";

/// Generate n random pattern macros. Macro `i` calls macro `i - 1` so that
/// inlining has external work to do.
pub fn generate_random_macros(n: usize) -> Vec<(String, String)> {
    let mut rng = StdRng::seed_from_u64(42); // Fixed seed for reproducibility
    let mut macros = Vec::with_capacity(n);

    for i in 0..n {
        let name = format!("{}{}", random_string(&mut rng, 4, 8), i);
        let field = random_string(&mut rng, 3, 8);
        let mut body = format!(
            "<div class=\"{}\">{{% if {} %}}<h2>{{{{ {} | upper }}}}</h2>{{% endif %}}",
            name, field, field
        );
        body.push_str("{% set classes = 'item' %}");
        if rng.random_bool(0.5) {
            body.push_str("{% set classes = classes ~ ' item--active' %}");
        }
        body.push_str(
            "<ul>{% for entry in entries %}<li class=\"{{ classes }}\">{{ loop.index }} {{ entry.label }}</li>{% endfor %}</ul>",
        );
        if let Some((previous, _)) = macros.last() {
            body.push_str(&format!("{{{{ {}({}=this.{}) }}}}", previous, "entries", field));
        }
        body.push_str("</div>");

        let source = format!(
            "{{% macro {}({}, entries=[]) %}}{}{{% endmacro %}}",
            name, field, body
        );
        macros.push((name, source));
    }

    macros
}

pub fn content_model(macros: &[(String, String)]) -> Arc<MemoryContentModel> {
    let content = MemoryContentModel::new();
    for (name, source) in macros {
        content
            .add_entity(
                SITE,
                EntityRef::new(name, "pattern", "patterns", name),
                name,
                source,
                Map::new(),
            )
            .unwrap();
    }
    Arc::new(content)
}

/// Generate a random string with length between min and max
fn random_string(rng: &mut StdRng, min_len: usize, max_len: usize) -> String {
    let charset = "abcdefghijklmnopqrstuvwxyz";
    let len = rng.random_range(min_len..=max_len);

    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..charset.len());
            charset.chars().nth(idx).unwrap()
        })
        .collect()
}

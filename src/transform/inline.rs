use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Fold, NodeTransformer, RootRenamer, Scope, walk};
use crate::{Node, TranspileError, TranspileResult};

/// Replaces macro calls with the body of the macro.
///
/// Each call becomes a `NodeList` that first binds every parameter to
/// `<macro>_<param>` (from the argument, the declared default, or none) and
/// then holds the macro body with parameter references and names the body
/// binds itself renamed, and `caller()` replaced by the call block's content. Macros come from the tree
/// itself and, when `external` is set, from the content model. Recursive
/// macros stay calls.
#[derive(Debug, Clone, Copy)]
pub struct InlineTransformer {
    external: bool,
}

impl InlineTransformer {
    pub fn new() -> Self {
        Self { external: true }
    }

    /// Only inline macros defined in the tree being transformed.
    pub fn local_only() -> Self {
        Self { external: false }
    }
}

impl Default for InlineTransformer {
    fn default() -> Self {
        Self::new()
    }
}

/// Calls emitted by other passes rather than written by template authors.
const SYNTHETIC_CALLS: &[&str] = &["loadModel"];

fn called_macros(node: &Node, into: &mut BTreeSet<String>) {
    node.visit(&mut |node| {
        if let Node::Call { name, .. } = node {
            if !SYNTHETIC_CALLS.contains(&name.as_str()) {
                into.insert(name.clone());
            }
        }
    });
}

/// Names a macro body assigns or loops over.
fn bound_names(body: &[Node], into: &mut BTreeSet<String>) {
    for statement in body {
        statement.visit(&mut |node| match node {
            Node::Set { variable, .. } => {
                if let Some(root) = variable.root_name() {
                    into.insert(root.to_string());
                }
            }
            Node::For {
                key_name,
                value_name,
                ..
            } => {
                into.extend(key_name.iter().cloned());
                into.insert(value_name.clone());
            }
            _ => {}
        });
    }
}

fn defined_macros(node: &Node, into: &mut HashMap<String, Node>) {
    node.visit(&mut |node| {
        if let Node::Macro { name, .. } = node {
            into.entry(name.clone()).or_insert_with(|| node.clone());
        }
    });
}

/// The variable a parameter is bound to once inlined.
fn binding_name(macro_name: &str, parameter: &str) -> String {
    format!("{}_{}", macro_name.replace('.', "_"), parameter)
}

struct Inliner<'a> {
    library: &'a HashMap<String, Node>,
    /// Macros currently being expanded, outermost first.
    stack: Vec<String>,
}

/// Renames the macro's own names and fills `caller()` slots in its body.
struct Substitute<'a> {
    macro_name: &'a str,
    /// Parameters and names bound inside the body.
    locals: &'a BTreeSet<String>,
    caller_body: &'a [Node],
}

impl Substitute<'_> {
    fn rename(&self, name: &str) -> Option<String> {
        self.locals
            .contains(name)
            .then(|| binding_name(self.macro_name, name))
    }
}

impl Fold for Substitute<'_> {
    fn fold(&mut self, node: &Node) -> TranspileResult<Node> {
        match node {
            Node::Variable { .. } => RootRenamer {
                rename: |root: &str| self.rename(root),
            }
            .fold(node),
            Node::For {
                key_name,
                value_name,
                value,
                children,
            } => Ok(Node::For {
                key_name: key_name
                    .as_ref()
                    .map(|k| self.rename(k).unwrap_or_else(|| k.clone())),
                value_name: self
                    .rename(value_name)
                    .unwrap_or_else(|| value_name.clone()),
                value: Box::new(self.fold(value)?),
                children: self.fold_body(children)?,
            }),
            Node::Yield => Ok(Node::list(self.caller_body.to_vec())),
            other => walk(self, other),
        }
    }
}

impl Inliner<'_> {
    fn expand(&mut self, node: &Node) -> TranspileResult<Option<Node>> {
        let Node::Call {
            name,
            parameters: arguments,
            children,
        } = node
        else {
            return Ok(None);
        };
        let library = self.library;
        if self.stack.contains(name) {
            debug!(name = name.as_str(), "Recursive macro left as a call");
            return Ok(None);
        }
        let Some(Node::Macro {
            parameters: declared,
            children: body,
            ..
        }) = library.get(name)
        else {
            return Ok(None);
        };

        let declared = declared.parameter_list();
        let positional: Vec<&Node> = arguments
            .parameter_list()
            .iter()
            .filter(|p| matches!(p, Node::Parameter { name: None, .. }))
            .collect();
        if positional.len() > declared.len() {
            return Err(TranspileError::pass(
                "inline",
                node,
                format!(
                    "{} positional arguments given, '{}' declares {}",
                    positional.len(),
                    name,
                    declared.len()
                ),
            ));
        }

        let mut locals: BTreeSet<String> = declared
            .iter()
            .filter_map(|p| match p {
                Node::Parameter { name: Some(n), .. } => Some(n.clone()),
                _ => None,
            })
            .collect();
        bound_names(body, &mut locals);
        let caller_body = self.fold_body(children)?;
        let mut substitute = Substitute {
            macro_name: name,
            locals: &locals,
            caller_body: &caller_body,
        };

        let mut statements = Vec::with_capacity(declared.len() + body.len());
        for (index, parameter) in declared.iter().enumerate() {
            let Node::Parameter {
                name: Some(parameter),
                value: default,
            } = parameter
            else {
                continue;
            };
            let argument = arguments
                .parameter_named(parameter)
                .or_else(|| positional.get(index).copied());
            let value = match (argument, default) {
                (Some(Node::Parameter { value: Some(v), .. }), _) => self.fold(v)?,
                (_, Some(default)) => substitute.fold(default)?,
                _ => Node::null(),
            };
            statements.push(Node::set(
                Node::variable([binding_name(name, parameter)]),
                value,
            ));
        }

        let substituted = substitute.fold_body(body)?;
        self.stack.push(name.clone());
        let expanded = self.fold_body(&substituted);
        self.stack.pop();
        statements.extend(expanded?);

        Ok(Some(Node::list(statements)))
    }
}

impl Fold for Inliner<'_> {
    fn fold(&mut self, node: &Node) -> TranspileResult<Node> {
        match node {
            Node::Macro { name, .. } => {
                self.stack.push(name.clone());
                let folded = walk(self, node);
                self.stack.pop();
                folded
            }
            other => walk(self, other),
        }
    }

    fn fold_body(&mut self, nodes: &[Node]) -> TranspileResult<Vec<Node>> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            let statement = match node {
                Node::Output { children } => match children.as_slice() {
                    [only] => only,
                    _ => node,
                },
                other => other,
            };
            match self.expand(statement)? {
                Some(list) => out.push(list),
                None => out.push(self.fold(node)?),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl NodeTransformer for InlineTransformer {
    fn name(&self) -> &'static str {
        "inline"
    }

    async fn transform(&self, node: &Node, scope: Option<&Scope<'_>>) -> TranspileResult<Node> {
        let mut library = HashMap::new();
        defined_macros(node, &mut library);

        if let (true, Some(scope)) = (self.external, scope) {
            let mut wanted = BTreeSet::new();
            called_macros(node, &mut wanted);
            let mut tried = BTreeSet::new();

            while let Some(name) = wanted.pop_first() {
                if library.contains_key(&name) || !tried.insert(name.clone()) {
                    continue;
                }
                match scope.transpiler.parse_macro(scope.site, &name).await {
                    Ok(definition) => {
                        called_macros(&definition, &mut wanted);
                        library.insert(name, definition);
                    }
                    Err(e) => {
                        warn!(name = name.as_str(), site = scope.site, error = %e, "Macro left as a call");
                    }
                }
            }
        }

        Inliner {
            library: &library,
            stack: Vec::new(),
        }
        .fold(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    async fn run(source: &str) -> TranspileResult<Node> {
        InlineTransformer::local_only()
            .transform(&parse(source).unwrap(), None)
            .await
    }

    #[tokio::test]
    async fn test_inlines_local_macro_with_defaults() {
        let output = run(
            "{% macro badge(label, tone='info') %}<b class=\"{{ tone }}\">{{ label }}</b>{% endmacro %}\
             {{ badge('New') }}",
        )
        .await
        .unwrap();

        let Node::NodeList { children } = output else {
            panic!("Expected a NodeList");
        };
        assert_eq!(
            children[1],
            Node::list(vec![
                Node::set(Node::path("badge_label"), Node::string("New")),
                Node::set(Node::path("badge_tone"), Node::string("info")),
                Node::text("<b class=\""),
                Node::output(Node::path("badge_tone")),
                Node::text("\">"),
                Node::output(Node::path("badge_label")),
                Node::text("</b>"),
            ])
        );
    }

    #[tokio::test]
    async fn test_named_arguments_and_missing_values() {
        let output = run(
            "{% macro m(a, b) %}{{ b }}{% endmacro %}{{ m(b=x.y) }}",
        )
        .await
        .unwrap();
        assert_eq!(
            output.children()[1],
            Node::list(vec![
                Node::set(Node::path("m_a"), Node::null()),
                Node::set(Node::path("m_b"), Node::path("x.y")),
                Node::output(Node::path("m_b")),
            ])
        );
    }

    #[tokio::test]
    async fn test_caller_body_is_injected() {
        let output = run(
            "{% macro panel() %}<div>{{ caller() }}</div>{% endmacro %}\
             {% call panel() %}<p>{{ text }}</p>{% endcall %}",
        )
        .await
        .unwrap();
        assert_eq!(
            output.children()[1],
            Node::list(vec![
                Node::text("<div>"),
                Node::list(vec![
                    Node::text("<p>"),
                    Node::output(Node::path("text")),
                    Node::text("</p>"),
                ]),
                Node::text("</div>"),
            ])
        );
    }

    #[tokio::test]
    async fn test_nested_macros_expand() {
        let output = run(
            "{% macro icon(n) %}<i>{{ n }}</i>{% endmacro %}\
             {% macro button(n) %}{{ icon(n) }}{% endmacro %}\
             {{ button('x') }}",
        )
        .await
        .unwrap();
        assert_eq!(
            output.children()[2],
            Node::list(vec![
                Node::set(Node::path("button_n"), Node::string("x")),
                Node::list(vec![
                    Node::set(Node::path("icon_n"), Node::path("button_n")),
                    Node::text("<i>"),
                    Node::output(Node::path("icon_n")),
                    Node::text("</i>"),
                ]),
            ])
        );
    }

    #[tokio::test]
    async fn test_recursion_terminates() {
        let output = run("{% macro tree(node) %}{{ tree(node.child) }}{% endmacro %}")
            .await
            .unwrap();
        assert_eq!(
            output,
            Node::macro_def(
                "tree",
                vec![Node::parameter(Some("node"), None)],
                vec![Node::output(Node::call(
                    "tree",
                    vec![Node::positional(Node::path("node.child"))],
                    vec![],
                ))],
            )
        );
    }

    #[tokio::test]
    async fn test_mutual_recursion_terminates() {
        let output = run(
            "{% macro a() %}{{ b() }}{% endmacro %}{% macro b() %}{{ a() }}{% endmacro %}{{ a() }}",
        )
        .await
        .unwrap();
        // a -> b -> a: the innermost call to a stays a call.
        assert_eq!(
            output.children()[2],
            Node::list(vec![Node::list(vec![Node::output(Node::call("a", vec![], vec![]))])])
        );
    }

    #[tokio::test]
    async fn test_too_many_positional_arguments() {
        let err = run("{% macro m(a) %}{% endmacro %}{{ m(1, 2) }}")
            .await
            .unwrap_err();
        assert!(matches!(err, TranspileError::Pass { pass: "inline", .. }));
    }

    #[tokio::test]
    async fn test_macro_locals_do_not_leak_into_the_caller() {
        let output = run(
            "{% macro badge(t) %}{% set label = t ~ '!' %}{% for i in [1] %}{{ i }}{% endfor %}<b>{{ label }}</b>{% endmacro %}\
             {% set label = 'outer' %}{{ badge('x') }}{{ label }}",
        )
        .await
        .unwrap();
        assert_eq!(
            output.children()[1..],
            [
                Node::set(Node::path("label"), Node::string("outer")),
                Node::list(vec![
                    Node::set(Node::path("badge_t"), Node::string("x")),
                    Node::set(
                        Node::path("badge_label"),
                        Node::expression(vec![
                            Node::path("badge_t"),
                            Node::operand("~"),
                            Node::string("!"),
                        ]),
                    ),
                    Node::for_each(
                        None,
                        "badge_i",
                        Node::array(vec![Node::number(1)]),
                        vec![Node::output(Node::path("badge_i"))],
                    ),
                    Node::text("<b>"),
                    Node::output(Node::path("badge_label")),
                    Node::text("</b>"),
                ]),
                Node::output(Node::path("label")),
            ]
        );
    }

    #[test]
    fn test_synthetic_calls_are_not_resolved() {
        let mut wanted = BTreeSet::new();
        called_macros(
            &parse("{{ loadModel(var='v', data=1) }}{{ nav() }}").unwrap(),
            &mut wanted,
        );
        assert_eq!(wanted, BTreeSet::from(["nav".to_string()]));
    }

    #[tokio::test]
    async fn test_unknown_macros_stay_calls() {
        let source = "{{ external(1) }}";
        assert_eq!(run(source).await.unwrap(), parse(source).unwrap());
    }
}

//! AST rewriting passes.
//!
//! Every pass reads a tree and builds a new one; inputs are never mutated.
//! Synchronous rewrites implement [`Fold`], passes that need the content
//! model fetch what they need first and then fold.

use async_trait::async_trait;

use crate::{Node, TranspileResult, Transpiler};

mod concat;
mod decorate;
mod empty;
mod inline;
mod loop_status;
mod self_ref;
mod static_model;

pub use concat::ConcatTransformer;
pub use decorate::VariableTransformer;
pub use empty::EmptyTransformer;
pub use inline::InlineTransformer;
pub use loop_status::LoopTransformer;
pub use self_ref::SelfTransformer;
pub use static_model::StaticModelTransformer;

/// What a pass may consult while it runs.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub transpiler: &'a Transpiler,
    pub site: &'a str,
}

/// One step of the pipeline.
#[async_trait]
pub trait NodeTransformer: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &'static str;

    /// Produces a rewritten copy of `node`. Passes that need lookups leave
    /// the tree unchanged when no `scope` is given.
    async fn transform(&self, node: &Node, scope: Option<&Scope<'_>>) -> TranspileResult<Node>;
}

/// A fallible tree-to-tree visitor. Override the methods for the shapes a
/// pass cares about and call [`walk`] to rebuild everything else.
pub trait Fold {
    fn fold(&mut self, node: &Node) -> TranspileResult<Node> {
        walk(self, node)
    }

    /// Sequences inside expressions: operand chains, argument lists, arrays.
    fn fold_all(&mut self, nodes: &[Node]) -> TranspileResult<Vec<Node>> {
        nodes.iter().map(|node| self.fold(node)).collect()
    }

    /// Statement bodies: macro, call, if, for and list children. A pass can
    /// turn one statement into several here.
    fn fold_body(&mut self, nodes: &[Node]) -> TranspileResult<Vec<Node>> {
        self.fold_all(nodes)
    }
}

/// Rebuilds `node`, folding each of its children.
pub fn walk<F: Fold + ?Sized>(folder: &mut F, node: &Node) -> TranspileResult<Node> {
    let boxed = |folder: &mut F, node: &Node| folder.fold(node).map(Box::new);

    Ok(match node {
        Node::Value { .. }
        | Node::Literal { .. }
        | Node::Text { .. }
        | Node::Variable { .. }
        | Node::Operand { .. }
        | Node::BooleanOperand { .. }
        | Node::Yield => node.clone(),
        Node::Parameter { name, value } => Node::Parameter {
            name: name.clone(),
            value: match value {
                Some(value) => Some(boxed(folder, value)?),
                None => None,
            },
        },
        Node::Parameters { children } => Node::Parameters {
            children: folder.fold_all(children)?,
        },
        Node::Array { children } => Node::Array {
            children: folder.fold_all(children)?,
        },
        Node::Call {
            name,
            parameters,
            children,
        } => Node::Call {
            name: name.clone(),
            parameters: boxed(folder, parameters)?,
            children: folder.fold_body(children)?,
        },
        Node::Macro {
            name,
            parameters,
            children,
            doc,
        } => Node::Macro {
            name: name.clone(),
            parameters: boxed(folder, parameters)?,
            children: folder.fold_body(children)?,
            doc: doc.clone(),
        },
        Node::Set {
            variable,
            value,
            operator,
        } => Node::Set {
            variable: boxed(folder, variable)?,
            value: boxed(folder, value)?,
            operator: *operator,
        },
        Node::If {
            condition,
            children,
            else_children,
        } => Node::If {
            condition: boxed(folder, condition)?,
            children: folder.fold_body(children)?,
            else_children: folder.fold_body(else_children)?,
        },
        Node::For {
            key_name,
            value_name,
            value,
            children,
        } => Node::For {
            key_name: key_name.clone(),
            value_name: value_name.clone(),
            value: boxed(folder, value)?,
            children: folder.fold_body(children)?,
        },
        Node::Condition { children } => Node::Condition {
            children: folder.fold_all(children)?,
        },
        Node::Expression { children } => Node::Expression {
            children: folder.fold_all(children)?,
        },
        Node::Group { children } => Node::Group {
            children: folder.fold_all(children)?,
        },
        Node::Filter {
            name,
            value,
            parameters,
        } => Node::Filter {
            name: name.clone(),
            value: boxed(folder, value)?,
            parameters: boxed(folder, parameters)?,
        },
        Node::Output { children } => Node::Output {
            children: folder.fold_all(children)?,
        },
        Node::NodeList { children } => Node::NodeList {
            children: folder.fold_body(children)?,
        },
    })
}

/// The identity pass: a structural copy of its input.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloneTransformer;

struct Identity;

impl Fold for Identity {}

#[async_trait]
impl NodeTransformer for CloneTransformer {
    fn name(&self) -> &'static str {
        "clone"
    }

    async fn transform(&self, node: &Node, _scope: Option<&Scope<'_>>) -> TranspileResult<Node> {
        Identity.fold(node)
    }
}

/// Renames the first segment of every variable for which `rename` returns a
/// new name. Shared by the renaming passes.
pub(crate) struct RootRenamer<R: FnMut(&str) -> Option<String>> {
    pub(crate) rename: R,
}

impl<R: FnMut(&str) -> Option<String>> Fold for RootRenamer<R> {
    fn fold(&mut self, node: &Node) -> TranspileResult<Node> {
        match node {
            Node::Variable { fields } => {
                let mut fields = fields.clone();
                if let Some(root) = fields.first_mut() {
                    if let Some(renamed) = (self.rename)(root) {
                        *root = renamed;
                    }
                }
                Ok(Node::Variable { fields })
            }
            other => walk(self, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn sample() -> Node {
        parse(
            "{% macro card(title, items=[1, 2]) %}{% if title != '' %}<h2>{{ title | upper }}</h2>{% endif %}\
             {% for k, v in items %}{% set label = k ~ v %}{{ label }}{% endfor %}{% endmacro %}",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_clone_transformer_is_structural_identity() {
        let input = sample();
        let output = CloneTransformer.transform(&input, None).await.unwrap();
        assert_eq!(output, input);
        assert_eq!(output.to_value(), input.to_value());
    }

    #[test]
    fn test_walk_reaches_every_variable() {
        let mut renamer = RootRenamer {
            rename: |root: &str| Some(root.to_uppercase()),
        };
        let output = renamer.fold(&sample()).unwrap();

        let mut roots = Vec::new();
        output.visit(&mut |node| roots.extend(node.root_name().map(str::to_string)));
        assert_eq!(roots, vec!["TITLE", "TITLE", "ITEMS", "LABEL", "K", "V", "LABEL"]);
    }

    #[test]
    fn test_fold_body_can_expand_statements() {
        struct Doubler;
        impl Fold for Doubler {
            fn fold_body(&mut self, nodes: &[Node]) -> TranspileResult<Vec<Node>> {
                let mut out = Vec::new();
                for node in nodes {
                    let folded = self.fold(node)?;
                    out.push(folded.clone());
                    out.push(folded);
                }
                Ok(out)
            }
        }

        let output = Doubler.fold(&Node::list(vec![Node::text("a")])).unwrap();
        assert_eq!(output, Node::list(vec![Node::text("a"), Node::text("a")]));
    }
}

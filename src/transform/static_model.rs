use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{Fold, NodeTransformer, Scope, walk};
use crate::{Node, TranspileResult};

/// Resolves view-model paths passed to macros at compile time.
///
/// A call argument named `model`, `*Model` or `*_model` whose value is a
/// string literal is looked up through the content model. The data is bound
/// by a `loadModel(var=..., data=...)` call placed before the statement
/// holding the call, and the argument becomes a reference to that variable.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticModelTransformer;

fn is_model_parameter(name: &str) -> bool {
    name == "model" || name.ends_with("Model") || name.ends_with("_model")
}

/// `(parameter name, path)` of every static model argument of a call.
fn model_arguments(call: &Node) -> Vec<(&str, &str)> {
    call.parameter_list()
        .iter()
        .filter_map(|parameter| match parameter {
            Node::Parameter {
                name: Some(name),
                value: Some(value),
            } if is_model_parameter(name) => match value.as_ref() {
                Node::Literal {
                    value: Value::String(path),
                    ..
                } => Some((name.as_str(), path.as_str())),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

/// Kept apart from the `<macro>_<param>` names inlining binds.
fn model_variable(call: &str, parameter: &str) -> String {
    format!("{}_{}_data", call.replace('.', "_"), parameter)
}

struct LoadModels<'a> {
    models: &'a HashMap<String, Value>,
    /// Loads for the statement being folded.
    pending: Vec<Node>,
}

impl Fold for LoadModels<'_> {
    fn fold(&mut self, node: &Node) -> TranspileResult<Node> {
        let Node::Call { name, .. } = node else {
            return walk(self, node);
        };
        let arguments = model_arguments(node);
        let folded = walk(self, node)?;
        if arguments.is_empty() {
            return Ok(folded);
        }

        let Node::Call {
            parameters,
            children,
            ..
        } = &folded
        else {
            return Ok(folded);
        };
        let mut parameters = parameters.parameter_list().to_vec();
        for (parameter, path) in arguments {
            let Some(data) = self.models.get(path) else {
                continue;
            };
            let var = model_variable(name, parameter);
            self.pending.push(Node::call(
                "loadModel",
                vec![
                    Node::named("var", Node::string(var.as_str())),
                    Node::named("data", Node::value(data.clone())),
                ],
                vec![],
            ));
            for argument in &mut parameters {
                if matches!(argument, Node::Parameter { name: Some(n), .. } if n == parameter) {
                    *argument = Node::named(parameter, Node::variable([var.as_str()]));
                }
            }
        }
        Ok(Node::call(name.as_str(), parameters, children.clone()))
    }

    fn fold_body(&mut self, nodes: &[Node]) -> TranspileResult<Vec<Node>> {
        let outer = std::mem::take(&mut self.pending);
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            let folded = self.fold(node)?;
            out.append(&mut self.pending);
            out.push(folded);
        }
        self.pending = outer;
        Ok(out)
    }
}

#[async_trait]
impl NodeTransformer for StaticModelTransformer {
    fn name(&self) -> &'static str {
        "static-model"
    }

    async fn transform(&self, node: &Node, scope: Option<&Scope<'_>>) -> TranspileResult<Node> {
        let mut paths = Vec::new();
        node.visit(&mut |node| {
            if matches!(node, Node::Call { .. }) {
                paths.extend(model_arguments(node).into_iter().map(|(_, path)| path.to_string()));
            }
        });

        let mut models = HashMap::new();
        if let Some(scope) = scope {
            for path in paths {
                if models.contains_key(&path) {
                    continue;
                }
                let data = scope.transpiler.view_model(&path).await?;
                debug!(path = path.as_str(), "Loaded static view model");
                models.insert(path, data);
            }
        }

        let mut folder = LoadModels {
            models: &models,
            pending: Vec::new(),
        };
        let folded = folder.fold(node)?;
        if folder.pending.is_empty() {
            return Ok(folded);
        }
        // A call at the root has no enclosing body to receive its loads.
        let mut statements = std::mem::take(&mut folder.pending);
        statements.push(folded);
        Ok(Node::list(statements))
    }
}

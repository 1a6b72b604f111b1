use std::fmt;

use async_trait::async_trait;

use super::{Fold, NodeTransformer, RootRenamer, Scope, walk};
use crate::{Node, TranspileResult};

type NameFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Adds a prefix and suffix to variable names, `title` to `pre_title_suf`.
///
/// Only the first path segment is renamed, along with loop bindings. The
/// filter picks which names are decorated.
pub struct VariableTransformer {
    prefix: String,
    suffix: String,
    filter: NameFilter,
}

impl VariableTransformer {
    pub fn new<F>(prefix: &str, suffix: &str, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            filter: Box::new(filter),
        }
    }

    /// Decorates every name except those listed.
    pub fn excluding(prefix: &str, suffix: &str, exclude: Vec<String>) -> Self {
        Self::new(prefix, suffix, move |name| !exclude.iter().any(|e| e == name))
    }

    fn decorate(&self, name: &str) -> Option<String> {
        (self.filter)(name).then(|| format!("{}{}{}", self.prefix, name, self.suffix))
    }
}

impl fmt::Debug for VariableTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableTransformer")
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}

struct Decorate<'a>(&'a VariableTransformer);

impl Fold for Decorate<'_> {
    fn fold(&mut self, node: &Node) -> TranspileResult<Node> {
        let pass = self.0;
        match node {
            Node::Variable { .. } => RootRenamer {
                rename: |root: &str| pass.decorate(root),
            }
            .fold(node),
            Node::For {
                key_name,
                value_name,
                value,
                children,
            } => {
                let rename = |name: &String| pass.decorate(name).unwrap_or_else(|| name.clone());
                Ok(Node::For {
                    key_name: key_name.as_ref().map(rename),
                    value_name: rename(value_name),
                    value: Box::new(self.fold(value)?),
                    children: self.fold_body(children)?,
                })
            }
            other => walk(self, other),
        }
    }
}

#[async_trait]
impl NodeTransformer for VariableTransformer {
    fn name(&self) -> &'static str {
        "decorate"
    }

    async fn transform(&self, node: &Node, _scope: Option<&Scope<'_>>) -> TranspileResult<Node> {
        Decorate(self).fold(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn pass() -> VariableTransformer {
        VariableTransformer::new("pre_", "_suf", |name| name != "keep")
    }

    #[tokio::test]
    async fn test_filtered_names_are_left_alone() {
        let output = pass()
            .transform(&parse("{{ keep.x }}{{ other.y }}").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(
            output,
            Node::list(vec![
                Node::output(Node::path("keep.x")),
                Node::output(Node::path("pre_other_suf.y")),
            ])
        );
    }

    #[tokio::test]
    async fn test_loop_bindings_are_decorated() {
        let output = pass()
            .transform(
                &parse("{% for k, v in keep %}{{ v }}{% endfor %}").unwrap(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            output,
            Node::list(vec![Node::for_each(
                Some("pre_k_suf"),
                "pre_v_suf",
                Node::path("keep"),
                vec![Node::output(Node::path("pre_v_suf"))],
            )])
        );
    }

    #[tokio::test]
    async fn test_excluding() {
        let pass = VariableTransformer::excluding("_", "", vec!["loop".to_string()]);
        let output = pass
            .transform(&parse("{{ loop.index }}{{ item }}").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(
            output,
            Node::list(vec![
                Node::output(Node::path("loop.index")),
                Node::output(Node::path("_item")),
            ])
        );
    }
}

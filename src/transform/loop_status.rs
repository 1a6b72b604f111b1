use async_trait::async_trait;

use super::{Fold, NodeTransformer, Scope, walk};
use crate::{Node, TranspileResult};

/// Maps the template loop variable onto the JSTL `varStatus` bean.
///
/// `loop.first` and `loop.last` carry over unchanged, but the 1-based
/// `loop.index` is `count` in JSTL and the 0-based `loop.index0` is `index`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopTransformer;

#[derive(Default)]
struct LoopStatus {
    depth: usize,
}

impl Fold for LoopStatus {
    fn fold(&mut self, node: &Node) -> TranspileResult<Node> {
        match node {
            Node::For { .. } => {
                self.depth = self.depth.saturating_add(1);
                let folded = walk(self, node);
                self.depth = self.depth.saturating_sub(1);
                folded
            }
            Node::Variable { fields } if self.depth > 0 => match fields.as_slice() {
                [root, status, rest @ ..] if root == "loop" => {
                    let renamed = match status.as_str() {
                        "index" => "count",
                        "index0" => "index",
                        other => other,
                    };
                    let mut fields = vec![root.clone(), renamed.to_string()];
                    fields.extend(rest.iter().cloned());
                    Ok(Node::Variable { fields })
                }
                _ => Ok(node.clone()),
            },
            other => walk(self, other),
        }
    }
}

#[async_trait]
impl NodeTransformer for LoopTransformer {
    fn name(&self) -> &'static str {
        "loop"
    }

    async fn transform(&self, node: &Node, _scope: Option<&Scope<'_>>) -> TranspileResult<Node> {
        LoopStatus::default().fold(node)
    }
}

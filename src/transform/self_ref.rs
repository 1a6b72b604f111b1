use async_trait::async_trait;

use super::{Fold, NodeTransformer, RootRenamer, Scope};
use crate::{Node, TranspileResult};

/// Renames the self-reference variable, `this.x` to `self.x` by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfTransformer {
    from: String,
    to: String,
}

impl SelfTransformer {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl Default for SelfTransformer {
    fn default() -> Self {
        Self::new("this", "self")
    }
}

#[async_trait]
impl NodeTransformer for SelfTransformer {
    fn name(&self) -> &'static str {
        "self"
    }

    async fn transform(&self, node: &Node, _scope: Option<&Scope<'_>>) -> TranspileResult<Node> {
        RootRenamer {
            rename: |root: &str| (root == self.from).then(|| self.to.clone()),
        }
        .fold(node)
    }
}

use crate::{Node, TranspileResult};

mod jsp;

pub use jsp::{JspOptions, JspRenderer};

/// Turns a transformed tree into target-dialect text.
pub trait Renderer: Send + Sync {
    fn name(&self) -> &'static str;

    fn render(&self, node: &Node) -> TranspileResult<String>;
}

/// Renders nothing. Useful to exercise parsing and passes alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn name(&self) -> &'static str {
        "null"
    }

    fn render(&self, _node: &Node) -> TranspileResult<String> {
        Ok(String::new())
    }
}

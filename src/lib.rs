mod analyzer;
mod ast;
mod config;
mod content;
mod error;
mod iter;
mod parser;
mod render;
pub mod transform;
mod transpiler;

// Public exports.
pub use analyzer::{MacroCalls, analyze};
pub use ast::{Expected, FieldMatch, LiteralType, Node, SetOperator};
pub use config::{PassConfig, PipelineConfig, RendererConfig};
pub use content::{ContentModel, ContentResult, EntityRef, MacroSource, MemoryContentModel, output_path};
pub use error::{ContentError, ParseError, ParseErrorKind, TranspileError, TranspileResult};
pub use iter::NodeIterator;
pub use parser::parse;
pub use render::{JspOptions, JspRenderer, NullRenderer, Renderer};
pub use transpiler::{MacroRequest, Transpiler, TranspilerBuilder};

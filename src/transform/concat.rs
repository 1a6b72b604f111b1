use async_trait::async_trait;

use super::{Fold, NodeTransformer, Scope, walk};
use crate::ast::{FieldMatch, LiteralType, SetOperator};
use crate::{Node, NodeIterator, TranspileResult};

/// Splits string-building assignments into appends.
///
/// `{% set x = x ~ a ~ b %}` becomes `x += a` then `x += b`, and
/// `{% set x = 'a' ~ b %}` becomes `x = 'a'` then `x += b`. A chain that
/// reads `x` after its first term stays one assignment, joined with `+=`.
/// Pure `+` chains are arithmetic and left alone. Any `~` left in an
/// expression becomes `+=`, the EL string concatenation operator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcatTransformer;

struct Concat;

/// The terms of `t0 (+|~) t1 ...` when the chain builds a string.
fn concat_terms(chain: &[Node]) -> Option<Vec<&Node>> {
    let joiners = FieldMatch::new().with_any("value", ["+", "~"]);
    let mut it = NodeIterator::new(chain);
    let mut terms = Vec::new();
    let mut tilde = false;

    while it.advance(1) {
        let term = it.current()?;
        terms.push(term);
        if !it.advance(1) {
            break;
        }
        let joiner = it.current()?;
        if !joiner.is(Some("Operand"), Some(&joiners)) {
            return None;
        }
        tilde |= matches!(joiner, Node::Operand { value } if value == "~");
    }

    let has_string = terms.iter().any(|term| {
        matches!(
            term,
            Node::Literal {
                value_type: LiteralType::String,
                ..
            }
        )
    });
    (terms.len() > 1 && (has_string || tilde)).then_some(terms)
}

/// Whether `term` reads the variable rooted at `root`.
fn reads(term: &Node, root: Option<&str>) -> bool {
    let mut found = false;
    term.visit(&mut |node| {
        if matches!(node, Node::Variable { .. }) && node.root_name() == root {
            found = true;
        }
    });
    found
}

impl Concat {
    fn split(&mut self, node: &Node) -> TranspileResult<Option<Vec<Node>>> {
        let Node::Set {
            variable,
            value,
            operator: SetOperator::Assign,
        } = node
        else {
            return Ok(None);
        };
        let Node::Expression { children } = value.as_ref() else {
            return Ok(None);
        };
        let Some(terms) = concat_terms(children) else {
            return Ok(None);
        };
        let Some((first, rest)) = terms.split_first() else {
            return Ok(None);
        };

        let root = variable.root_name();
        if rest.iter().any(|term| reads(term, root)) {
            // The chain reads the target after its first term.
            let mut joined = Vec::with_capacity(children.len());
            for (index, term) in terms.iter().enumerate() {
                if index > 0 {
                    joined.push(Node::operand("+="));
                }
                joined.push(self.fold(term)?);
            }
            return Ok(Some(vec![Node::set(
                variable.as_ref().clone(),
                Node::expression(joined),
            )]));
        }

        let mut statements = Vec::with_capacity(terms.len());
        if *first != variable.as_ref() {
            statements.push(Node::set(variable.as_ref().clone(), self.fold(first)?));
        }
        for term in rest {
            statements.push(Node::append(variable.as_ref().clone(), self.fold(term)?));
        }
        Ok(Some(statements))
    }
}

impl Fold for Concat {
    fn fold(&mut self, node: &Node) -> TranspileResult<Node> {
        match node {
            Node::Operand { value } if value == "~" => Ok(Node::operand("+=")),
            other => walk(self, other),
        }
    }

    fn fold_body(&mut self, nodes: &[Node]) -> TranspileResult<Vec<Node>> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            match self.split(node)? {
                Some(statements) => out.extend(statements),
                None => out.push(self.fold(node)?),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl NodeTransformer for ConcatTransformer {
    fn name(&self) -> &'static str {
        "concat"
    }

    async fn transform(&self, node: &Node, _scope: Option<&Scope<'_>>) -> TranspileResult<Node> {
        Concat.fold(node)
    }
}

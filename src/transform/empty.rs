use async_trait::async_trait;

use super::{Fold, NodeTransformer, Scope, walk};
use crate::ast::FieldMatch;
use crate::{Node, NodeIterator, TranspileResult};

/// Rewrites emptiness checks into the EL `empty` operator.
///
/// `x == none` and `x == ''` become `empty x`, `!=` becomes `not empty x`.
/// In `if` conditions a bare `x` becomes
/// `(not empty x and ('' += x) != 'false')` and `not x` the inverse, so that
/// empty strings, empty collections and `false` are all falsy.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyTransformer;

struct Empty;

fn is_nothing(node: &Node) -> bool {
    match node {
        Node::Literal { value, .. } => value.is_null() || value.as_str() == Some(""),
        _ => false,
    }
}

fn empty(subject: Node) -> Node {
    Node::expression(vec![Node::operand("empty"), subject])
}

fn not_empty(subject: Node) -> Node {
    Node::expression(vec![Node::operand("not"), Node::operand("empty"), subject])
}

/// `x | string`, which renders as an EL string coercion.
fn as_string(subject: Node) -> Node {
    Node::filter("string", subject, vec![])
}

fn truthy(subject: Node) -> Node {
    Node::group(Node::condition(vec![
        not_empty(subject.clone()),
        Node::boolean_operand("and"),
        Node::expression(vec![
            as_string(subject),
            Node::operand("!="),
            Node::string("false"),
        ]),
    ]))
}

fn falsy(subject: Node) -> Node {
    Node::group(Node::condition(vec![
        empty(subject.clone()),
        Node::boolean_operand("or"),
        Node::expression(vec![
            as_string(subject),
            Node::operand("=="),
            Node::string("false"),
        ]),
    ]))
}

/// `[a, ==|!=, b]` where one side is none or the empty string.
fn emptiness_check(children: &[Node]) -> Option<Node> {
    let comparison = FieldMatch::new().with_any("value", ["==", "!="]);
    let it = NodeIterator::new(children);
    if it.len() != 3 {
        return None;
    }
    let index = it.find_index(Some("Operand"), Some(&comparison), None)?;
    if index != 1 {
        return None;
    }

    let [left, operator, right] = children else {
        return None;
    };
    let subject = match (is_nothing(left), is_nothing(right)) {
        (false, true) => left,
        (true, false) => right,
        _ => return None,
    };
    let negated = matches!(operator, Node::Operand { value } if value == "!=");
    Some(if negated {
        not_empty(subject.clone())
    } else {
        empty(subject.clone())
    })
}

/// Applies truthiness rules to an already folded condition.
fn truthiness(node: Node) -> Node {
    match node {
        Node::Variable { .. } => truthy(node),
        Node::Expression { children } => match children.as_slice() {
            [Node::Operand { value }, subject @ Node::Variable { .. }] if value == "not" => {
                falsy(subject.clone())
            }
            _ => Node::Expression { children },
        },
        Node::Condition { children } => Node::Condition {
            children: children
                .into_iter()
                .map(|child| match child {
                    Node::BooleanOperand { .. } => child,
                    other => truthiness(other),
                })
                .collect(),
        },
        Node::Group { children } => Node::Group {
            children: children.into_iter().map(truthiness).collect(),
        },
        other => other,
    }
}

impl Fold for Empty {
    fn fold(&mut self, node: &Node) -> TranspileResult<Node> {
        match node {
            Node::Expression { children } => match emptiness_check(children) {
                Some(check) => self.fold(&check),
                None => walk(self, node),
            },
            Node::If {
                condition,
                children,
                else_children,
            } => Ok(Node::If {
                condition: Box::new(truthiness(self.fold(condition)?)),
                children: self.fold_body(children)?,
                else_children: self.fold_body(else_children)?,
            }),
            other => walk(self, other),
        }
    }
}

#[async_trait]
impl NodeTransformer for EmptyTransformer {
    fn name(&self) -> &'static str {
        "empty"
    }

    async fn transform(&self, node: &Node, _scope: Option<&Scope<'_>>) -> TranspileResult<Node> {
        Empty.fold(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use crate::render::{JspRenderer, Renderer};

    async fn condition(source: &str) -> Node {
        let output = EmptyTransformer
            .transform(&parse(source).unwrap(), None)
            .await
            .unwrap();
        match output.children() {
            [Node::If { condition, .. }] => condition.as_ref().clone(),
            other => panic!("Expected a single IfNode, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_equality_with_nothing() {
        assert_eq!(
            condition("{% if x == none %}{% endif %}").await,
            empty(Node::path("x"))
        );
        assert_eq!(
            condition("{% if '' == x.y %}{% endif %}").await,
            empty(Node::path("x.y"))
        );
        assert_eq!(
            condition("{% if x != null %}{% endif %}").await,
            not_empty(Node::path("x"))
        );
    }

    #[tokio::test]
    async fn test_bare_variables_in_conditions() {
        assert_eq!(
            condition("{% if items %}{% endif %}").await,
            truthy(Node::path("items"))
        );
        assert_eq!(
            condition("{% if not items %}{% endif %}").await,
            falsy(Node::path("items"))
        );
        assert_eq!(
            condition("{% if a and (not b or c > 1) %}{% endif %}").await,
            Node::condition(vec![
                truthy(Node::path("a")),
                Node::boolean_operand("and"),
                Node::group(Node::condition(vec![
                    falsy(Node::path("b")),
                    Node::boolean_operand("or"),
                    Node::expression(vec![Node::path("c"), Node::operand(">"), Node::number(1)]),
                ])),
            ])
        );
    }

    #[tokio::test]
    async fn test_comparisons_with_values_are_untouched() {
        let expected = Node::expression(vec![
            Node::path("x"),
            Node::operand("=="),
            Node::string("a"),
        ]);
        assert_eq!(condition("{% if x == 'a' %}{% endif %}").await, expected);
    }

    #[tokio::test]
    async fn test_outside_conditions() {
        let output = EmptyTransformer
            .transform(&parse("{{ x }}{{ y == none }}").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(
            output,
            Node::list(vec![
                Node::output(Node::path("x")),
                Node::output(empty(Node::path("y"))),
            ])
        );
    }

    #[tokio::test]
    async fn test_elif_conditions() {
        let output = EmptyTransformer
            .transform(&parse("{% if a %}{% elif b %}{% endif %}").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(
            output,
            Node::list(vec![Node::if_else(
                truthy(Node::path("a")),
                vec![],
                vec![Node::if_else(truthy(Node::path("b")), vec![], vec![])],
            )])
        );
    }

    #[tokio::test]
    async fn test_false_flag_stays_falsy() {
        let output = EmptyTransformer
            .transform(&parse("{% if disabled %}D{% endif %}").unwrap(), None)
            .await
            .unwrap();
        let jsp = JspRenderer::default().render(&output).unwrap();
        assert_eq!(
            jsp,
            "<c:if test=\"${(not empty disabled and ('' += disabled) != 'false')}\">D</c:if>"
        );
    }
}

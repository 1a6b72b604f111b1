use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primitive type of a [`Node::Literal`], inferred by the parser.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiteralType {
    String,
    Number,
    Boolean,
    Null,
}

/// Assignment flavour of a [`Node::Set`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SetOperator {
    #[default]
    #[serde(rename = "=")]
    Assign,
    /// String accumulation, `x += a`.
    #[serde(rename = "+=")]
    Append,
}

/// A node of the template syntax tree.
///
/// Every node owns its children outright; there are no parent links and no
/// sharing between trees, so `clone` always produces an independent copy.
/// Serialized nodes take the form `{"type": "<Kind>Node", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Node {
    /// A generic value holder, used for data resolved from outside the template.
    #[serde(rename = "ValueNode")]
    Value { value: Value },
    #[serde(rename = "LiteralNode")]
    Literal {
        value: Value,
        value_type: LiteralType,
    },
    /// Literal output text.
    #[serde(rename = "TextNode")]
    Text { value: String },
    /// A dotted variable reference, `item.name` is `["item", "name"]`.
    #[serde(rename = "VariableNode")]
    Variable { fields: Vec<String> },
    /// An arithmetic, comparison or unary operator.
    #[serde(rename = "OperandNode")]
    Operand { value: String },
    /// `and` / `or`.
    #[serde(rename = "BooleanOperandNode")]
    BooleanOperand { value: String },
    /// A single argument or declared parameter. Positional arguments have no
    /// name, declared parameters without a default have no value.
    #[serde(rename = "ParameterNode")]
    Parameter {
        name: Option<String>,
        value: Option<Box<Node>>,
    },
    /// An argument list. Also used for `{key: value}` map literals.
    #[serde(rename = "ParametersNode")]
    Parameters { children: Vec<Node> },
    /// A `[a, b]` list literal.
    #[serde(rename = "ArrayNode")]
    Array { children: Vec<Node> },
    /// An invocation. `children` holds the body of a `{% call %}` block.
    #[serde(rename = "CallNode")]
    Call {
        name: String,
        parameters: Box<Node>,
        children: Vec<Node>,
    },
    #[serde(rename = "MacroNode")]
    Macro {
        name: String,
        parameters: Box<Node>,
        children: Vec<Node>,
        #[serde(default)]
        doc: Option<String>,
    },
    #[serde(rename = "SetNode")]
    Set {
        variable: Box<Node>,
        value: Box<Node>,
        #[serde(default)]
        operator: SetOperator,
    },
    #[serde(rename = "IfNode")]
    If {
        condition: Box<Node>,
        children: Vec<Node>,
        #[serde(default)]
        else_children: Vec<Node>,
    },
    #[serde(rename = "ForNode")]
    For {
        key_name: Option<String>,
        value_name: String,
        value: Box<Node>,
        children: Vec<Node>,
    },
    /// `a and b or c`: operands separated by boolean operands.
    #[serde(rename = "ConditionNode")]
    Condition { children: Vec<Node> },
    /// `a + b == c`: operands separated by operators, evaluated left to right.
    #[serde(rename = "ExpressionNode")]
    Expression { children: Vec<Node> },
    /// Explicit parentheses around a single inner node.
    #[serde(rename = "GroupNode")]
    Group { children: Vec<Node> },
    #[serde(rename = "FilterNode")]
    Filter {
        name: String,
        value: Box<Node>,
        parameters: Box<Node>,
    },
    /// `{{ expr }}`.
    #[serde(rename = "OutputNode")]
    Output { children: Vec<Node> },
    /// Where caller-supplied content is injected, `{{ caller() }}`.
    #[serde(rename = "YieldNode")]
    Yield,
    #[serde(rename = "NodeList")]
    NodeList { children: Vec<Node> },
}

impl Node {
    pub fn text<T: Into<String>>(value: T) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    pub fn variable<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        assert!(!fields.is_empty(), "a variable needs at least one field");
        Self::Variable { fields }
    }

    /// Builds a variable from a dotted path, `"item.name"`.
    pub fn path(path: &str) -> Self {
        Self::variable(path.split('.'))
    }

    pub fn string<T: Into<String>>(value: T) -> Self {
        Self::Literal {
            value: Value::String(value.into()),
            value_type: LiteralType::String,
        }
    }

    pub fn number<T: Into<serde_json::Number>>(value: T) -> Self {
        Self::Literal {
            value: Value::Number(value.into()),
            value_type: LiteralType::Number,
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self::Literal {
            value: Value::Bool(value),
            value_type: LiteralType::Boolean,
        }
    }

    pub fn null() -> Self {
        Self::Literal {
            value: Value::Null,
            value_type: LiteralType::Null,
        }
    }

    pub fn value(value: Value) -> Self {
        Self::Value { value }
    }

    pub fn operand<T: Into<String>>(value: T) -> Self {
        Self::Operand {
            value: value.into(),
        }
    }

    pub fn boolean_operand<T: Into<String>>(value: T) -> Self {
        let value = value.into();
        assert!(
            value == "and" || value == "or",
            "'{value}' is not a boolean operator"
        );
        Self::BooleanOperand { value }
    }

    pub fn parameter(name: Option<&str>, value: Option<Node>) -> Self {
        Self::Parameter {
            name: name.map(str::to_string),
            value: value.map(Box::new),
        }
    }

    pub fn named(name: &str, value: Node) -> Self {
        Self::parameter(Some(name), Some(value))
    }

    pub fn positional(value: Node) -> Self {
        Self::parameter(None, Some(value))
    }

    pub fn parameters(children: Vec<Node>) -> Self {
        assert!(
            children.iter().all(|c| matches!(c, Self::Parameter { .. })),
            "parameter lists only hold ParameterNodes"
        );
        Self::Parameters { children }
    }

    pub fn array(children: Vec<Node>) -> Self {
        Self::Array { children }
    }

    pub fn call<T: Into<String>>(name: T, parameters: Vec<Node>, children: Vec<Node>) -> Self {
        Self::Call {
            name: name.into(),
            parameters: Box::new(Self::parameters(parameters)),
            children,
        }
    }

    pub fn macro_def<T: Into<String>>(name: T, parameters: Vec<Node>, children: Vec<Node>) -> Self {
        Self::Macro {
            name: name.into(),
            parameters: Box::new(Self::parameters(parameters)),
            children,
            doc: None,
        }
    }

    pub fn set(variable: Node, value: Node) -> Self {
        Self::assignment(variable, value, SetOperator::Assign)
    }

    pub fn append(variable: Node, value: Node) -> Self {
        Self::assignment(variable, value, SetOperator::Append)
    }

    fn assignment(variable: Node, value: Node, operator: SetOperator) -> Self {
        assert!(
            matches!(variable, Self::Variable { .. }),
            "set targets must be VariableNodes"
        );
        Self::Set {
            variable: Box::new(variable),
            value: Box::new(value),
            operator,
        }
    }

    pub fn if_else(condition: Node, children: Vec<Node>, else_children: Vec<Node>) -> Self {
        Self::If {
            condition: Box::new(condition),
            children,
            else_children,
        }
    }

    pub fn for_each(
        key_name: Option<&str>,
        value_name: &str,
        value: Node,
        children: Vec<Node>,
    ) -> Self {
        Self::For {
            key_name: key_name.map(str::to_string),
            value_name: value_name.to_string(),
            value: Box::new(value),
            children,
        }
    }

    pub fn condition(children: Vec<Node>) -> Self {
        Self::Condition { children }
    }

    pub fn expression(children: Vec<Node>) -> Self {
        Self::Expression { children }
    }

    pub fn group(inner: Node) -> Self {
        Self::Group {
            children: vec![inner],
        }
    }

    pub fn filter<T: Into<String>>(name: T, value: Node, parameters: Vec<Node>) -> Self {
        Self::Filter {
            name: name.into(),
            value: Box::new(value),
            parameters: Box::new(Self::parameters(parameters)),
        }
    }

    pub fn output(expression: Node) -> Self {
        Self::Output {
            children: vec![expression],
        }
    }

    pub fn list(children: Vec<Node>) -> Self {
        Self::NodeList { children }
    }

    /// The serialized type tag.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Value { .. } => "ValueNode",
            Self::Literal { .. } => "LiteralNode",
            Self::Text { .. } => "TextNode",
            Self::Variable { .. } => "VariableNode",
            Self::Operand { .. } => "OperandNode",
            Self::BooleanOperand { .. } => "BooleanOperandNode",
            Self::Parameter { .. } => "ParameterNode",
            Self::Parameters { .. } => "ParametersNode",
            Self::Array { .. } => "ArrayNode",
            Self::Call { .. } => "CallNode",
            Self::Macro { .. } => "MacroNode",
            Self::Set { .. } => "SetNode",
            Self::If { .. } => "IfNode",
            Self::For { .. } => "ForNode",
            Self::Condition { .. } => "ConditionNode",
            Self::Expression { .. } => "ExpressionNode",
            Self::Group { .. } => "GroupNode",
            Self::Filter { .. } => "FilterNode",
            Self::Output { .. } => "OutputNode",
            Self::Yield => "YieldNode",
            Self::NodeList { .. } => "NodeList",
        }
    }

    /// A short human readable label used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Self::Call { name, .. } | Self::Macro { name, .. } | Self::Filter { name, .. } => {
                format!("{} '{}'", self.type_name(), name)
            }
            Self::Variable { fields } => format!("VariableNode '{}'", fields.join(".")),
            Self::Operand { value } | Self::BooleanOperand { value } | Self::Text { value } => {
                format!("{} '{}'", self.type_name(), value)
            }
            _ => self.type_name().to_string(),
        }
    }

    /// Serializes the node (and all of its descendants) into a JSON value.
    pub fn to_value(&self) -> Value {
        // A tree of plain data with string keys cannot fail to serialize.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The ordered children of a container-like node, the `then` branch for
    /// an `IfNode`.
    pub fn children(&self) -> &[Node] {
        match self {
            Self::Parameters { children }
            | Self::Array { children }
            | Self::Call { children, .. }
            | Self::Macro { children, .. }
            | Self::If { children, .. }
            | Self::For { children, .. }
            | Self::Condition { children }
            | Self::Expression { children }
            | Self::Group { children }
            | Self::Output { children }
            | Self::NodeList { children } => children,
            Self::Value { .. }
            | Self::Literal { .. }
            | Self::Text { .. }
            | Self::Variable { .. }
            | Self::Operand { .. }
            | Self::BooleanOperand { .. }
            | Self::Parameter { .. }
            | Self::Set { .. }
            | Self::Filter { .. }
            | Self::Yield => &[],
        }
    }

    /// Every node-valued field, in declaration order.
    pub fn child_nodes(&self) -> Vec<&Node> {
        let mut nodes = Vec::new();
        match self {
            Self::Parameter { value, .. } => nodes.extend(value.as_deref()),
            Self::Call {
                parameters,
                children,
                ..
            }
            | Self::Macro {
                parameters,
                children,
                ..
            } => {
                nodes.push(parameters.as_ref());
                nodes.extend(children);
            }
            Self::Set {
                variable, value, ..
            } => {
                nodes.push(variable.as_ref());
                nodes.push(value.as_ref());
            }
            Self::If {
                condition,
                children,
                else_children,
            } => {
                nodes.push(condition.as_ref());
                nodes.extend(children);
                nodes.extend(else_children);
            }
            Self::For {
                value, children, ..
            } => {
                nodes.push(value.as_ref());
                nodes.extend(children);
            }
            Self::Filter {
                value, parameters, ..
            } => {
                nodes.push(value.as_ref());
                nodes.push(parameters.as_ref());
            }
            other => nodes.extend(other.children()),
        }
        nodes
    }

    /// Pre-order, read-only traversal of the node and all of its descendants.
    pub fn visit<'a, F: FnMut(&'a Node)>(&'a self, visitor: &mut F) {
        visitor(self);
        for child in self.child_nodes() {
            child.visit(visitor);
        }
    }

    /// Looks up a named parameter of a `ParametersNode`, `CallNode` or `MacroNode`.
    pub fn parameter_named(&self, name: &str) -> Option<&Node> {
        let list = match self {
            Self::Parameters { children } => children,
            Self::Call { parameters, .. } | Self::Macro { parameters, .. } => {
                return parameters.parameter_named(name);
            }
            _ => return None,
        };
        list.iter()
            .find(|p| matches!(p, Self::Parameter { name: Some(n), .. } if n == name))
    }

    /// The ParameterNodes of a call, macro, filter or parameter list.
    pub fn parameter_list(&self) -> &[Node] {
        match self {
            Self::Parameters { children } => children,
            Self::Call { parameters, .. }
            | Self::Macro { parameters, .. }
            | Self::Filter { parameters, .. } => parameters.parameter_list(),
            _ => &[],
        }
    }

    /// First path segment of a `VariableNode`.
    pub fn root_name(&self) -> Option<&str> {
        match self {
            Self::Variable { fields } => fields.first().map(String::as_str),
            _ => None,
        }
    }

    /// Whether this is text made only of whitespace.
    pub fn is_blank_text(&self) -> bool {
        matches!(self, Self::Text { value } if value.trim().is_empty())
    }

    /// Reads a field of the serialized node.
    pub fn field(&self, name: &str) -> Option<Value> {
        match (self, name) {
            (Self::Text { value }, "value")
            | (Self::Operand { value }, "value")
            | (Self::BooleanOperand { value }, "value") => Some(Value::String(value.clone())),
            (Self::Call { name, .. }, "name")
            | (Self::Macro { name, .. }, "name")
            | (Self::Filter { name, .. }, "name") => Some(Value::String(name.clone())),
            (Self::Literal { value, .. }, "value") | (Self::Value { value }, "value") => {
                Some(value.clone())
            }
            _ => match self.to_value() {
                Value::Object(mut map) => map.remove(name),
                _ => None,
            },
        }
    }

    /// Checks the node against an optional type name and an optional set of
    /// field expectations. The `Node` suffix of the type name may be omitted.
    pub fn is(&self, type_name: Option<&str>, fields: Option<&FieldMatch>) -> bool {
        let tag = self.type_name();
        let type_ok = type_name.is_none_or(|wanted| {
            wanted == tag || tag.strip_suffix("Node").is_some_and(|short| short == wanted)
        });
        type_ok && fields.is_none_or(|fields| fields.matches(self))
    }
}

/// Expected value of a single field in a [`FieldMatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expected {
    One(Value),
    AnyOf(Vec<Value>),
}

impl Expected {
    fn accepts(&self, actual: &Value) -> bool {
        match self {
            Self::One(expected) => expected == actual,
            Self::AnyOf(options) => options.contains(actual),
        }
    }
}

/// Field expectations for [`Node::is`]. All entries must hold.
///
/// ```
/// use macrojsp::{FieldMatch, Node};
///
/// let node = Node::operand("!=");
/// let comparison = FieldMatch::new().with_any("value", ["==", "!="]);
/// assert!(node.is(Some("Operand"), Some(&comparison)));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMatch {
    fields: BTreeMap<String, Expected>,
}

impl FieldMatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<V: Into<Value>>(mut self, field: &str, value: V) -> Self {
        self.fields
            .insert(field.to_string(), Expected::One(value.into()));
        self
    }

    pub fn with_any<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.fields.insert(
            field.to_string(),
            Expected::AnyOf(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        self.fields.iter().all(|(name, expected)| {
            node.field(name)
                .is_some_and(|actual| expected.accepts(&actual))
        })
    }
}

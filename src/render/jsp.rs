use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Renderer;
use crate::ast::{LiteralType, SetOperator};
use crate::{Node, TranspileError, TranspileResult};

const JSTL_CORE: &str = "http://java.sun.com/jsp/jstl/core";
const JSTL_FUNCTIONS: &str = "http://java.sun.com/jsp/jstl/functions";

/// Output settings of the [`JspRenderer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct JspOptions {
    /// Prefix of the custom tags macros compile to, `<ui:button/>`.
    pub tag_prefix: String,
    /// Tag directory the custom tags are imported from.
    pub tag_dir: String,
    pub body_content: String,
    /// Emit the tag file directives before each macro.
    pub emit_header: bool,
}

impl Default for JspOptions {
    fn default() -> Self {
        Self {
            tag_prefix: "ui".to_string(),
            tag_dir: "/WEB-INF/tags".to_string(),
            body_content: "scriptless".to_string(),
            emit_header: true,
        }
    }
}

/// Renders transformed trees as JSP tag files using JSTL and EL 3.0.
///
/// The renderer is a straight syntax mapping: semantic differences between
/// the dialects are expected to be handled by the passes beforehand.
///
/// ```
/// use macrojsp::{parse, JspRenderer, Renderer};
///
/// let root = parse("{% if user %}Hi {{ user.name | upper }}{% endif %}").unwrap();
/// let jsp = JspRenderer::default().render(&root).unwrap();
/// assert_eq!(jsp, "<c:if test=\"${user}\">Hi ${fn:toUpperCase(user.name)}</c:if>");
/// ```
#[derive(Debug, Default, Clone)]
pub struct JspRenderer {
    options: JspOptions,
}

impl JspRenderer {
    pub fn new(options: JspOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &JspOptions {
        &self.options
    }
}

impl Renderer for JspRenderer {
    fn name(&self) -> &'static str {
        "jsp"
    }

    fn render(&self, node: &Node) -> TranspileResult<String> {
        let mut output = String::new();
        self.statement(node, &mut output)?;
        Ok(output)
    }
}

fn unsupported(node: &Node, reason: &str) -> TranspileError {
    TranspileError::Render {
        node: node.describe(),
        reason: reason.to_string(),
    }
}

/// Single-quoted EL string literal.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Escapes text for use inside a double-quoted attribute.
fn attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// Template text with EL openers escaped so the container leaves them alone.
fn text(value: &str) -> String {
    value.replace("${", "\\${").replace("#{", "\\#{")
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// EL literal for JSON data: `{'k': v}` maps and `[a, b]` lists.
fn json_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(json_literal).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("{}: {}", quote(k), json_literal(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

impl JspRenderer {
    fn statements(&self, nodes: &[Node], output: &mut String) -> TranspileResult<()> {
        for node in nodes {
            self.statement(node, output)?;
        }
        Ok(())
    }

    fn statement(&self, node: &Node, output: &mut String) -> TranspileResult<()> {
        match node {
            Node::NodeList { children } => self.statements(children, output)?,
            Node::Text { value } => output.push_str(&text(value)),
            Node::Macro { .. } => self.tag_file(node, output)?,
            Node::Output { children } => match children.as_slice() {
                [call @ Node::Call { .. }] => self.custom_tag(call, output)?,
                [expression] => {
                    output.push_str(&format!("${{{}}}", self.expression(expression)?));
                }
                _ => return Err(unsupported(node, "output holds exactly one expression")),
            },
            Node::Call { .. } => self.custom_tag(node, output)?,
            Node::Yield => output.push_str("<jsp:doBody/>"),
            Node::Set {
                variable,
                value,
                operator,
            } => {
                let name = self.expression(variable)?;
                match (value.as_ref(), operator) {
                    (Node::NodeList { children }, _) => {
                        output.push_str(&format!("<c:set var=\"{}\">", name));
                        self.statements(children, output)?;
                        output.push_str("</c:set>");
                    }
                    (Node::Yield, _) => {
                        output.push_str(&format!("<c:set var=\"{}\"><jsp:doBody/></c:set>", name));
                    }
                    (value, SetOperator::Assign) => output.push_str(&format!(
                        "<c:set var=\"{}\" value=\"${{{}}}\"/>",
                        name,
                        attribute(&self.expression(value)?)
                    )),
                    (value, SetOperator::Append) => output.push_str(&format!(
                        "<c:set var=\"{0}\" value=\"${{{0} += {1}}}\"/>",
                        name,
                        attribute(&self.expression(value)?)
                    )),
                }
            }
            Node::If {
                condition,
                children,
                else_children,
            } => {
                let test = attribute(&self.expression(condition)?);
                if else_children.is_empty() {
                    output.push_str(&format!("<c:if test=\"${{{}}}\">", test));
                    self.statements(children, output)?;
                    output.push_str("</c:if>");
                } else {
                    output.push_str("<c:choose>");
                    output.push_str(&format!("<c:when test=\"${{{}}}\">", test));
                    self.statements(children, output)?;
                    output.push_str("</c:when>");
                    self.branches(else_children, output)?;
                    output.push_str("</c:choose>");
                }
            }
            Node::For {
                key_name,
                value_name,
                value,
                children,
            } => {
                let items = attribute(&self.expression(value)?);
                match key_name {
                    None => output.push_str(&format!(
                        "<c:forEach var=\"{}\" items=\"${{{}}}\" varStatus=\"loop\">",
                        value_name, items
                    )),
                    Some(key_name) => {
                        let entry = format!("{}_entry", key_name);
                        output.push_str(&format!(
                            "<c:forEach var=\"{}\" items=\"${{{}}}\" varStatus=\"loop\">",
                            entry, items
                        ));
                        output.push_str(&format!(
                            "<c:set var=\"{}\" value=\"${{{}.key}}\"/>",
                            key_name, entry
                        ));
                        output.push_str(&format!(
                            "<c:set var=\"{}\" value=\"${{{}.value}}\"/>",
                            value_name, entry
                        ));
                    }
                }
                self.statements(children, output)?;
                output.push_str("</c:forEach>");
            }
            Node::Value { .. }
            | Node::Literal { .. }
            | Node::Variable { .. }
            | Node::Expression { .. }
            | Node::Condition { .. }
            | Node::Group { .. }
            | Node::Filter { .. }
            | Node::Array { .. } => {
                output.push_str(&format!("${{{}}}", self.expression(node)?));
            }
            Node::Operand { .. }
            | Node::BooleanOperand { .. }
            | Node::Parameter { .. }
            | Node::Parameters { .. } => {
                return Err(unsupported(node, "not a statement"));
            }
        }
        Ok(())
    }

    /// The `else` side of a `c:choose`: an `elif` chain adds `c:when`s.
    fn branches(&self, else_children: &[Node], output: &mut String) -> TranspileResult<()> {
        if let [
            Node::If {
                condition,
                children,
                else_children,
            },
        ] = else_children
        {
            output.push_str(&format!(
                "<c:when test=\"${{{}}}\">",
                attribute(&self.expression(condition)?)
            ));
            self.statements(children, output)?;
            output.push_str("</c:when>");
            if else_children.is_empty() {
                return Ok(());
            }
            return self.branches(else_children, output);
        }

        output.push_str("<c:otherwise>");
        self.statements(else_children, output)?;
        output.push_str("</c:otherwise>");
        Ok(())
    }

    fn tag_file(&self, node: &Node, output: &mut String) -> TranspileResult<()> {
        let Node::Macro {
            parameters,
            children,
            doc,
            ..
        } = node
        else {
            return Err(unsupported(node, "not a macro"));
        };

        if let Some(doc) = doc {
            output.push_str(&format!("<%-- {} --%>\n", doc.replace("--%>", "-- %>")));
        }

        let mut defaults = String::new();
        if self.options.emit_header {
            output.push_str(&format!(
                "<%@ tag body-content=\"{}\" pageEncoding=\"UTF-8\" %>\n",
                self.options.body_content
            ));
            output.push_str(&format!("<%@ taglib prefix=\"c\" uri=\"{}\" %>\n", JSTL_CORE));
            output.push_str(&format!("<%@ taglib prefix=\"fn\" uri=\"{}\" %>\n", JSTL_FUNCTIONS));
            output.push_str(&format!(
                "<%@ taglib prefix=\"{}\" tagdir=\"{}\" %>\n",
                self.options.tag_prefix, self.options.tag_dir
            ));
        }

        for parameter in parameters.parameter_list() {
            let Node::Parameter {
                name: Some(name),
                value: default,
            } = parameter
            else {
                return Err(unsupported(parameter, "macro parameters must be named"));
            };
            if self.options.emit_header {
                output.push_str(&format!(
                    "<%@ attribute name=\"{}\" required=\"{}\" rtexprvalue=\"true\" %>\n",
                    name,
                    default.is_none()
                ));
            }
            if let Some(default) = default {
                defaults.push_str(&format!(
                    "<c:if test=\"${{empty {0}}}\"><c:set var=\"{0}\" value=\"${{{1}}}\"/></c:if>\n",
                    name,
                    attribute(&self.expression(default)?)
                ));
            }
        }

        output.push_str(&defaults);
        self.statements(children, output)
    }

    /// `<ui:name attr="${v}"/>`, with a body for `{% call %}` blocks.
    fn custom_tag(&self, node: &Node, output: &mut String) -> TranspileResult<()> {
        let Node::Call {
            name,
            parameters,
            children,
        } = node
        else {
            return Err(unsupported(node, "not a call"));
        };

        output.push_str(&format!("<{}:{}", self.options.tag_prefix, name));
        let mut positions = 0_usize..;
        for parameter in parameters.parameter_list() {
            let Node::Parameter {
                name,
                value: Some(value),
            } = parameter
            else {
                continue;
            };
            let attribute_name = match name {
                Some(name) => name.clone(),
                None => format!("arg{}", positions.next().unwrap_or_default()),
            };
            output.push_str(&format!(
                " {}=\"${{{}}}\"",
                attribute_name,
                attribute(&self.expression(value)?)
            ));
        }

        if children.is_empty() {
            output.push_str("/>");
        } else {
            output.push('>');
            self.statements(children, output)?;
            output.push_str(&format!("</{}:{}>", self.options.tag_prefix, name));
        }
        Ok(())
    }

    fn arguments(&self, parameters: &Node) -> TranspileResult<Vec<String>> {
        parameters
            .parameter_list()
            .iter()
            .filter_map(|parameter| match parameter {
                Node::Parameter { value: Some(v), .. } => Some(self.expression(v)),
                _ => None,
            })
            .collect()
    }

    fn expression(&self, node: &Node) -> TranspileResult<String> {
        Ok(match node {
            Node::Value { value } => json_literal(value),
            Node::Literal { value, value_type } => match (value_type, value) {
                (LiteralType::String, Value::String(s)) => quote(s),
                (LiteralType::Null, _) => "null".to_string(),
                (_, other) => json_literal(other),
            },
            Node::Variable { fields } => {
                let mut path = String::new();
                for (index, field) in fields.iter().enumerate() {
                    if index == 0 {
                        path.push_str(field);
                    } else if is_identifier(field) {
                        path.push('.');
                        path.push_str(field);
                    } else if field.chars().all(|c| c.is_ascii_digit()) {
                        path.push_str(&format!("[{}]", field));
                    } else {
                        path.push_str(&format!("[{}]", quote(field)));
                    }
                }
                path
            }
            Node::Operand { value } => match value.as_str() {
                "~" => "+=".to_string(),
                "//" => "div".to_string(),
                "in" | "**" => return Err(unsupported(node, "EL has no such operator")),
                other => other.to_string(),
            },
            Node::BooleanOperand { value } => value.clone(),
            Node::Expression { children } | Node::Condition { children } => children
                .iter()
                .map(|child| self.expression(child))
                .collect::<TranspileResult<Vec<_>>>()?
                .join(" "),
            Node::Group { children } => format!(
                "({})",
                children
                    .iter()
                    .map(|child| self.expression(child))
                    .collect::<TranspileResult<Vec<_>>>()?
                    .join(" ")
            ),
            Node::Filter {
                name,
                value,
                parameters,
            } => self.filter(name, &self.expression(value)?, &self.arguments(parameters)?),
            Node::Call {
                name, parameters, ..
            } => format!("{}({})", name, self.arguments(parameters)?.join(", ")),
            Node::Parameters { children } => format!(
                "{{{}}}",
                children
                    .iter()
                    .map(|entry| match entry {
                        Node::Parameter {
                            name: Some(key),
                            value: Some(value),
                        } => Ok(format!("{}: {}", quote(key), self.expression(value)?)),
                        other => Err(unsupported(other, "map entries need a key and a value")),
                    })
                    .collect::<TranspileResult<Vec<_>>>()?
                    .join(", ")
            ),
            Node::Array { children } => format!(
                "[{}]",
                children
                    .iter()
                    .map(|child| self.expression(child))
                    .collect::<TranspileResult<Vec<_>>>()?
                    .join(", ")
            ),
            Node::Parameter {
                value: Some(value), ..
            } => self.expression(value)?,
            Node::Output { children } => match children.as_slice() {
                [only] => self.expression(only)?,
                _ => return Err(unsupported(node, "output holds exactly one expression")),
            },
            _ => return Err(unsupported(node, "not an expression")),
        })
    }

    /// Filters map onto the JSTL function library.
    fn filter(&self, name: &str, subject: &str, arguments: &[String]) -> String {
        let argument = |index: usize| arguments.get(index).map_or("''", String::as_str);
        match name {
            "upper" => format!("fn:toUpperCase({})", subject),
            "lower" => format!("fn:toLowerCase({})", subject),
            "length" | "count" => format!("fn:length({})", subject),
            "trim" => format!("fn:trim({})", subject),
            "escape" | "e" => format!("fn:escapeXml({})", subject),
            "replace" => format!("fn:replace({}, {}, {})", subject, argument(0), argument(1)),
            "join" => format!("fn:join({}, {})", subject, argument(0)),
            "split" => format!("fn:split({}, {})", subject, argument(0)),
            "first" => format!("{}[0]", subject),
            "last" => format!("{0}[fn:length({0}) - 1]", subject),
            "default" | "d" => format!("(empty {0} ? {1} : {0})", subject, argument(0)),
            "safe" => subject.to_string(),
            "string" => format!("('' += {})", subject),
            other => {
                let mut all = vec![subject.to_string()];
                all.extend(arguments.iter().cloned());
                format!("fn:{}({})", other, all.join(", "))
            }
        }
    }
}

use macrojsp::transform::{
    ConcatTransformer, InlineTransformer, NodeTransformer, SelfTransformer, VariableTransformer,
};
use macrojsp::{Node, parse};

/// Top-level statements, without the blank text between macros.
fn statements(root: Node) -> Vec<Node> {
    match root {
        Node::NodeList { children } => children
            .into_iter()
            .filter(|node| !node.is_blank_text())
            .collect(),
        other => vec![other],
    }
}

async fn run(pass: &dyn NodeTransformer, source: &str) -> Node {
    pass.transform(&parse(source).unwrap(), None).await.unwrap()
}

#[tokio::test]
async fn test_inline_fixture() {
    let source = include_str!("data/inline_local.njk");
    let expected: Node = serde_json::from_str(include_str!("data/inline_local.json")).unwrap();

    let output = run(&InlineTransformer::local_only(), source).await;

    assert_eq!(statements(output), statements(expected));
}

#[tokio::test]
async fn test_inline_fills_caller_slots() {
    let output = run(
        &InlineTransformer::local_only(),
        "{% macro box() %}<div>{{ caller() }}</div>{% endmacro %}\
         {% macro page() %}{% call box() %}<p>{{ text }}</p>{% endcall %}{% endmacro %}",
    )
    .await;

    let page = statements(output)
        .into_iter()
        .find(|node| matches!(node, Node::Macro { name, .. } if name == "page"))
        .unwrap();
    assert_eq!(
        page.children(),
        &[Node::list(vec![
            Node::text("<div>"),
            Node::list(vec![
                Node::text("<p>"),
                Node::output(Node::path("text")),
                Node::text("</p>"),
            ]),
            Node::text("</div>"),
        ])]
    );
}

#[tokio::test]
async fn test_recursive_macros_stay_calls() {
    let source = "{% macro tree(node) %}{% for child in node.children %}{{ tree(child) }}{% endfor %}{% endmacro %}";
    let input = parse(source).unwrap();
    let output = InlineTransformer::local_only()
        .transform(&input, None)
        .await
        .unwrap();
    assert_eq!(output, input);
}

#[tokio::test]
async fn test_passes_compose() {
    let source = "{% macro label(this) %}{% set text = this.name %}{% set text = text ~ '!' %}{{ text }}{% endmacro %}";
    let passes: Vec<Box<dyn NodeTransformer>> = vec![
        Box::new(SelfTransformer::default()),
        Box::new(ConcatTransformer),
        Box::new(VariableTransformer::new("v_", "", |_: &str| true)),
    ];

    let mut node = parse(source).unwrap();
    for pass in &passes {
        node = pass.transform(&node, None).await.unwrap();
    }

    let Node::Macro { children, .. } = node else {
        panic!("Expected a MacroNode");
    };
    assert_eq!(
        children,
        vec![
            Node::set(Node::path("v_text"), Node::path("v_self.name")),
            Node::append(Node::path("v_text"), Node::string("!")),
            Node::output(Node::path("v_text")),
        ]
    );
}

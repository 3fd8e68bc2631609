//! Markdown document tree built from the `pulldown-cmark` event stream.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};

/// A node of the parsed document.
///
/// Containers the converter has no use for (emphasis, links, tables, ...)
/// collapse into [`Node::Inline`] or [`Node::Other`] so their text still
/// reaches the enclosing block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Heading { level: u8, children: Vec<Node> },
    Paragraph(Vec<Node>),
    List { ordered: bool, items: Vec<Node> },
    Item(Vec<Node>),
    CodeBlock { info: Option<String>, text: String },
    BlockQuote(Vec<Node>),
    /// Inline formatting container (emphasis, strong, link, image alt, ...).
    Inline(Vec<Node>),
    /// Any other block container.
    Other(Vec<Node>),
    Text(String),
    Code(String),
    SoftBreak,
    HardBreak,
    Rule,
}

impl Node {
    /// Whether this node starts a new line of text inside a list item.
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            Node::Heading { .. }
                | Node::Paragraph(_)
                | Node::List { .. }
                | Node::Item(_)
                | Node::CodeBlock { .. }
                | Node::BlockQuote(_)
                | Node::Other(_)
                | Node::Rule
        )
    }
}

enum Frame {
    Root,
    Heading(u8),
    Paragraph,
    List(bool),
    Item,
    CodeBlock(Option<String>),
    BlockQuote,
    Inline,
    Other,
}

/// Parse `markdown` into its top-level nodes.
pub fn parse(markdown: &str) -> Vec<Node> {
    let parser = Parser::new_ext(markdown, Options::ENABLE_STRIKETHROUGH);
    let mut stack: Vec<(Frame, Vec<Node>)> = vec![(Frame::Root, Vec::new())];

    for event in parser {
        match event {
            Event::Start(tag) => stack.push((frame_for(tag), Vec::new())),
            Event::End(_) => {
                // Root is never popped; a stray end event is ignored.
                if stack.len() < 2 {
                    continue;
                }
                if let Some((frame, children)) = stack.pop() {
                    let node = close(frame, children);
                    if let Some((_, parent)) = stack.last_mut() {
                        parent.push(node);
                    }
                }
            }
            Event::Text(text) => push_leaf(&mut stack, Node::Text(text.into_string())),
            Event::Code(code) => push_leaf(&mut stack, Node::Code(code.into_string())),
            Event::SoftBreak => push_leaf(&mut stack, Node::SoftBreak),
            Event::HardBreak => push_leaf(&mut stack, Node::HardBreak),
            Event::Rule => push_leaf(&mut stack, Node::Rule),
            // Raw HTML, footnote references and task markers carry no text.
            Event::Html(_) | Event::FootnoteReference(_) | Event::TaskListMarker(_) => {}
        }
    }

    // Unwind anything left open so no text is lost.
    while stack.len() > 1 {
        if let Some((frame, children)) = stack.pop() {
            let node = close(frame, children);
            if let Some((_, parent)) = stack.last_mut() {
                parent.push(node);
            }
        }
    }

    stack.pop().map(|(_, nodes)| nodes).unwrap_or_default()
}

fn frame_for(tag: Tag<'_>) -> Frame {
    match tag {
        Tag::Heading(level, _, _) => Frame::Heading(level as u8),
        Tag::Paragraph => Frame::Paragraph,
        Tag::List(start) => Frame::List(start.is_some()),
        Tag::Item => Frame::Item,
        Tag::CodeBlock(CodeBlockKind::Fenced(info)) => {
            let info = info.trim();
            Frame::CodeBlock((!info.is_empty()).then(|| info.to_string()))
        }
        Tag::CodeBlock(CodeBlockKind::Indented) => Frame::CodeBlock(None),
        Tag::BlockQuote => Frame::BlockQuote,
        Tag::Emphasis
        | Tag::Strong
        | Tag::Strikethrough
        | Tag::Link(..)
        | Tag::Image(..) => Frame::Inline,
        _ => Frame::Other,
    }
}

fn close(frame: Frame, children: Vec<Node>) -> Node {
    match frame {
        Frame::Heading(level) => Node::Heading { level, children },
        Frame::Paragraph => Node::Paragraph(children),
        Frame::List(ordered) => Node::List {
            ordered,
            items: children,
        },
        Frame::Item => Node::Item(children),
        Frame::CodeBlock(info) => {
            let mut text = String::new();
            for child in &children {
                if let Node::Text(t) = child {
                    text.push_str(t);
                }
            }
            let text = text.trim_end_matches('\n').to_string();
            Node::CodeBlock { info, text }
        }
        Frame::BlockQuote => Node::BlockQuote(children),
        Frame::Inline => Node::Inline(children),
        Frame::Root | Frame::Other => Node::Other(children),
    }
}

fn push_leaf(stack: &mut [(Frame, Vec<Node>)], node: Node) {
    if let Some((_, children)) = stack.last_mut() {
        children.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_nested_structure() {
        let nodes = parse("# Hi *there*\n\n- a\n- b");
        assert_eq!(nodes.len(), 2);
        match &nodes[0] {
            Node::Heading { level, children } => {
                assert_eq!(*level, 1);
                assert!(matches!(children[1], Node::Inline(_)));
            }
            other => panic!("expected heading, got {other:?}"),
        }
        match &nodes[1] {
            Node::List { ordered, items } => {
                assert!(!ordered);
                assert_eq!(items.len(), 2);
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn code_block_keeps_info_and_drops_trailing_newline() {
        let nodes = parse("```rust title\nfn main() {}\n```\n");
        assert_eq!(
            nodes,
            vec![Node::CodeBlock {
                info: Some("rust title".into()),
                text: "fn main() {}".into(),
            }]
        );
    }

    #[test]
    fn html_is_dropped() {
        let nodes = parse("<div>raw</div>\n");
        assert!(nodes.is_empty());
    }
}

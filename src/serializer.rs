//! Indented HTML output for saved pages.
//!
//! Each tag, text run and comment goes on its own line, indented one space
//! per nesting level. Whitespace-only text between tags is dropped. Content of
//! raw text elements (`script`, `style`, ...) and of `pre`/`textarea` is
//! written verbatim because re-indenting it would change what it means.

use html5ever::{Attribute, QualName};
use markup5ever_rcdom::{Handle, NodeData};

const INDENT: &str = " ";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

const PREFORMATTED_ELEMENTS: &[&str] = &["pre", "textarea", "listing"];

/// Serializes a parsed document (or any subtree) in indented form.
pub fn to_pretty_html(root: &Handle) -> String {
    let mut out = String::new();
    match root.data {
        NodeData::Document => {
            for child in root.children.borrow().iter() {
                write_pretty(child, 0, &mut out);
            }
        }
        _ => write_pretty(root, 0, &mut out),
    }
    out
}

fn write_pretty(node: &Handle, depth: usize, out: &mut String) {
    match &node.data {
        NodeData::Document => {
            for child in node.children.borrow().iter() {
                write_pretty(child, depth, out);
            }
        }
        NodeData::Doctype {
            name,
            public_id,
            system_id,
        } => push_line(out, depth, &doctype(name, public_id, system_id)),
        NodeData::Text { contents } => {
            let text = contents.borrow();
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                push_line(out, depth, &escape_text(trimmed));
            }
        }
        NodeData::Comment { contents } => push_line(out, depth, &format!("<!--{}-->", contents)),
        NodeData::ProcessingInstruction { target, contents } => {
            push_line(out, depth, &format!("<?{} {}>", target, contents))
        }
        NodeData::Element {
            name,
            attrs,
            template_contents,
            ..
        } => {
            let tag = &*name.local;
            let open = open_tag(name, &attrs.borrow());

            if VOID_ELEMENTS.contains(&tag) {
                push_line(out, depth, &open);
                return;
            }

            if RAW_TEXT_ELEMENTS.contains(&tag) || PREFORMATTED_ELEMENTS.contains(&tag) {
                let mut inline = open;
                write_compact_children(node, tag, &mut inline);
                inline.push_str(&format!("</{}>", tag));
                push_line(out, depth, &inline);
                return;
            }

            push_line(out, depth, &open);
            match template_contents.borrow().as_ref() {
                Some(contents) => {
                    for child in contents.children.borrow().iter() {
                        write_pretty(child, depth + 1, out);
                    }
                }
                None => {
                    for child in node.children.borrow().iter() {
                        write_pretty(child, depth + 1, out);
                    }
                }
            }
            push_line(out, depth, &format!("</{}>", tag));
        }
    }
}

fn write_compact_children(node: &Handle, tag: &str, out: &mut String) {
    let raw = RAW_TEXT_ELEMENTS.contains(&tag);
    let children = node.children.borrow();

    // The parser drops one leading newline after <pre>; put it back so a
    // significant one survives the round trip.
    if PREFORMATTED_ELEMENTS.contains(&tag) {
        if let Some(NodeData::Text { contents }) = children.first().map(|c| &c.data) {
            if contents.borrow().starts_with('\n') {
                out.push('\n');
            }
        }
    }

    for child in children.iter() {
        write_compact(child, raw, out);
    }
}

fn write_compact(node: &Handle, raw: bool, out: &mut String) {
    match &node.data {
        NodeData::Text { contents } => {
            let text = contents.borrow();
            if raw {
                out.push_str(&text);
            } else {
                out.push_str(&escape_text(&text));
            }
        }
        NodeData::Comment { contents } => out.push_str(&format!("<!--{}-->", contents)),
        NodeData::Element { name, attrs, .. } => {
            let tag = &*name.local;
            out.push_str(&open_tag(name, &attrs.borrow()));
            if VOID_ELEMENTS.contains(&tag) {
                return;
            }
            let child_raw = RAW_TEXT_ELEMENTS.contains(&tag);
            for child in node.children.borrow().iter() {
                write_compact(child, child_raw, out);
            }
            out.push_str(&format!("</{}>", tag));
        }
        NodeData::Document | NodeData::Doctype { .. } | NodeData::ProcessingInstruction { .. } => {}
    }
}

fn push_line(out: &mut String, depth: usize, content: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(content);
    out.push('\n');
}

fn open_tag(name: &QualName, attrs: &[Attribute]) -> String {
    let mut tag = format!("<{}", name.local);
    for attr in attrs {
        tag.push(' ');
        if let Some(prefix) = &attr.name.prefix {
            tag.push_str(prefix);
            tag.push(':');
        }
        tag.push_str(&attr.name.local);
        tag.push_str("=\"");
        tag.push_str(&escape_attribute(&attr.value));
        tag.push('"');
    }
    tag.push('>');
    tag
}

fn doctype(name: &str, public_id: &str, system_id: &str) -> String {
    let mut decl = format!("<!DOCTYPE {}", name);
    if !public_id.is_empty() {
        decl.push_str(&format!(" PUBLIC \"{}\"", public_id));
        if !system_id.is_empty() {
            decl.push_str(&format!(" \"{}\"", system_id));
        }
    } else if !system_id.is_empty() {
        decl.push_str(&format!(" SYSTEM \"{}\"", system_id));
    }
    decl.push('>');
    decl
}

fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\u{a0}' => escaped.push_str("&nbsp;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\u{a0}' => escaped.push_str("&nbsp;"),
            c => escaped.push(c),
        }
    }
    escaped
}

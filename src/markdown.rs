//! Minimal ANSI rendering of markdown answers for the terminal.

use console::style;
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

/// Render markdown to a string with ANSI styling suitable for a terminal.
#[inline]
pub fn render_markdown(input: &str) -> String {
    let parser = Parser::new_ext(input, Options::empty());

    let mut out = String::new();
    let mut bold = 0usize;
    let mut italic = 0usize;
    let mut in_heading = false;
    let mut in_code_block = false;
    let mut list_depth = 0usize;

    for event in parser {
        match event {
            Event::Start(Tag::Heading { .. }) => in_heading = true,
            Event::End(TagEnd::Heading(_)) => {
                in_heading = false;
                out.push_str("\n\n");
            }
            Event::Start(Tag::Strong) => bold += 1,
            Event::End(TagEnd::Strong) => bold = bold.saturating_sub(1),
            Event::Start(Tag::Emphasis) => italic += 1,
            Event::End(TagEnd::Emphasis) => italic = italic.saturating_sub(1),
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code_block = true;
                if let CodeBlockKind::Fenced(lang) = kind
                    && !lang.is_empty()
                {
                    out.push_str(&style(format!("[{lang}]")).dim().to_string());
                    out.push('\n');
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                out.push('\n');
            }
            Event::Start(Tag::List(_)) => list_depth += 1,
            Event::End(TagEnd::List(_)) => {
                list_depth = list_depth.saturating_sub(1);
                if list_depth == 0 {
                    out.push('\n');
                }
            }
            Event::Start(Tag::Item) => {
                out.push_str(&"  ".repeat(list_depth.saturating_sub(1)));
                out.push_str("• ");
            }
            Event::End(TagEnd::Item) => out.push('\n'),
            Event::End(TagEnd::Paragraph) => {
                if list_depth == 0 {
                    out.push_str("\n\n");
                }
            }
            Event::Text(text) => {
                if in_code_block {
                    for line in text.lines() {
                        out.push_str("    ");
                        out.push_str(&style(line).dim().to_string());
                        out.push('\n');
                    }
                } else {
                    let mut styled = style(text.as_ref());
                    if in_heading {
                        styled = styled.bold().cyan();
                    }
                    if bold > 0 {
                        styled = styled.bold();
                    }
                    if italic > 0 {
                        styled = styled.italic();
                    }
                    out.push_str(&styled.to_string());
                }
            }
            Event::Code(code) => {
                out.push_str(&style(code.as_ref()).yellow().to_string());
            }
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::Rule => {
                out.push_str(&style("────────").dim().to_string());
                out.push_str("\n\n");
            }
            _ => {}
        }
    }

    while out.ends_with('\n') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paragraph_passes_through() {
        console::set_colors_enabled(false);
        assert_eq!(render_markdown("hello world"), "hello world");
    }

    #[test]
    fn paragraphs_are_separated_by_blank_lines() {
        console::set_colors_enabled(false);
        assert_eq!(render_markdown("one\n\ntwo"), "one\n\ntwo");
    }

    #[test]
    fn list_items_get_bullets() {
        console::set_colors_enabled(false);
        let rendered = render_markdown("- first\n- second");
        assert!(rendered.contains("• first"));
        assert!(rendered.contains("• second"));
    }

    #[test]
    fn code_blocks_are_indented() {
        console::set_colors_enabled(false);
        let rendered = render_markdown("```rust\nfn main() {}\n```");
        assert!(rendered.contains("    fn main() {}"));
        assert!(rendered.contains("[rust]"));
    }

    #[test]
    fn empty_input_renders_empty() {
        assert_eq!(render_markdown(""), "");
    }
}

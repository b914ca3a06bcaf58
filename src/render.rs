use scraper::{Html, Node};

// Elements that start a new line when flattened
const BLOCK_ELEMENTS: &[&str] = &[
    "div", "p", "li", "ul", "ol", "blockquote", "pre", "h1", "h2", "h3", "h4", "h5", "h6", "tr",
];

/// Flattens an HTML thread or comment body into plain terminal text.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut raw = String::new();

    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Text(text) => raw.push_str(text),
            Node::Element(element) if element.name() == "br" => raw.push('\n'),
            Node::Element(element) if BLOCK_ELEMENTS.contains(&element.name()) => {
                if !raw.is_empty() && !raw.ends_with('\n') {
                    raw.push('\n');
                }
            }
            _ => {}
        }
    }

    // Bodies are sometimes escaped twice by the web client
    let decoded = html_escape::decode_html_entities(&raw);

    let mut lines: Vec<String> = Vec::new();
    for line in decoded.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        let blank_run = collapsed.is_empty() && lines.last().map_or(true, |l| l.is_empty());
        if !blank_run {
            lines.push(collapsed);
        }
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

/// First `max_chars` characters of `text` on one line, with an ellipsis when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }

    let cut: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("plain text", "plain text")]
    #[case("<div>first</div><div>second</div>", "first\nsecond")]
    #[case("line one<br>line two", "line one\nline two")]
    #[case("<p>  lots   of\n spaces </p>", "lots of\nspaces")]
    #[case("Tom &amp; Jerry", "Tom & Jerry")]
    #[case("<b>bold</b> and <i>italic</i>", "bold and italic")]
    fn flattens_html(#[case] html: &str, #[case] expected: &str) {
        assert_eq!(html_to_text(html), expected);
    }

    #[test]
    fn blank_lines_are_collapsed() {
        assert_eq!(html_to_text("a<br><br><br><br>b<br><br>"), "a\n\nb");
    }

    #[rstest]
    #[case("short", 10, "short")]
    #[case("exactly10!", 10, "exactly10!")]
    #[case("this is far too long", 10, "this is f…")]
    #[case("çà et là partout", 6, "çà et…")]
    fn excerpts(#[case] text: &str, #[case] max: usize, #[case] expected: &str) {
        assert_eq!(excerpt(text, max), expected);
    }
}

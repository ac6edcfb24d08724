use super::tag::{decode_attribute, Attribute, Tag};
use super::ParseError;

const VOID_ELEMENTS: &[&str] = &[
    "AREA", "BASE", "BR", "COL", "EMBED", "HR", "IMG", "INPUT", "LINK", "META", "SOURCE",
    "TRACK", "WBR",
];

/// Elements whose contents are not markup.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "SCRIPT", "STYLE", "TEXTAREA", "TITLE", "XMP", "IFRAME", "NOEMBED", "NOFRAMES", "NOSCRIPT",
];

/// Start tags that close an open `<p>`.
const P_CLOSERS: &[&str] = &[
    "ADDRESS", "ARTICLE", "ASIDE", "BLOCKQUOTE", "DETAILS", "DIV", "DL", "FIELDSET",
    "FIGCAPTION", "FIGURE", "FOOTER", "FORM", "H1", "H2", "H3", "H4", "H5", "H6", "HEADER",
    "HGROUP", "HR", "MAIN", "MENU", "NAV", "OL", "P", "PRE", "SECTION", "TABLE", "UL",
];

#[derive(Debug, PartialEq)]
pub(super) struct Scan {
    pub tags: Vec<Tag>,
    pub head_end: Option<usize>,
    pub body_end: Option<usize>,
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0c)
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes.get(from..)?.iter().position(|&b| b == needle).map(|i| from + i)
}

fn find_seq(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| from + i)
}

struct OpenElement {
    name: String,
    xpath: String,
    children: usize,
}

/// Tracks open elements so each start tag gets its positional xpath.
#[derive(Default)]
struct Breadcrumbs {
    stack: Vec<OpenElement>,
    root_children: usize,
}

impl Breadcrumbs {
    fn open(&mut self, name: &str, self_closing: bool) -> String {
        self.close_implied(name);

        let xpath = match self.stack.last_mut() {
            Some(parent) => {
                parent.children += 1;
                format!("{}/*[{}][self::{}]", parent.xpath, parent.children, name)
            }
            None => {
                self.root_children += 1;
                format!("/*[{}][self::{}]", self.root_children, name)
            }
        };

        let foreign_self_closing = self_closing && self.in_foreign_content();
        if !VOID_ELEMENTS.contains(&name) && !foreign_self_closing {
            self.stack.push(OpenElement {
                name: name.to_string(),
                xpath: xpath.clone(),
                children: 0,
            });
        }
        xpath
    }

    fn close(&mut self, name: &str) {
        if let Some(index) = self.stack.iter().rposition(|e| e.name == name) {
            self.stack.truncate(index);
        }
    }

    fn in_foreign_content(&self) -> bool {
        self.stack.iter().any(|e| e.name == "SVG" || e.name == "MATH")
    }

    fn close_implied(&mut self, name: &str) {
        let current = self.stack.last().map(|e| e.name.as_str());
        match name {
            "LI" => self.close_nearest(&["LI"], &["UL", "OL"]),
            "DT" | "DD" => self.close_nearest(&["DT", "DD"], &["DL"]),
            "OPTION" if current == Some("OPTION") => {
                self.stack.pop();
            }
            _ if P_CLOSERS.contains(&name) && current == Some("P") => {
                self.stack.pop();
            }
            _ => {}
        }
    }

    fn close_nearest(&mut self, targets: &[&str], boundaries: &[&str]) {
        for index in (0..self.stack.len()).rev() {
            let open = self.stack[index].name.as_str();
            if targets.contains(&open) {
                self.stack.truncate(index);
                return;
            }
            if boundaries.contains(&open) {
                return;
            }
        }
    }
}

pub(super) fn scan(html: &str) -> Result<Scan, ParseError> {
    let bytes = html.as_bytes();
    let mut breadcrumbs = Breadcrumbs::default();
    let mut scan = Scan {
        tags: Vec::new(),
        head_end: None,
        body_end: None,
    };
    let mut pos = 0;

    while let Some(lt) = find_byte(bytes, pos, b'<') {
        let rest = &bytes[lt..];
        let next = rest.get(1).copied();

        if rest.starts_with(b"<!--") {
            let close = find_seq(bytes, lt + 4, b"-->").ok_or(ParseError::UnterminatedComment(lt))?;
            pos = close + 3;
        } else if matches!(next, Some(b'!') | Some(b'?')) {
            let close = find_byte(bytes, lt + 2, b'>').ok_or(ParseError::UnterminatedTag(lt))?;
            pos = close + 1;
        } else if next == Some(b'/') {
            let close = find_byte(bytes, lt + 2, b'>').ok_or(ParseError::UnterminatedTag(lt))?;
            let name_end = bytes[lt + 2..close]
                .iter()
                .position(|&b| is_space(b) || b == b'/')
                .map_or(close, |i| lt + 2 + i);
            let name = html[lt + 2..name_end].to_ascii_uppercase();
            match name.as_str() {
                "HEAD" if scan.head_end.is_none() => scan.head_end = Some(lt),
                "BODY" => scan.body_end = Some(lt),
                _ => {}
            }
            if !name.is_empty() {
                breadcrumbs.close(&name);
            }
            pos = close + 1;
        } else if next.is_some_and(|b| b.is_ascii_alphabetic()) {
            let (mut tag, self_closing) = parse_start_tag(html, lt)?;
            tag.xpath = breadcrumbs.open(&tag.name, self_closing);
            pos = tag.end;

            if RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) {
                pos = find_raw_text_end(bytes, pos, &tag.name)
                    .ok_or(ParseError::UnterminatedRawText(tag.start))?;
            }
            scan.tags.push(tag);
        } else {
            pos = lt + 1;
        }
    }

    Ok(scan)
}

/// Offset of the `</name` that ends a raw text element.
fn find_raw_text_end(bytes: &[u8], from: usize, name: &str) -> Option<usize> {
    let name = name.as_bytes();
    let mut pos = from;
    while let Some(lt) = find_seq(bytes, pos, b"</") {
        let name_start = lt + 2;
        let name_end = name_start + name.len();
        let matches_name = bytes
            .get(name_start..name_end)
            .is_some_and(|candidate| candidate.eq_ignore_ascii_case(name));
        let terminated = bytes
            .get(name_end)
            .is_some_and(|&b| is_space(b) || b == b'/' || b == b'>');
        if matches_name && terminated {
            return Some(lt);
        }
        pos = lt + 2;
    }
    None
}

fn parse_start_tag(html: &str, lt: usize) -> Result<(Tag, bool), ParseError> {
    let bytes = html.as_bytes();
    let len = bytes.len();
    let unterminated = ParseError::UnterminatedTag(lt);

    let mut i = lt + 1;
    while i < len && !(is_space(bytes[i]) || bytes[i] == b'/' || bytes[i] == b'>') {
        i += 1;
    }
    let name = html[lt + 1..i].to_ascii_uppercase();
    let name_end = i;
    let mut attributes = Vec::new();
    let mut self_closing = false;

    loop {
        while i < len && is_space(bytes[i]) {
            i += 1;
        }
        let Some(&b) = bytes.get(i) else {
            return Err(unterminated);
        };

        match b {
            b'>' => {
                let tag = Tag {
                    name,
                    start: lt,
                    name_end,
                    end: i + 1,
                    attributes,
                    xpath: String::new(),
                };
                return Ok((tag, self_closing));
            }
            b'/' => {
                self_closing = bytes.get(i + 1) == Some(&b'>');
                i += 1;
            }
            _ => {
                let attr_start = i;
                i += 1;
                while i < len && !(is_space(bytes[i]) || matches!(bytes[i], b'/' | b'>' | b'=')) {
                    i += 1;
                }
                let attr_name = html[attr_start..i].to_ascii_lowercase();

                let mut j = i;
                while j < len && is_space(bytes[j]) {
                    j += 1;
                }
                if bytes.get(j) != Some(&b'=') {
                    attributes.push(Attribute {
                        name: attr_name,
                        value: None,
                        span: attr_start..i,
                    });
                    continue;
                }

                j += 1;
                while j < len && is_space(bytes[j]) {
                    j += 1;
                }
                let value = match bytes.get(j) {
                    None => return Err(unterminated),
                    Some(&quote) if quote == b'"' || quote == b'\'' => {
                        let close = find_byte(bytes, j + 1, quote).ok_or(unterminated)?;
                        i = close + 1;
                        decode_attribute(&html[j + 1..close]).into_owned()
                    }
                    Some(b'>') => {
                        i = j;
                        String::new()
                    }
                    Some(_) => {
                        let mut k = j;
                        while k < len && !(is_space(bytes[k]) || bytes[k] == b'>') {
                            k += 1;
                        }
                        i = k;
                        decode_attribute(&html[j..k]).into_owned()
                    }
                };
                attributes.push(Attribute {
                    name: attr_name,
                    value: Some(value),
                    span: attr_start..i,
                });
            }
        }
    }
}

use std::borrow::Cow;
use std::ops::Range;

/// An attribute as written in the source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub(crate) name: String,
    /// Decoded value; `None` for a boolean attribute.
    pub(crate) value: Option<String>,
    /// Bytes from the start of the name to the end of the value.
    pub(crate) span: Range<usize>,
}

impl Attribute {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// A start tag found while scanning the document.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub(crate) name: String,
    pub(crate) start: usize,
    pub(crate) name_end: usize,
    pub(crate) end: usize,
    pub(crate) attributes: Vec<Attribute>,
    pub(crate) xpath: String,
}

impl Tag {
    /// Upper-case tag name, e.g. `IMG`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn xpath(&self) -> &str {
        &self.xpath
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Value of the first attribute called `name` (case-insensitive).
    /// Boolean attributes read as the empty string.
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_deref().unwrap_or(""))
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.get_attribute(name).is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Change {
    Set(String),
    SetBoolean,
    Remove,
}

/// Pending attribute changes for one tag, in the order they were made.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct TagEdits {
    changes: Vec<(String, Change)>,
}

impl TagEdits {
    pub(crate) fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn record(&mut self, name: &str, change: Change) {
        let name = name.to_ascii_lowercase();
        match self.changes.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = change,
            None => self.changes.push((name, change)),
        }
    }

    fn lookup(&self, name: &str) -> Option<&Change> {
        self.changes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, c)| c)
    }

    /// Lexical replacements for `tag`: `(range, text)` pairs against the
    /// source document. New attributes go right after the tag name.
    pub(crate) fn replacements(&self, tag: &Tag) -> Vec<(Range<usize>, String)> {
        let mut replacements = Vec::new();
        let mut inserted = String::new();

        for (name, change) in &self.changes {
            let mut existing = tag.attributes.iter().filter(|a| a.name == *name);
            match (change, existing.next()) {
                (Change::Remove, Some(first)) => {
                    replacements.push((first.span.clone(), String::new()));
                }
                (Change::Remove, None) => {}
                (change, Some(first)) => {
                    replacements.push((first.span.clone(), render_attribute(name, change)));
                }
                (change, None) => {
                    inserted.push(' ');
                    inserted.push_str(&render_attribute(name, change));
                }
            }
            // Duplicate attributes would shadow the edit, drop them.
            for duplicate in existing {
                replacements.push((duplicate.span.clone(), String::new()));
            }
        }

        if !inserted.is_empty() {
            replacements.push((tag.name_end..tag.name_end, inserted));
        }
        replacements
    }
}

fn render_attribute(name: &str, change: &Change) -> String {
    match change {
        Change::Set(value) => format!("{}=\"{}\"", name, escape_attribute(value)),
        Change::SetBoolean | Change::Remove => name.to_string(),
    }
}

/// Mutable view of the tag currently being visited. Only this tag can be
/// changed through it.
pub struct TagMut<'t> {
    tag: &'t Tag,
    edits: &'t mut TagEdits,
}

impl<'t> TagMut<'t> {
    pub(crate) fn new(tag: &'t Tag, edits: &'t mut TagEdits) -> Self {
        Self { tag, edits }
    }

    pub fn name(&self) -> &str {
        self.tag.name()
    }

    pub fn xpath(&self) -> &str {
        self.tag.xpath()
    }

    pub fn tag(&self) -> &Tag {
        self.tag
    }

    /// Current value, taking pending edits into account.
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        match self.edits.lookup(name) {
            Some(Change::Set(value)) => Some(value.as_str()),
            Some(Change::SetBoolean) => Some(""),
            Some(Change::Remove) => None,
            None => self.tag.get_attribute(name),
        }
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.get_attribute(name).is_some()
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        self.edits.record(name, Change::Set(value.to_string()));
    }

    pub fn set_boolean_attribute(&mut self, name: &str) {
        self.edits.record(name, Change::SetBoolean);
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.edits.record(name, Change::Remove);
    }

    pub fn is_modified(&self) -> bool {
        !self.edits.is_empty()
    }
}

pub fn escape_attribute(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '"', '<', '>']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Decodes the character references that commonly appear in attribute
/// values. Unknown references are kept verbatim.
pub fn decode_attribute(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut decoded = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        decoded.push_str(&rest[..amp]);
        rest = &rest[amp..];
        match decode_reference(rest) {
            Some((c, consumed)) => {
                decoded.push(c);
                rest = &rest[consumed..];
            }
            None => {
                decoded.push('&');
                rest = &rest[1..];
            }
        }
    }
    decoded.push_str(rest);
    Cow::Owned(decoded)
}

fn decode_reference(s: &str) -> Option<(char, usize)> {
    let semi = s.find(';')?;
    let body = &s[1..semi];
    let c = match body {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => {
            let code = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok()?
            } else {
                return None;
            };
            char::from_u32(code)?
        }
    };
    Some((c, semi + 1))
}

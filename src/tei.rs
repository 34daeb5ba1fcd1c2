//! TEI XML to structured text.
//!
//! Walks the XML tree GROBID returns and builds a [`StructuredDocument`],
//! then renders it into the normalized text format consumed downstream.
//! Element matching is by local name, so the TEI default namespace and
//! prefixed variants are both handled.

use anyhow::{bail, Result};
use log::error;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// One body section, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: String,
    pub body: String,
}

/// One bibliography entry, 1-indexed in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub index: usize,
    pub authors: Vec<String>,
    /// Four-digit year, or empty when the reference has no dated `when`
    /// attribute.
    pub year: String,
    pub title: String,
}

/// Structured view of a TEI document. Missing sub-fields render as empty,
/// never as placeholders that break the output format.
#[derive(Debug, Default, Clone)]
pub struct StructuredDocument {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub abstract_text: Option<String>,
    pub sections: Vec<Section>,
    pub references: Vec<Reference>,
}

/// Where a finished author name should be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthorSink {
    Document,
    Reference,
}

/// In-flight author capture: first forename and first surname seen.
#[derive(Debug, Default)]
struct AuthorCapture {
    sink: Option<AuthorSink>,
    forename: Option<String>,
    surname: Option<String>,
    in_forename: bool,
    in_surname: bool,
    name_buf: String,
}

impl AuthorCapture {
    fn finish(self) -> Option<String> {
        match (self.forename, self.surname) {
            (Some(forename), Some(surname)) => Some(format!("{} {}", forename, surname)),
            (None, Some(surname)) => Some(surname),
            // No surname at all: skip the author
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RefCapture {
    authors: Vec<String>,
    year: Option<String>,
    title: Option<String>,
    in_main_title: bool,
    title_buf: String,
}

#[derive(Debug, Default)]
struct SectionCapture {
    heading_parts: Vec<String>,
    heading_done: bool,
    capturing_heading: bool,
    body_parts: Vec<String>,
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

/// Parse a TEI XML tree into the structured document model.
pub fn parse_tei(xml: &str) -> Result<StructuredDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = StructuredDocument::default();

    // Element ancestry by local name
    let mut stack: Vec<String> = Vec::new();
    let mut saw_root = false;

    let mut in_doc_title = false;
    let mut doc_title_buf = String::new();

    let mut abstract_parts: Vec<String> = Vec::new();

    let mut author: Option<AuthorCapture> = None;
    let mut section: Option<SectionCapture> = None;
    let mut div_depth = 0usize;
    let mut head_depth = 0usize;
    let mut reference: Option<RefCapture> = None;

    let mut buf = Vec::new();
    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => bail!("malformed XML: {}", e),
        };
        match event {
            Event::Start(ref e) => {
                let name = local_name(e);
                saw_root = true;

                match name.as_str() {
                    "title" => {
                        if doc.title.is_none()
                            && !in_doc_title
                            && stack.iter().any(|n| n == "titleStmt")
                        {
                            in_doc_title = true;
                        }
                        if let Some(r) = reference.as_mut() {
                            if r.title.is_none()
                                && !r.in_main_title
                                && attribute(e, "type").as_deref() == Some("main")
                            {
                                r.in_main_title = true;
                            }
                        }
                    }
                    "author" => {
                        if author.is_none() {
                            let sink = if reference.is_some() {
                                Some(AuthorSink::Reference)
                            } else if stack.iter().any(|n| n == "sourceDesc") {
                                Some(AuthorSink::Document)
                            } else {
                                None
                            };
                            author = Some(AuthorCapture {
                                sink,
                                ..AuthorCapture::default()
                            });
                        }
                    }
                    "forename" => {
                        if let Some(a) = author.as_mut() {
                            if a.forename.is_none() {
                                a.in_forename = true;
                                a.name_buf.clear();
                            }
                        }
                    }
                    "surname" => {
                        if let Some(a) = author.as_mut() {
                            if a.surname.is_none() {
                                a.in_surname = true;
                                a.name_buf.clear();
                            }
                        }
                    }
                    "div" => {
                        if stack.iter().any(|n| n == "body") {
                            div_depth += 1;
                            if div_depth == 1 {
                                section = Some(SectionCapture::default());
                            }
                        }
                    }
                    "head" => {
                        if let Some(s) = section.as_mut() {
                            head_depth += 1;
                            // Only a head directly under the top-level div
                            // provides the section heading
                            if div_depth == 1 && head_depth == 1 && !s.heading_done {
                                s.capturing_heading = true;
                            }
                        }
                    }
                    "biblStruct" => {
                        if reference.is_none() && stack.last().map(String::as_str) == Some("listBibl")
                        {
                            reference = Some(RefCapture::default());
                        }
                    }
                    "date" => {
                        if let Some(r) = reference.as_mut() {
                            if r.year.is_none() {
                                if let Some(when) = attribute(e, "when") {
                                    r.year = Some(when.chars().take(4).collect());
                                }
                            }
                        }
                    }
                    _ => {}
                }

                stack.push(name);
            }
            Event::Empty(ref e) => {
                // Self-closing elements carry no text; only dated
                // references matter here (e.g. <date when="2019-05-01"/>)
                if local_name(e) == "date" {
                    if let Some(r) = reference.as_mut() {
                        if r.year.is_none() {
                            if let Some(when) = attribute(e, "when") {
                                r.year = Some(when.chars().take(4).collect());
                            }
                        }
                    }
                }
                saw_root = true;
            }
            Event::End(_) => {
                let Some(name) = stack.pop() else {
                    bail!("malformed XML: unbalanced closing tag");
                };
                match name.as_str() {
                    "title" => {
                        if in_doc_title {
                            in_doc_title = false;
                            let text = doc_title_buf.trim().to_string();
                            if !text.is_empty() {
                                doc.title = Some(text);
                            }
                            doc_title_buf.clear();
                        }
                        if let Some(r) = reference.as_mut() {
                            if r.in_main_title {
                                r.in_main_title = false;
                                let text = r.title_buf.trim().to_string();
                                if !text.is_empty() {
                                    r.title = Some(text);
                                }
                                r.title_buf.clear();
                            }
                        }
                    }
                    "author" => {
                        if let Some(capture) = author.take() {
                            let sink = capture.sink;
                            if let Some(full_name) = capture.finish() {
                                match sink {
                                    Some(AuthorSink::Document) => doc.authors.push(full_name),
                                    Some(AuthorSink::Reference) => {
                                        if let Some(r) = reference.as_mut() {
                                            r.authors.push(full_name);
                                        }
                                    }
                                    None => {}
                                }
                            }
                        }
                    }
                    "forename" => {
                        if let Some(a) = author.as_mut() {
                            if a.in_forename {
                                a.in_forename = false;
                                let text = a.name_buf.trim().to_string();
                                if !text.is_empty() {
                                    a.forename = Some(text);
                                }
                                a.name_buf.clear();
                            }
                        }
                    }
                    "surname" => {
                        if let Some(a) = author.as_mut() {
                            if a.in_surname {
                                a.in_surname = false;
                                let text = a.name_buf.trim().to_string();
                                if !text.is_empty() {
                                    a.surname = Some(text);
                                }
                                a.name_buf.clear();
                            }
                        }
                    }
                    "div" => {
                        if div_depth > 0 {
                            div_depth -= 1;
                            if div_depth == 0 {
                                if let Some(s) = section.take() {
                                    let heading = s.heading_parts.join(" ");
                                    doc.sections.push(Section {
                                        heading: if heading.is_empty() {
                                            "Unnamed Section".to_string()
                                        } else {
                                            heading
                                        },
                                        body: s.body_parts.join(" "),
                                    });
                                }
                            }
                        }
                    }
                    "head" => {
                        if let Some(s) = section.as_mut() {
                            if head_depth > 0 {
                                head_depth -= 1;
                            }
                            if s.capturing_heading {
                                s.capturing_heading = false;
                                s.heading_done = true;
                            }
                        }
                    }
                    "biblStruct" => {
                        if stack.last().map(String::as_str) == Some("listBibl") {
                            if let Some(r) = reference.take() {
                                doc.references.push(Reference {
                                    index: doc.references.len() + 1,
                                    authors: r.authors,
                                    year: r.year.unwrap_or_default(),
                                    title: r.title.unwrap_or_else(|| "Untitled".to_string()),
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                let text = match t.unescape() {
                    Ok(text) => text.into_owned(),
                    Err(e) => bail!("malformed XML: {}", e),
                };
                route_text(
                    &text,
                    &stack,
                    &mut doc_title_buf,
                    in_doc_title,
                    &mut abstract_parts,
                    author.as_mut(),
                    section.as_mut(),
                    head_depth,
                    reference.as_mut(),
                );
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(&t).into_owned();
                route_text(
                    &text,
                    &stack,
                    &mut doc_title_buf,
                    in_doc_title,
                    &mut abstract_parts,
                    author.as_mut(),
                    section.as_mut(),
                    head_depth,
                    reference.as_mut(),
                );
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        bail!("no root element found");
    }
    if !stack.is_empty() {
        bail!("malformed XML: unclosed element <{}>", stack[stack.len() - 1]);
    }

    if !abstract_parts.is_empty() {
        doc.abstract_text = Some(abstract_parts.join(" "));
    }

    Ok(doc)
}

/// Deliver one text node to whichever captures are active. A single node
/// can feed several captures (e.g. a surname inside a reference author).
#[allow(clippy::too_many_arguments)]
fn route_text(
    text: &str,
    stack: &[String],
    doc_title_buf: &mut String,
    in_doc_title: bool,
    abstract_parts: &mut Vec<String>,
    author: Option<&mut AuthorCapture>,
    section: Option<&mut SectionCapture>,
    head_depth: usize,
    reference: Option<&mut RefCapture>,
) {
    let collapsed = text.split_whitespace().collect::<Vec<&str>>().join(" ");
    if collapsed.is_empty() {
        return;
    }

    if in_doc_title {
        if !doc_title_buf.is_empty() {
            doc_title_buf.push(' ');
        }
        doc_title_buf.push_str(&collapsed);
    }

    if stack.iter().any(|n| n == "abstract") && stack.iter().any(|n| n == "profileDesc") {
        abstract_parts.push(collapsed.clone());
    }

    if let Some(a) = author {
        if a.in_forename || a.in_surname {
            if !a.name_buf.is_empty() {
                a.name_buf.push(' ');
            }
            a.name_buf.push_str(&collapsed);
        }
    }

    if let Some(r) = reference {
        if r.in_main_title {
            if !r.title_buf.is_empty() {
                r.title_buf.push(' ');
            }
            r.title_buf.push_str(&collapsed);
        }
    }

    if let Some(s) = section {
        if head_depth > 0 {
            // Text inside any head element is excluded from section
            // bodies; only the top-level div's own head feeds the heading
            if s.capturing_heading {
                s.heading_parts.push(collapsed);
            }
        } else {
            s.body_parts.push(collapsed);
        }
    }
}

/// Render the structured document into the normalized text format. The
/// ordering and heading scheme here is the pipeline's output contract.
pub fn render(doc: &StructuredDocument) -> String {
    let mut out = String::new();

    if let Some(title) = &doc.title {
        out.push_str(&format!("# {}\n\n", title));
    }

    if !doc.authors.is_empty() {
        out.push_str(&format!("## Authors\n{}\n\n", doc.authors.join(", ")));
    }

    if let Some(abstract_text) = &doc.abstract_text {
        out.push_str(&format!("## Abstract\n{}\n\n", abstract_text));
    }

    out.push_str("## Content\n\n");
    for section in &doc.sections {
        out.push_str(&format!("### {}\n\n", section.heading));
        out.push_str(&format!("{}\n\n", section.body));
    }

    if !doc.references.is_empty() {
        out.push_str("## References\n\n");
        for reference in &doc.references {
            let mut line = format!("{}. ", reference.index);
            if !reference.authors.is_empty() {
                line.push_str(&reference.authors.join(", "));
                line.push_str(". ");
            }
            if !reference.year.is_empty() {
                line.push_str(&format!("({}). ", reference.year));
            }
            line.push_str(&reference.title);
            line.push('.');
            out.push_str(&line);
            out.push('\n');
        }
    }

    out
}

/// Build the normalized text for a TEI document. Malformed XML never
/// crashes the batch; it degrades to an error-marker document that is
/// persisted like any other output.
pub fn build_text(xml: &str) -> String {
    match parse_tei(xml) {
        Ok(doc) => render(&doc),
        Err(e) => {
            error!("Error extracting text from TEI: {}", e);
            format!("Error extracting text: {}", e)
        }
    }
}

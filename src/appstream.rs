// src/appstream.rs

//! AppStream component metadata reader
//!
//! Packages carry a single AppStream `<component>` document. Only the
//! untranslated (C locale) values are read; elements carrying an `xml:lang`
//! attribute are skipped.

use crate::db::models::ComponentKind;
use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

/// Description stored for components that do not provide one
pub const DEFAULT_DESCRIPTION: &str = "<p>A software component</p>";

/// Metadata of one software component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentMetadata {
    pub id: String,
    pub kind: ComponentKind,
    pub name: String,
    pub summary: String,
    /// Description markup (`<p>`, `<ul>`, ...) without the enclosing element
    pub description: Option<String>,
    pub developer_name: Option<String>,
    pub homepage: Option<String>,
    /// Declared freedesktop.org categories, in document order
    pub categories: Vec<String>,
}

impl ComponentMetadata {
    /// Description, falling back to a generic one
    pub fn description_or_default(&self) -> &str {
        self.description.as_deref().unwrap_or(DEFAULT_DESCRIPTION)
    }
}

/// Map an AppStream component type to a component kind
pub fn component_kind(type_attr: Option<&str>) -> ComponentKind {
    match type_attr {
        Some("desktop") | Some("desktop-application") => ComponentKind::Desktop,
        Some("library") | Some("addon-library") => ComponentKind::Library,
        _ => ComponentKind::Generic,
    }
}

fn attribute(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|attr| attr.key.as_ref() == name)
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
}

fn is_translated(e: &BytesStart) -> bool {
    attribute(e, b"xml:lang").is_some()
}

/// Which simple text field is being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Name,
    Summary,
    DeveloperName,
    Homepage,
    Category,
}

/// Parse a component document
pub fn parse_component(xml: &str) -> Result<ComponentMetadata> {
    let mut reader = Reader::from_str(xml);

    let mut buf = Vec::new();
    let mut kind = None;
    let mut id = None;
    let mut name = None;
    let mut summary = None;
    let mut developer_name = None;
    let mut homepage = None;
    let mut categories = Vec::new();

    // Depth of elements below <component>
    let mut depth = 0usize;
    let mut closed = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    // Depth of a translated subtree being skipped
    let mut skip_until: Option<usize> = None;

    let mut description: Option<String> = None;
    let mut in_description = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();

                if kind.is_none() {
                    if tag != "component" {
                        return Err(Error::ParseError(format!(
                            "Expected <component> root element, found <{}>",
                            tag
                        )));
                    }
                    kind = Some(component_kind(attribute(&e, b"type").as_deref()));
                } else {
                    depth += 1;

                    if skip_until.is_some() {
                        // inside a translated subtree
                    } else if is_translated(&e) {
                        skip_until = Some(depth);
                    } else if in_description {
                        if let Some(markup) = description.as_mut() {
                            markup.push('<');
                            markup.push_str(&tag);
                            markup.push('>');
                        }
                    } else {
                        text.clear();
                        field = match (depth, tag.as_str()) {
                            (1, "id") => Some(Field::Id),
                            (1, "name") => Some(Field::Name),
                            (1, "summary") => Some(Field::Summary),
                            (1, "developer_name") => Some(Field::DeveloperName),
                            (1, "url") if attribute(&e, b"type").as_deref() == Some("homepage") => {
                                Some(Field::Homepage)
                            }
                            (2, "category") => Some(Field::Category),
                            (1, "description") => {
                                in_description = true;
                                description = Some(String::new());
                                None
                            }
                            _ => None,
                        };
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if kind.is_none() {
                    return Err(Error::ParseError("Component document is empty".to_string()));
                }
                if in_description && skip_until.is_none() && !is_translated(&e) {
                    if let Some(markup) = description.as_mut() {
                        markup.push('<');
                        markup.push_str(&String::from_utf8_lossy(e.name().as_ref()));
                        markup.push_str("/>");
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if skip_until.is_some() {
                    // translated text
                } else if in_description {
                    let raw = String::from_utf8_lossy(&e).to_string();
                    if !raw.trim().is_empty() {
                        if let Some(markup) = description.as_mut() {
                            markup.push_str(&raw);
                        }
                    }
                } else if field.is_some() {
                    let value = e
                        .unescape()
                        .map_err(|e| Error::ParseError(format!("Invalid text in component: {}", e)))?;
                    text.push_str(&value);
                }
            }
            Ok(Event::End(e)) => {
                if depth == 0 {
                    closed = true;
                } else if let Some(skip_depth) = skip_until {
                    if depth == skip_depth {
                        skip_until = None;
                    }
                    depth -= 1;
                } else {
                    if in_description {
                        if depth == 1 {
                            in_description = false;
                        } else if let Some(markup) = description.as_mut() {
                            markup.push_str("</");
                            markup.push_str(&String::from_utf8_lossy(e.name().as_ref()));
                            markup.push('>');
                        }
                    } else if let Some(current) = field.take() {
                        let value = text.trim().to_string();
                        match current {
                            Field::Id => id = Some(value),
                            Field::Name => name = Some(value),
                            Field::Summary => summary = Some(value),
                            Field::DeveloperName => developer_name = Some(value),
                            Field::Homepage => homepage = Some(value),
                            Field::Category => categories.push(value),
                        }
                        text.clear();
                    }
                    depth -= 1;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::ParseError(format!(
                    "Failed to parse component metadata at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !closed {
        return Err(Error::ParseError("Component document is truncated".to_string()));
    }

    let kind = kind.ok_or_else(|| Error::ParseError("No <component> element found".to_string()))?;
    let id = id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::ParseError("Component has no id".to_string()))?;
    if !is_valid_component_id(&id) {
        return Err(Error::ParseError(format!("Invalid component id '{}'", id)));
    }
    let name = name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::ParseError(format!("Component {} has no name", id)))?;

    debug!("Parsed component {} ({})", id, kind.as_str());

    Ok(ComponentMetadata {
        id,
        kind,
        name,
        summary: summary.unwrap_or_default(),
        description: description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        developer_name: developer_name.filter(|d| !d.is_empty()),
        homepage: homepage.filter(|u| !u.is_empty()),
        categories,
    })
}

/// Whether `id` is a component id that can be used as a path segment
///
/// Only ASCII letters, digits, `.`, `_` and `-` are allowed. The id may not
/// start with a dot or contain an empty dot-separated segment.
pub fn is_valid_component_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && !id.contains("..")
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Remove a leading `<?xml ...?>` declaration so documents can be concatenated
pub fn strip_xml_declaration(xml: &str) -> &str {
    let trimmed = xml.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return trimmed[end + 2..].trim_start();
        }
    }
    trimmed
}

//! Single-pass XML decoder for API artifacts.
//!
//! The document is walked as a stream of `quick-xml` events. Structural
//! elements (`api`, `resource`, `inSequence`, `faultSequence`, `sequence`,
//! `cors`) are handled here; every element inside a sequence is collected into
//! a small owned [`XmlElement`] tree and handed to the [`MediatorRegistry`].
//! Elements nobody recognises are skipped.
use std::{collections::HashSet, sync::Arc};

use http::Method;
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};

use super::{
    Api, ApiVersion, ArtifactError, CorsConfig, Position, Resource, Sequence, UriTemplate,
    VersionType,
    mediators::{Mediator, MediatorRegistry},
};

const IN_SEQUENCE: &str = "inSequence";
const FAULT_SEQUENCE: &str = "faultSequence";
const NESTED_SEQUENCE: &str = "sequence";

/// Owned snapshot of an element subtree, as seen by mediator builders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    /// Concatenated text and CDATA content of this element.
    pub text: String,
    pub line: usize,
}

impl XmlElement {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            line,
            ..Self::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Breadcrumb state threaded through the recursive descent.
#[derive(Debug, Clone)]
struct ParseContext {
    file_name: String,
    base_line: usize,
    segments: Vec<String>,
}

impl ParseContext {
    fn new(base: &Position) -> Self {
        let segments = if base.hierarchy.is_empty() {
            Vec::new()
        } else {
            vec![base.hierarchy.clone()]
        };
        Self {
            file_name: base.file_name.clone(),
            base_line: base.line_number.max(1),
            segments,
        }
    }

    fn descend(&self, segment: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.segments.push(segment.into());
        child
    }

    /// Position at `line` (1-based within the document being parsed).
    fn position(&self, line: usize) -> Position {
        Position {
            file_name: self.file_name.clone(),
            line_number: self.base_line + line.saturating_sub(1),
            hierarchy: self.segments.join("->"),
        }
    }
}

/// Event reader that keeps track of the current line.
struct XmlCursor<'a> {
    reader: Reader<&'a [u8]>,
    source: &'a str,
    consumed: usize,
    line: usize,
}

impl<'a> XmlCursor<'a> {
    fn new(source: &'a str) -> Self {
        let mut reader = Reader::from_str(source);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            source,
            consumed: 0,
            line: 1,
        }
    }

    fn sync_line(&mut self) -> usize {
        let position = (self.reader.buffer_position() as usize).min(self.source.len());
        if position > self.consumed {
            self.line += self.source.as_bytes()[self.consumed..position]
                .iter()
                .filter(|b| **b == b'\n')
                .count();
            self.consumed = position;
        }
        self.line
    }

    /// Next event together with the line on which it ends.
    fn next_event(&mut self, ctx: &ParseContext) -> Result<(Event<'a>, usize), ArtifactError> {
        let event = self.reader.read_event().map_err(|e| ArtifactError::Xml {
            position: ctx.position(self.line),
            message: e.to_string(),
        })?;
        Ok((event, self.sync_line()))
    }

    fn skip(&mut self, start: &BytesStart<'_>, ctx: &ParseContext) -> Result<(), ArtifactError> {
        self.reader.read_to_end(start.name()).map_err(|e| ArtifactError::Xml {
            position: ctx.position(self.line),
            message: e.to_string(),
        })?;
        self.sync_line();
        Ok(())
    }

    fn unexpected_eof(&self, ctx: &ParseContext, element: &str) -> ArtifactError {
        ArtifactError::Xml {
            position: ctx.position(self.line),
            message: format!("unexpected end of document inside <{element}>"),
        }
    }
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

fn read_attributes(
    start: &BytesStart<'_>,
    ctx: &ParseContext,
    line: usize,
) -> Result<Vec<(String, String)>, ArtifactError> {
    start
        .attributes()
        .map(|attribute| {
            let attribute = attribute.map_err(|e| ArtifactError::Xml {
                position: ctx.position(line),
                message: e.to_string(),
            })?;
            let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|e| ArtifactError::Xml {
                    position: ctx.position(line),
                    message: e.to_string(),
                })?
                .into_owned();
            Ok((key, value))
        })
        .collect()
}

fn attribute<'v>(attributes: &'v [(String, String)], name: &str) -> Option<&'v str> {
    attributes
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ' ', '\t', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses API artifacts with a configurable mediator vocabulary.
#[derive(Debug, Clone, Default)]
pub struct ApiParser {
    registry: MediatorRegistry,
}

impl ApiParser {
    pub fn new(registry: MediatorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MediatorRegistry {
        &self.registry
    }

    /// Decode the first `<api>` element of `xml`. Line numbers in positions
    /// are offset by `base.line_number` and hierarchies are rooted at the
    /// API name.
    pub fn unmarshal(&self, xml: &str, base: &Position) -> Result<Api, ArtifactError> {
        let root = ParseContext::new(base);
        let mut cursor = XmlCursor::new(xml);
        loop {
            match cursor.next_event(&root)? {
                (Event::Start(start), line) if start.local_name().as_ref() == b"api" => {
                    return self.parse_api(&mut cursor, &start, false, line, &root);
                }
                (Event::Empty(start), line) if start.local_name().as_ref() == b"api" => {
                    return self.parse_api(&mut cursor, &start, true, line, &root);
                }
                (Event::Start(start), _) => cursor.skip(&start, &root)?,
                (Event::Eof, line) => {
                    return Err(ArtifactError::MissingApiElement {
                        position: root.position(line),
                    });
                }
                _ => {}
            }
        }
    }

    fn parse_api(
        &self,
        cursor: &mut XmlCursor<'_>,
        start: &BytesStart<'_>,
        is_empty: bool,
        line: usize,
        root: &ParseContext,
    ) -> Result<Api, ArtifactError> {
        let attributes = read_attributes(start, root, line)?;
        let context = attribute(&attributes, "context").unwrap_or_default().to_string();
        let name = attribute(&attributes, "name").unwrap_or_default().to_string();
        let position = root.descend(&name).position(line);

        if context.is_empty() {
            return Err(ArtifactError::MissingContext { position });
        }
        if !context.starts_with('/') {
            return Err(ArtifactError::ContextWithoutLeadingSlash { position, context });
        }
        if name.is_empty() {
            return Err(ArtifactError::MissingName { position });
        }
        let version = match (
            attribute(&attributes, "version").filter(|v| !v.is_empty()),
            attribute(&attributes, "version-type").filter(|v| !v.is_empty()),
        ) {
            (None, None) => None,
            (Some(value), Some(kind)) => {
                let version_type = VersionType::parse(kind).ok_or_else(|| {
                    ArtifactError::InvalidVersionType {
                        position: position.clone(),
                        value: kind.to_string(),
                    }
                })?;
                Some(ApiVersion {
                    value: value.to_string(),
                    version_type,
                })
            }
            _ => return Err(ArtifactError::IncompleteVersion { position }),
        };

        let ctx = root.descend(&name);
        let mut api = Api {
            context,
            name,
            version,
            resources: Vec::new(),
            cors: None,
            position,
        };
        if is_empty {
            return Ok(api);
        }

        loop {
            match cursor.next_event(&ctx)? {
                (Event::Start(child), line) => match child.local_name().as_ref() {
                    b"resource" => api
                        .resources
                        .push(self.parse_resource(cursor, &child, false, line, &ctx)?),
                    b"cors" => {
                        api.cors = Some(parse_cors(&child, line, &ctx)?);
                        cursor.skip(&child, &ctx)?;
                    }
                    _ => cursor.skip(&child, &ctx)?,
                },
                (Event::Empty(child), line) => match child.local_name().as_ref() {
                    b"resource" => api
                        .resources
                        .push(self.parse_resource(cursor, &child, true, line, &ctx)?),
                    b"cors" => api.cors = Some(parse_cors(&child, line, &ctx)?),
                    _ => {}
                },
                (Event::End(end), _) if end.local_name().as_ref() == b"api" => break,
                (Event::Eof, _) => return Err(cursor.unexpected_eof(&ctx, "api")),
                _ => {}
            }
        }

        tracing::debug!(
            api = %api.name,
            context = %api.context,
            resources = api.resources.len(),
            "API artifact parsed"
        );
        Ok(api)
    }

    fn parse_resource(
        &self,
        cursor: &mut XmlCursor<'_>,
        start: &BytesStart<'_>,
        is_empty: bool,
        line: usize,
        api_ctx: &ParseContext,
    ) -> Result<Resource, ArtifactError> {
        let attributes = read_attributes(start, api_ctx, line)?;
        let template = attribute(&attributes, "uri-template")
            .or_else(|| attribute(&attributes, "url-mapping"))
            .unwrap_or("/");
        let uri_template = UriTemplate::parse(template);
        let ctx = api_ctx.descend(&uri_template.full_template);
        let position = ctx.position(line);

        let mut methods = Vec::new();
        let mut seen = HashSet::new();
        for method in split_list(attribute(&attributes, "methods").unwrap_or_default()) {
            let upper = method.to_ascii_uppercase();
            let parsed = Method::from_bytes(upper.as_bytes()).map_err(|_| {
                ArtifactError::InvalidMethod {
                    position: position.clone(),
                    method: method.clone(),
                }
            })?;
            if seen.insert(upper) {
                methods.push(parsed);
            }
        }

        let mut resource = Resource {
            methods,
            in_sequence: Sequence::new(Vec::new(), ctx.descend(IN_SEQUENCE).position(line)),
            fault_sequence: Sequence::new(Vec::new(), ctx.descend(FAULT_SEQUENCE).position(line)),
            uri_template,
            position,
        };
        if is_empty {
            return Ok(resource);
        }

        loop {
            match cursor.next_event(&ctx)? {
                (Event::Start(child), line) => match local_name(&child).as_str() {
                    IN_SEQUENCE => {
                        resource.in_sequence = self.parse_sequence(
                            cursor,
                            IN_SEQUENCE,
                            line,
                            &ctx.descend(IN_SEQUENCE),
                        )?
                    }
                    FAULT_SEQUENCE => {
                        resource.fault_sequence = self.parse_sequence(
                            cursor,
                            FAULT_SEQUENCE,
                            line,
                            &ctx.descend(FAULT_SEQUENCE),
                        )?
                    }
                    _ => cursor.skip(&child, &ctx)?,
                },
                (Event::Empty(child), line) => match local_name(&child).as_str() {
                    IN_SEQUENCE => {
                        resource.in_sequence =
                            Sequence::new(Vec::new(), ctx.descend(IN_SEQUENCE).position(line))
                    }
                    FAULT_SEQUENCE => {
                        resource.fault_sequence =
                            Sequence::new(Vec::new(), ctx.descend(FAULT_SEQUENCE).position(line))
                    }
                    _ => {}
                },
                (Event::End(end), _) if end.local_name().as_ref() == b"resource" => break,
                (Event::Eof, _) => return Err(cursor.unexpected_eof(&ctx, "resource")),
                _ => {}
            }
        }
        Ok(resource)
    }

    /// Decode an `inSequence`/`faultSequence` body, in either the wrapped
    /// (`<sequence>` child) or the direct form.
    fn parse_sequence(
        &self,
        cursor: &mut XmlCursor<'_>,
        element: &str,
        line: usize,
        ctx: &ParseContext,
    ) -> Result<Sequence, ArtifactError> {
        loop {
            match cursor.next_event(ctx)? {
                (Event::Start(child), child_line) => {
                    if local_name(&child) == NESTED_SEQUENCE {
                        let nested = ctx.descend(NESTED_SEQUENCE);
                        let mut mediators = Vec::new();
                        self.parse_mediators(cursor, NESTED_SEQUENCE, &nested, &mut mediators)?;
                        self.skip_remaining(cursor, element, ctx)?;
                        return Ok(Sequence::new(mediators, nested.position(line)));
                    }
                    let mut mediators = Vec::new();
                    self.add_mediator(cursor, &child, false, child_line, ctx, &mut mediators)?;
                    self.parse_mediators(cursor, element, ctx, &mut mediators)?;
                    return Ok(Sequence::new(mediators, ctx.position(line)));
                }
                (Event::Empty(child), child_line) => {
                    if local_name(&child) == NESTED_SEQUENCE {
                        let nested = ctx.descend(NESTED_SEQUENCE);
                        self.skip_remaining(cursor, element, ctx)?;
                        return Ok(Sequence::new(Vec::new(), nested.position(line)));
                    }
                    let mut mediators = Vec::new();
                    self.add_mediator(cursor, &child, true, child_line, ctx, &mut mediators)?;
                    self.parse_mediators(cursor, element, ctx, &mut mediators)?;
                    return Ok(Sequence::new(mediators, ctx.position(line)));
                }
                (Event::End(end), _) if end.local_name().as_ref() == element.as_bytes() => {
                    return Ok(Sequence::new(Vec::new(), ctx.position(line)));
                }
                (Event::Eof, _) => return Err(cursor.unexpected_eof(ctx, element)),
                _ => {}
            }
        }
    }

    /// Collect mediators until the closing tag of `element`.
    fn parse_mediators(
        &self,
        cursor: &mut XmlCursor<'_>,
        element: &str,
        ctx: &ParseContext,
        mediators: &mut Vec<Arc<dyn Mediator>>,
    ) -> Result<(), ArtifactError> {
        loop {
            match cursor.next_event(ctx)? {
                (Event::Start(child), line) => {
                    self.add_mediator(cursor, &child, false, line, ctx, mediators)?
                }
                (Event::Empty(child), line) => {
                    self.add_mediator(cursor, &child, true, line, ctx, mediators)?
                }
                (Event::End(end), _) if end.local_name().as_ref() == element.as_bytes() => {
                    return Ok(());
                }
                (Event::Eof, _) => return Err(cursor.unexpected_eof(ctx, element)),
                _ => {}
            }
        }
    }

    /// Anything after a wrapped `<sequence>` is ignored.
    fn skip_remaining(
        &self,
        cursor: &mut XmlCursor<'_>,
        element: &str,
        ctx: &ParseContext,
    ) -> Result<(), ArtifactError> {
        loop {
            match cursor.next_event(ctx)? {
                (Event::Start(child), _) => {
                    tracing::debug!(
                        element = %local_name(&child),
                        hierarchy = %ctx.segments.join("->"),
                        "ignoring element after nested sequence"
                    );
                    cursor.skip(&child, ctx)?
                }
                (Event::End(end), _) if end.local_name().as_ref() == element.as_bytes() => {
                    return Ok(());
                }
                (Event::Eof, _) => return Err(cursor.unexpected_eof(ctx, element)),
                _ => {}
            }
        }
    }

    fn add_mediator(
        &self,
        cursor: &mut XmlCursor<'_>,
        start: &BytesStart<'_>,
        is_empty: bool,
        line: usize,
        ctx: &ParseContext,
        mediators: &mut Vec<Arc<dyn Mediator>>,
    ) -> Result<(), ArtifactError> {
        let name = local_name(start);
        if !self.registry.contains(&name) {
            tracing::debug!(
                element = %name,
                position = %ctx.position(line),
                "skipping unknown mediator"
            );
            if !is_empty {
                cursor.skip(start, ctx)?;
            }
            return Ok(());
        }

        let element = read_element(cursor, start, is_empty, line, ctx)?;
        let position = ctx.descend(&name).position(line);
        if let Some(mediator) = self.registry.build(&element, position) {
            mediators.push(mediator?);
        }
        Ok(())
    }
}

/// Materialise the subtree rooted at `start`.
fn read_element(
    cursor: &mut XmlCursor<'_>,
    start: &BytesStart<'_>,
    is_empty: bool,
    line: usize,
    ctx: &ParseContext,
) -> Result<XmlElement, ArtifactError> {
    let mut element = XmlElement::new(local_name(start), line);
    element.attributes = read_attributes(start, ctx, line)?;
    if is_empty {
        return Ok(element);
    }

    loop {
        match cursor.next_event(ctx)? {
            (Event::Start(child), child_line) => {
                let child = read_element(cursor, &child, false, child_line, ctx)?;
                element.children.push(child);
            }
            (Event::Empty(child), child_line) => {
                let child = read_element(cursor, &child, true, child_line, ctx)?;
                element.children.push(child);
            }
            (Event::Text(text), line) => {
                let text = text.unescape().map_err(|e| ArtifactError::Xml {
                    position: ctx.position(line),
                    message: e.to_string(),
                })?;
                element.text.push_str(&text);
            }
            (Event::CData(data), _) => {
                element
                    .text
                    .push_str(&String::from_utf8_lossy(&data.into_inner()));
            }
            (Event::End(_), _) => return Ok(element),
            (Event::Eof, _) => return Err(cursor.unexpected_eof(ctx, &element.name)),
            _ => {}
        }
    }
}

fn parse_cors(
    start: &BytesStart<'_>,
    line: usize,
    ctx: &ParseContext,
) -> Result<CorsConfig, ArtifactError> {
    let attributes = read_attributes(start, ctx, line)?;
    let position = ctx.descend("cors").position(line);
    let invalid = |message: String| ArtifactError::InvalidElement {
        position: position.clone(),
        element: "cors".to_string(),
        message,
    };
    let parse_bool = |name: &str, default: bool| -> Result<bool, ArtifactError> {
        match attribute(&attributes, name) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse::<bool>()
                .map_err(|_| invalid(format!("{name} must be true or false, got: {value}"))),
        }
    };
    let list = |name: &str, default: Vec<String>| {
        attribute(&attributes, name)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(default)
    };

    let defaults = CorsConfig::default();
    let max_age = match attribute(&attributes, "max-age") {
        None => defaults.max_age,
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid(format!("max-age must be a non-negative integer, got: {value}")))?,
    };

    Ok(CorsConfig {
        enabled: parse_bool("enabled", true)?,
        allow_origins: list("allow-origins", defaults.allow_origins),
        allow_methods: list("allow-methods", defaults.allow_methods),
        allow_headers: list("allow-headers", defaults.allow_headers),
        expose_headers: list("expose-headers", defaults.expose_headers),
        allow_credentials: parse_bool("allow-credentials", false)?,
        max_age,
    })
}

/// Decode an API artifact with the built-in mediators.
pub fn unmarshal_api(xml: &str, base: &Position) -> Result<Api, ArtifactError> {
    ApiParser::default().unmarshal(xml, base)
}

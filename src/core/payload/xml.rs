//! XML payloads queried with XPath 1.0.
//!
//! Node-set results are collapsed for convenience: a single matching node
//! becomes its string value (kind `string`), several nodes become an ordered
//! list of string values (kind `nodeset`), and an empty selection is a null
//! `nodeset` rather than an error. This conflates "the expression produced one
//! string" with "the expression selected one element"; callers that need to
//! tell them apart should use `count(...)` or `string(...)` explicitly.
//!
//! Elements in a default namespace are matched by their local name, so
//! `/order/id` selects from `<order xmlns="urn:shop">`. Prefixes declared in
//! the document can be used in expressions as written (`/s:order/s:id`).
use std::{
    any::Any,
    cell::RefCell,
    sync::atomic::{AtomicU64, Ordering},
};

use serde_json::Value;
use sxd_document::{
    Package,
    dom::{ChildOfElement, ChildOfRoot, Element},
    parser,
};
use sxd_xpath::{Context, Factory, Value as XPathValue};

use super::{ExpressionError, PayloadObject, QueryResult, ResultKind, XML_CONTENT_TYPE};

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// A parsed document together with the prefixes declared in it.
struct ParsedDocument {
    id: u64,
    package: Package,
    namespaces: Vec<(String, String)>,
}

thread_local! {
    // The sxd DOM is neither `Send` nor `Sync`. One message is mediated on a
    // single blocking thread, so its queries keep hitting this slot.
    static PARSED: RefCell<Option<ParsedDocument>> = const { RefCell::new(None) };
}

#[cfg(test)]
thread_local! {
    static PARSE_COUNT: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

fn parse(source: &str) -> Result<Package, ExpressionError> {
    #[cfg(test)]
    PARSE_COUNT.with(|count| count.set(count.get() + 1));
    parser::parse(source).map_err(|e| ExpressionError::InvalidXml(format!("{e:?}")))
}

/// Drop the namespace from unprefixed elements and collect every declared
/// prefix. A prefix bound to different URIs in different scopes keeps the
/// last binding seen in document order.
fn normalize(element: Element<'_>, namespaces: &mut Vec<(String, String)>) {
    let name = element.name();
    if name.namespace_uri().is_some() && element.preferred_prefix().is_none() {
        element.set_name(name.local_part());
    }

    for ns in element.namespaces_in_scope() {
        match namespaces.iter_mut().find(|(prefix, _)| prefix == ns.prefix()) {
            Some(entry) => entry.1 = ns.uri().to_string(),
            None => namespaces.push((ns.prefix().to_string(), ns.uri().to_string())),
        }
    }

    for child in element.children() {
        if let ChildOfElement::Element(child) = child {
            normalize(child, namespaces);
        }
    }
}

fn load(id: u64, source: &str) -> Result<ParsedDocument, ExpressionError> {
    let package = parse(source)?;
    let mut namespaces = Vec::new();
    for child in package.as_document().root().children() {
        if let ChildOfRoot::Element(element) = child {
            normalize(element, &mut namespaces);
        }
    }
    Ok(ParsedDocument {
        id,
        package,
        namespaces,
    })
}

fn collapse(value: XPathValue<'_>) -> QueryResult {
    match value {
        XPathValue::String(s) => QueryResult::string(s),
        XPathValue::Number(n) => QueryResult::number(n),
        XPathValue::Boolean(b) => QueryResult::boolean(b),
        XPathValue::Nodeset(nodes) => {
            let mut texts: Vec<String> = nodes
                .document_order()
                .into_iter()
                .map(|node| node.string_value())
                .collect();
            match texts.len() {
                0 => QueryResult::new(Value::Null, ResultKind::NodeSet),
                1 => QueryResult::string(texts.remove(0)),
                _ => QueryResult::new(
                    Value::Array(texts.into_iter().map(Value::String).collect()),
                    ResultKind::NodeSet,
                ),
            }
        }
    }
}

/// An XML document checked for well-formedness at construction.
///
/// The parsed tree lives in a per-thread slot keyed by payload identity, so
/// repeated queries against the same payload parse it once.
#[derive(Debug, Clone)]
pub struct XmlPayload {
    id: u64,
    raw: Vec<u8>,
    source: String,
}

impl XmlPayload {
    pub fn new(raw: &[u8]) -> Result<Self, ExpressionError> {
        let source = std::str::from_utf8(raw)
            .map_err(|e| ExpressionError::InvalidXml(format!("payload is not UTF-8: {e}")))?
            .to_string();
        let id = NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed);
        let parsed = load(id, &source)?;
        PARSED.with(|slot| *slot.borrow_mut() = Some(parsed));
        Ok(Self {
            id,
            raw: raw.to_vec(),
            source,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl PayloadObject for XmlPayload {
    fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    fn content_type(&self) -> &str {
        XML_CONTENT_TYPE
    }

    fn query(&self, expression: &str) -> Result<QueryResult, ExpressionError> {
        let xpath = Factory::new()
            .build(expression)
            .map_err(|e| {
                ExpressionError::evaluation(expression, format!("XPath compilation failed: {e}"))
            })?
            .ok_or_else(|| ExpressionError::evaluation(expression, "empty XPath expression"))?;

        PARSED.with(|slot| -> Result<QueryResult, ExpressionError> {
            let mut slot = slot.borrow_mut();
            let parsed = match slot.take() {
                Some(parsed) if parsed.id == self.id => parsed,
                _ => load(self.id, &self.source)?,
            };
            let parsed = slot.insert(parsed);

            let mut context = Context::new();
            for (prefix, uri) in &parsed.namespaces {
                context.set_namespace(prefix, uri);
            }

            let document = parsed.package.as_document();
            let value = xpath.evaluate(&context, document.root()).map_err(|e| {
                ExpressionError::evaluation(expression, format!("XPath evaluation failed: {e}"))
            })?;
            Ok(collapse(value))
        })
    }

    fn as_string(&self) -> Result<String, ExpressionError> {
        Ok(self.source.clone())
    }

    fn underlying(&self) -> &dyn Any {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const ORDER: &[u8] = br#"<?xml version="1.0"?>
<order id="42">
  <customer>Ada</customer>
  <item qty="2">bolt</item>
  <item qty="5">nut</item>
</order>"#;

    fn parse_count() -> usize {
        PARSE_COUNT.with(|count| count.get())
    }

    #[test]
    fn test_single_node_collapses_to_string() {
        let p = XmlPayload::new(ORDER).unwrap();
        assert_eq!(
            p.query("/order/customer").unwrap(),
            QueryResult::string("Ada")
        );
        assert_eq!(
            p.query("/order/customer/text()").unwrap(),
            QueryResult::string("Ada")
        );
        assert_eq!(p.query("/order/@id").unwrap(), QueryResult::string("42"));
    }

    #[test]
    fn test_multiple_nodes_become_list() {
        let p = XmlPayload::new(ORDER).unwrap();
        let items = p.query("/order/item").unwrap();
        assert_eq!(items.kind, ResultKind::NodeSet);
        assert_eq!(items.value, json!(["bolt", "nut"]));
    }

    #[test]
    fn test_empty_nodeset_is_null() {
        let p = XmlPayload::new(ORDER).unwrap();
        let none = p.query("/order/missing").unwrap();
        assert_eq!(none.kind, ResultKind::NodeSet);
        assert!(none.is_null());
    }

    #[test]
    fn test_number_and_boolean_results() {
        let p = XmlPayload::new(ORDER).unwrap();
        assert_eq!(
            p.query("count(/order/item)").unwrap(),
            QueryResult::number(2.0)
        );
        assert_eq!(p.query("count(/order/item)").unwrap().to_text(), "2");
        assert_eq!(
            p.query("sum(/order/item/@qty)").unwrap(),
            QueryResult::number(7.0)
        );
        assert_eq!(
            p.query("/order/@id = '42'").unwrap(),
            QueryResult::boolean(true)
        );
        assert_eq!(
            p.query("string(/order/item[2])").unwrap(),
            QueryResult::string("nut")
        );
    }

    #[test]
    fn test_default_namespace_matches_local_names() {
        let p = XmlPayload::new(br#"<order xmlns="urn:shop"><id>7</id></order>"#).unwrap();
        assert_eq!(p.query("/order/id").unwrap(), QueryResult::string("7"));
        assert_eq!(p.query("count(//id)").unwrap(), QueryResult::number(1.0));
    }

    #[test]
    fn test_declared_prefixes_resolve() {
        let p = XmlPayload::new(
            br#"<s:order xmlns:s="urn:shop" xmlns:b="urn:billing">
                <s:id>7</s:id><b:total>12.5</b:total>
            </s:order>"#,
        )
        .unwrap();
        assert_eq!(p.query("/s:order/s:id").unwrap(), QueryResult::string("7"));
        assert_eq!(
            p.query("/s:order/b:total").unwrap(),
            QueryResult::string("12.5")
        );
        // Prefixed elements keep their namespace.
        assert!(p.query("/order/id").unwrap().is_null());
    }

    #[test]
    fn test_repeated_queries_reuse_parsed_document() {
        let p = XmlPayload::new(ORDER).unwrap();
        let before = parse_count();
        for _ in 0..5 {
            assert_eq!(p.query("/order/customer").unwrap().as_str(), Some("Ada"));
        }
        assert_eq!(parse_count(), before);
    }

    #[test]
    fn test_interleaved_payloads_stay_separate() {
        let order = XmlPayload::new(ORDER).unwrap();
        let other = XmlPayload::new(b"<order id=\"9\"><customer>Bob</customer></order>").unwrap();

        let before = parse_count();
        assert_eq!(order.query("/order/customer").unwrap().as_str(), Some("Ada"));
        assert_eq!(order.query("/order/@id").unwrap().as_str(), Some("42"));
        assert_eq!(other.query("/order/customer").unwrap().as_str(), Some("Bob"));
        assert_eq!(other.query("/order/@id").unwrap().as_str(), Some("9"));
        assert_eq!(parse_count(), before + 2);

        assert_eq!(order.query("/order/customer").unwrap().as_str(), Some("Ada"));
        assert_eq!(parse_count(), before + 3);
    }

    #[test]
    fn test_queries_from_another_thread() {
        let p = XmlPayload::new(ORDER).unwrap();
        let result = std::thread::spawn(move || p.query("/order/item[1]/@qty").unwrap())
            .join()
            .unwrap();
        assert_eq!(result, QueryResult::string("2"));
    }

    #[test]
    fn test_invalid_xpath_is_error() {
        let p = XmlPayload::new(ORDER).unwrap();
        assert!(matches!(
            p.query("/order/[").unwrap_err(),
            ExpressionError::EvaluationFailed { .. }
        ));
    }

    #[test]
    fn test_rejects_malformed_xml() {
        assert!(matches!(
            XmlPayload::new(b"<open>").unwrap_err(),
            ExpressionError::InvalidXml(_)
        ));
    }
}

//! Partial impression requests.
//!
//! Unlike batched events these go out one per call as an XML
//! `ClientInstRequest` document.

use serde_json::Value as JsonValue;

/// Event type carried by every partial impression.
pub const PARTIAL_IMPRESSION_TYPE: &str = "Event.PartialDynamicContent.FrontDoor";

/// Page the impression belongs to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageInfo {
    pub name: String,
    pub number: String,
    pub iid: String,
    pub suffix: String,
    pub layout: JsonValue,
}

impl PageInfo {
    /// Application namespace: `{IID}_{SFX}`.
    pub fn app_ns(&self) -> String {
        format!("{}_{}", self.iid, self.suffix)
    }
}

/// Build the XML request body for one partial impression.
pub fn build_request(
    client_id: Option<&str>,
    data: &JsonValue,
    data_source: &JsonValue,
    page: &PageInfo,
    now_ms: i64,
) -> String {
    let mut xml = String::from("<ClientInstRequest>");
    if let Some(cid) = client_id.filter(|c| !c.is_empty()) {
        push_element(&mut xml, "CID", cid);
    }
    push_element(&mut xml, "AppNS", &page.app_ns());
    xml.push_str("<Events><E>");
    push_element(&mut xml, "T", PARTIAL_IMPRESSION_TYPE);
    push_cdata(&mut xml, "DS", data_source);
    xml.push_str("<Page>");
    push_element(&mut xml, "Name", &page.name);
    push_element(&mut xml, "Num", &page.number);
    push_element(&mut xml, "IID", &page.iid);
    push_element(&mut xml, "SFX", &page.suffix);
    push_cdata(&mut xml, "L", &page.layout);
    xml.push_str("</Page>");
    push_cdata(&mut xml, "D", data);
    push_element(&mut xml, "TS", &now_ms.to_string());
    xml.push_str("</E></Events></ClientInstRequest>");
    xml
}

fn push_element(xml: &mut String, tag: &str, text: &str) {
    xml.push('<');
    xml.push_str(tag);
    xml.push('>');
    xml.push_str(&escape_text(text));
    xml.push_str("</");
    xml.push_str(tag);
    xml.push('>');
}

fn push_cdata(xml: &mut String, tag: &str, value: &JsonValue) {
    xml.push('<');
    xml.push_str(tag);
    xml.push_str("><![CDATA[");
    xml.push_str(&cdata_json(value));
    xml.push_str("]]></");
    xml.push_str(tag);
    xml.push('>');
}

/// JSON text safe to embed in a CDATA section: `]]>` is split across two sections.
pub fn cdata_json(value: &JsonValue) -> String {
    value.to_string().replace("]]>", "]]]]><![CDATA[>")
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page() -> PageInfo {
        PageInfo {
            name: "Page.Home".into(),
            number: "1".into(),
            iid: "SERP".into(),
            suffix: "5021".into(),
            layout: json!({"col": 2}),
        }
    }

    #[test]
    fn builds_full_document() {
        let xml = build_request(
            Some("CID42"),
            &json!({"a": 1}),
            &json!(["ds"]),
            &page(),
            1_700_000_000_000,
        );

        assert_eq!(
            xml,
            concat!(
                "<ClientInstRequest><CID>CID42</CID><AppNS>SERP_5021</AppNS>",
                "<Events><E><T>Event.PartialDynamicContent.FrontDoor</T>",
                "<DS><![CDATA[[\"ds\"]]]></DS>",
                "<Page><Name>Page.Home</Name><Num>1</Num><IID>SERP</IID><SFX>5021</SFX>",
                "<L><![CDATA[{\"col\":2}]]></L></Page>",
                "<D><![CDATA[{\"a\":1}]]></D><TS>1700000000000</TS>",
                "</E></Events></ClientInstRequest>"
            )
        );
    }

    #[test]
    fn omits_missing_client_id() {
        let xml = build_request(None, &json!(null), &json!(null), &page(), 0);
        assert!(!xml.contains("<CID>"));
        let xml = build_request(Some(""), &json!(null), &json!(null), &page(), 0);
        assert!(!xml.contains("<CID>"));
    }

    #[test]
    fn splits_cdata_terminators() {
        assert_eq!(
            cdata_json(&json!("x]]>y")),
            "\"x]]]]><![CDATA[>y\""
        );
    }

    #[test]
    fn escapes_markup_in_text_elements() {
        let mut p = page();
        p.name = "a<b&c".into();
        let xml = build_request(None, &json!(null), &json!(null), &p, 0);
        assert!(xml.contains("<Name>a&lt;b&amp;c</Name>"));
    }
}

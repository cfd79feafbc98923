//! XMP metadata packet generation.
//!
//! Builds the default packet attached to the catalog `/Metadata` stream
//! from the info dictionary. Existing packets are not parsed; a document
//! that already carries metadata keeps its stream object and gets the
//! regenerated bytes.

use crate::info::{decode_text_string, parse_pdf_date};
use crate::object::{Dictionary, Object};
use quick_xml::escape::escape;

const NS_X: &str = "adobe:ns:meta/";
const NS_RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const NS_DC: &str = "http://purl.org/dc/elements/1.1/";
const NS_XMP: &str = "http://ns.adobe.com/xap/1.0/";
const NS_PDF: &str = "http://ns.adobe.com/pdf/1.3/";
const NS_XMP_MM: &str = "http://ns.adobe.com/xap/1.0/mm/";

/// Values carried into the packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmpPacket {
    /// dc:title
    pub title: Option<String>,
    /// dc:creator
    pub creators: Vec<String>,
    /// dc:description
    pub description: Option<String>,
    /// pdf:Keywords
    pub keywords: Option<String>,
    /// pdf:Producer
    pub producer: Option<String>,
    /// xmp:CreatorTool
    pub creator_tool: Option<String>,
    /// xmp:CreateDate, ISO 8601
    pub create_date: Option<String>,
    /// xmp:ModifyDate, ISO 8601
    pub modify_date: Option<String>,
    /// xmpMM:DocumentID
    pub document_id: Option<String>,
}

impl XmpPacket {
    /// Collect packet values from an info dictionary.
    pub fn from_info(info: &Dictionary) -> Self {
        let text = |key: &str| info.get(key).and_then(Object::as_string).map(decode_text_string);
        let date = |key: &str| {
            text(key)
                .and_then(|d| parse_pdf_date(&d))
                .map(|d| d.to_rfc3339())
        };
        Self {
            title: text("Title"),
            creators: text("Author").into_iter().collect(),
            description: text("Subject"),
            keywords: text("Keywords"),
            producer: text("Producer"),
            creator_tool: text("Creator"),
            create_date: date("CreationDate"),
            modify_date: date("ModDate"),
            document_id: None,
        }
    }

    /// Set the document id, written as a `uuid:` URN.
    pub fn with_document_id(mut self, id: uuid::Uuid) -> Self {
        self.document_id = Some(format!("uuid:{}", id));
        self
    }

    /// Serialize the packet.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xpacket begin=\"\u{FEFF}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n");
        xml.push_str(&format!("<x:xmpmeta xmlns:x=\"{}\">\n", NS_X));
        xml.push_str(&format!("  <rdf:RDF xmlns:rdf=\"{}\">\n", NS_RDF));
        xml.push_str("    <rdf:Description rdf:about=\"\"\n");
        xml.push_str(&format!("        xmlns:dc=\"{}\"\n", NS_DC));
        xml.push_str(&format!("        xmlns:xmp=\"{}\"\n", NS_XMP));
        xml.push_str(&format!("        xmlns:pdf=\"{}\"\n", NS_PDF));
        xml.push_str(&format!("        xmlns:xmpMM=\"{}\">\n", NS_XMP_MM));
        xml.push_str("      <dc:format>application/pdf</dc:format>\n");

        if let Some(title) = &self.title {
            push_alt(&mut xml, "dc:title", title);
        }
        if !self.creators.is_empty() {
            xml.push_str("      <dc:creator>\n        <rdf:Seq>\n");
            for creator in &self.creators {
                xml.push_str(&format!("          <rdf:li>{}</rdf:li>\n", escape(creator.as_str())));
            }
            xml.push_str("        </rdf:Seq>\n      </dc:creator>\n");
        }
        if let Some(description) = &self.description {
            push_alt(&mut xml, "dc:description", description);
        }

        let simple = [
            ("pdf:Keywords", &self.keywords),
            ("pdf:Producer", &self.producer),
            ("xmp:CreatorTool", &self.creator_tool),
            ("xmp:CreateDate", &self.create_date),
            ("xmp:ModifyDate", &self.modify_date),
            ("xmpMM:DocumentID", &self.document_id),
        ];
        for (tag, value) in simple {
            if let Some(value) = value {
                xml.push_str(&format!("      <{tag}>{}</{tag}>\n", escape(value.as_str())));
            }
        }

        xml.push_str("    </rdf:Description>\n");
        xml.push_str("  </rdf:RDF>\n");
        xml.push_str("</x:xmpmeta>\n");
        xml.push_str("<?xpacket end=\"w\"?>");
        xml
    }

    /// Serialize the packet as bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_xml().into_bytes()
    }
}

fn push_alt(xml: &mut String, tag: &str, value: &str) {
    xml.push_str(&format!("      <{}>\n        <rdf:Alt>\n", tag));
    xml.push_str(&format!(
        "          <rdf:li xml:lang=\"x-default\">{}</rdf:li>\n",
        escape(value)
    ));
    xml.push_str(&format!("        </rdf:Alt>\n      </{}>\n", tag));
}

//! Reading the routing fields out of a submitted form.

use formentry_model::FormId;
use formentry_xslt::{Document, NodeId};

/// Fields of a submission needed before the transform runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadInfo {
    /// Value of `/form/@id`.
    pub form_id: FormId,
    /// Trimmed `/form/header/uid`; `None` when missing or blank.
    pub source_key: Option<String>,
}

/// Parses a payload and extracts its form id and source key.
///
/// The error string is the message recorded as the error-bin detail.
pub fn parse_payload(payload: &str) -> Result<PayloadInfo, String> {
    let doc = Document::parse(payload).map_err(|error| error.to_string())?;
    let form = doc
        .document_element()
        .filter(|&node| doc.name(node).is_some_and(|name| name.is(None, "form")))
        .ok_or_else(|| "document element is not <form>".to_string())?;

    let raw_id = doc
        .attribute(form, "id")
        .ok_or_else(|| "<form> has no id attribute".to_string())?;
    let form_id = raw_id.parse::<FormId>().map_err(|error| error.to_string())?;

    let source_key = child_element(&doc, form, "header")
        .and_then(|header| child_element(&doc, header, "uid"))
        .map(|uid| doc.string_value(uid).trim().to_string())
        .filter(|key| !key.is_empty());

    Ok(PayloadInfo {
        form_id,
        source_key,
    })
}

fn child_element(doc: &Document, parent: NodeId, local: &str) -> Option<NodeId> {
    doc.children(parent)
        .iter()
        .copied()
        .find(|&child| doc.name(child).is_some_and(|name| name.is(None, local)))
}

use serde::{Deserialize, Serialize};

use crate::FormId;

/// A form's identity paired with the XSLT that turns its submissions into HL7.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormDescriptor {
    pub form_id: FormId,
    pub form_uuid: String,
    #[serde(default)]
    pub name: String,
    pub xslt: String,
}

impl FormDescriptor {
    pub fn new(form_id: FormId, form_uuid: impl Into<String>, xslt: impl Into<String>) -> Self {
        Self {
            form_id,
            form_uuid: form_uuid.into(),
            name: String::new(),
            xslt: xslt.into(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

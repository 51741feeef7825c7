#![deny(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use crate::ModelError;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Identity of a pending queue entry.
    QueueEntryId
);
numeric_id!(
    /// Identity of an archived (successfully processed) entry.
    ArchiveEntryId
);
numeric_id!(
    /// Identity of an error-bin entry.
    ErrorEntryId
);
numeric_id!(
    /// Form identifier embedded in submitted payloads as `/form/@id`.
    FormId
);

impl FromStr for FormId {
    type Err = ModelError;

    /// Parses a form identifier, ignoring surrounding whitespace.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ModelError::InvalidFormId {
                value: value.to_string(),
                reason: "empty value".to_string(),
            });
        }
        trimmed
            .parse::<i64>()
            .map(Self)
            .map_err(|error| ModelError::InvalidFormId {
                value: value.to_string(),
                reason: error.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_id_parses_trimmed_integers() {
        assert_eq!(" 42 ".parse::<FormId>().unwrap(), FormId::new(42));
        assert!("".parse::<FormId>().is_err());
        assert!("4x2".parse::<FormId>().is_err());
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&QueueEntryId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}

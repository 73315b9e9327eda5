use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// Kinds that get persisted as DocumentRecords and linked to orders.
str_enum!(DocumentKind {
    Invoice => "INVOICE",
    PaymentSlip => "PAYMENT_SLIP",
});

// Classifier output. Only Invoice and PaymentSlip proceed to reconciliation.
str_enum!(DocumentClass {
    Invoice => "INVOICE",
    PaymentSlip => "PAYMENT_SLIP",
    BonusShipment => "BONUS_SHIPMENT",
    Unclassified => "UNCLASSIFIED",
});

str_enum!(Scenario {
    Linked => "LINKED",
    NotFound => "NOT_FOUND",
    Ambiguous => "AMBIGUOUS",
    AlreadyLinked => "ALREADY_LINKED",
    Invalid => "INVALID",
    // Diagnostic only: unlinked, but a pass would link it now.
    Linkable => "LINKABLE",
});

// Per-file processing states within a pass.
str_enum!(ProcessingState {
    Unseen => "UNSEEN",
    Extracted => "EXTRACTED",
    Linked => "LINKED",
    Unlinked => "UNLINKED",
    RelinkAttempted => "RELINK_ATTEMPTED",
});

impl DocumentClass {
    /// The persisted kind for classes that take part in reconciliation.
    pub fn kind(&self) -> Option<DocumentKind> {
        match self {
            Self::Invoice => Some(DocumentKind::Invoice),
            Self::PaymentSlip => Some(DocumentKind::PaymentSlip),
            Self::BonusShipment | Self::Unclassified => None,
        }
    }

    /// Blob-store bucket this class is filed under.
    pub fn bucket(&self) -> &'static str {
        match self {
            Self::Invoice => crate::config::INVOICE_BUCKET,
            Self::PaymentSlip => crate::config::SLIP_BUCKET,
            Self::BonusShipment => crate::config::BONUS_BUCKET,
            Self::Unclassified => crate::config::UNCLASSIFIED_BUCKET,
        }
    }
}

impl DocumentKind {
    /// Kind of a bucketed locator, from its first path segment.
    pub fn from_locator(locator: &str) -> Option<Self> {
        match locator.split('/').next()? {
            crate::config::INVOICE_BUCKET => Some(Self::Invoice),
            crate::config::SLIP_BUCKET => Some(Self::PaymentSlip),
            _ => None,
        }
    }

    pub fn bucket(&self) -> &'static str {
        match self {
            Self::Invoice => crate::config::INVOICE_BUCKET,
            Self::PaymentSlip => crate::config::SLIP_BUCKET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn document_kind_round_trip() {
        for (variant, s) in [
            (DocumentKind::Invoice, "INVOICE"),
            (DocumentKind::PaymentSlip, "PAYMENT_SLIP"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(DocumentKind::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn scenario_round_trip() {
        for (variant, s) in [
            (Scenario::Linked, "LINKED"),
            (Scenario::NotFound, "NOT_FOUND"),
            (Scenario::Ambiguous, "AMBIGUOUS"),
            (Scenario::AlreadyLinked, "ALREADY_LINKED"),
            (Scenario::Invalid, "INVALID"),
            (Scenario::Linkable, "LINKABLE"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(Scenario::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn processing_state_round_trip() {
        for state in [
            ProcessingState::Unseen,
            ProcessingState::Extracted,
            ProcessingState::Linked,
            ProcessingState::Unlinked,
            ProcessingState::RelinkAttempted,
        ] {
            assert_eq!(ProcessingState::from_str(state.as_str()).unwrap(), state);
        }
    }

    #[test]
    fn only_linkable_classes_have_kind() {
        assert_eq!(DocumentClass::Invoice.kind(), Some(DocumentKind::Invoice));
        assert_eq!(DocumentClass::PaymentSlip.kind(), Some(DocumentKind::PaymentSlip));
        assert_eq!(DocumentClass::BonusShipment.kind(), None);
        assert_eq!(DocumentClass::Unclassified.kind(), None);
    }

    #[test]
    fn class_and_kind_share_buckets() {
        assert_eq!(DocumentClass::Invoice.bucket(), DocumentKind::Invoice.bucket());
        assert_eq!(DocumentClass::PaymentSlip.bucket(), DocumentKind::PaymentSlip.bucket());
    }

    #[test]
    fn kind_from_bucketed_locator() {
        assert_eq!(DocumentKind::from_locator("slips/a.pdf"), Some(DocumentKind::PaymentSlip));
        assert_eq!(DocumentKind::from_locator("invoices/2024/nf.pdf"), Some(DocumentKind::Invoice));
        assert_eq!(DocumentKind::from_locator("bonus/a.pdf"), None);
        assert_eq!(DocumentKind::from_locator("a.pdf"), None);
    }

    #[test]
    fn invalid_enum_returns_error() {
        assert!(DocumentKind::from_str("invoice").is_err());
        assert!(Scenario::from_str("").is_err());
    }
}

//! Newtype identifiers.
//!
//! Every entity gets its own identifier type so a `ReviewId` can never be
//! passed where a `RequestId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace for deterministic (v5) identifiers derived from other ids.
const FUNDFLOW_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b7e_93d4_4c1a_a5e8_0d2f_41b6_7c93);

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Derive a stable identifier from a parent id and a key.
            ///
            /// Deriving the same key twice yields the same id, so a retried
            /// insert is recognised as a duplicate instead of a second row.
            pub fn derived(parent: Uuid, key: &str) -> Self {
                let mut name = parent.as_bytes().to_vec();
                name.extend_from_slice(key.as_bytes());
                Self(Uuid::new_v5(&FUNDFLOW_NAMESPACE, &name))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of an organization (tenant).
    OrganizationId
);
uuid_id!(
    /// Identifier of a fund.
    FundId
);
uuid_id!(
    /// Identifier of a fund request.
    RequestId
);
uuid_id!(
    /// Identifier of a routing rule.
    RuleId
);
uuid_id!(ReviewId);
uuid_id!(DisbursementId);
uuid_id!(AuditId);
uuid_id!(NotificationId);

/// Identifier of a user as issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

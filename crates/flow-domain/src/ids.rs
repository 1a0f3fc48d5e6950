//! Newtype identifiers. All entities are keyed by 128-bit UUIDs;
//! wrapping them keeps a `StepId` from being passed where a `RunId` is
//! expected even though both are `Uuid` underneath.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
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
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

uuid_id!(TenantId);
uuid_id!(WorkflowVersionId);
uuid_id!(StepId);
uuid_id!(EdgeId);
uuid_id!(BlockGroupId);
uuid_id!(BlockDefinitionId);
uuid_id!(RunId);
uuid_id!(StepRunId);
uuid_id!(BlockGroupRunId);
uuid_id!(CredentialId);

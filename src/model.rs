use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

#[derive(Debug, Error)]
#[error("unrecognized {kind} value: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

macro_rules! text_enum {
    ($name:ident { $( $variant:ident => $text:literal ),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
        #[serde(rename_all = "lowercase")]
        #[ts(export, export_to = "../bindings/")]
        pub enum $name {
            $( $variant, )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $text, )+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => Err(ParseEnumError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseEnumError;

            fn try_from(value: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
                value.parse()
            }
        }
    };
}

text_enum!(EntityType {
    Patient => "patient",
    Session => "session",
});

text_enum!(MutationOp {
    Create => "create",
    Update => "update",
    Delete => "delete",
});

text_enum!(MutationStatus {
    Pending => "pending",
    Error => "error",
});

/// Display setting: opaque public ids vs identifying names.
text_enum!(PrivacyMode {
    Id => "id",
    Name => "name",
});

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct Clinic {
    pub id: String,
    pub name: String,
    #[ts(type = "number")]
    pub created_at: i64,
    #[ts(type = "number")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct TeamMember {
    pub id: String,
    pub clinic_id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    #[ts(type = "number")]
    pub created_at: i64,
    #[ts(type = "number")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct Patient {
    pub id: String,
    pub clinic_id: String,
    /// Opaque identifier shown while identifying names are hidden.
    pub public_id: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub notes: Option<String>,
    #[ts(type = "number")]
    pub created_at: i64,
    #[ts(type = "number")]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number")]
    pub deleted_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number")]
    pub synced_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct ClinicSession {
    pub id: String,
    pub clinic_id: String,
    pub patient_id: String,
    #[ts(type = "number")]
    pub scheduled_at: i64,
    #[ts(type = "number")]
    pub duration_min: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub suggestions: Option<String>,
    #[ts(type = "number")]
    pub created_at: i64,
    #[ts(type = "number")]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number")]
    pub deleted_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number")]
    pub synced_at: Option<i64>,
}

/// Attachment metadata without the blob; the bytes are fetched separately.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct AttachmentMeta {
    pub id: String,
    pub clinic_id: String,
    pub session_id: String,
    pub file_name: String,
    pub mime: String,
    #[ts(type = "number")]
    pub size_bytes: i64,
    #[ts(type = "number")]
    pub created_at: i64,
}

/// A locally recorded create/update/delete awaiting remote application.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct PendingMutation {
    pub id: String,
    #[sqlx(try_from = "String")]
    pub entity_type: EntityType,
    #[sqlx(try_from = "String")]
    pub op: MutationOp,
    pub entity_id: String,
    /// JSON-encoded row payload as it should be applied remotely.
    pub payload: String,
    #[sqlx(try_from = "String")]
    pub status: MutationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error_message: Option<String>,
    #[ts(type = "number")]
    pub created_at: i64,
}

impl PendingMutation {
    pub fn payload_json(&self) -> crate::AppResult<serde_json::Value> {
        serde_json::from_str(&self.payload).map_err(|err| {
            crate::AppError::from(err)
                .with_context("operation", "decode_mutation_payload")
                .with_context("mutation_id", self.id.clone())
        })
    }
}

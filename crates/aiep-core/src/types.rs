use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AiepError;

// =============================================================================
// Enums
// =============================================================================

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The student.
    User,
    /// The tutoring agent.
    Assistant,
    /// System prompt.
    System,
    /// Tool call output fed back to the agent.
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = AiepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            "tool" => Ok(MessageRole::Tool),
            other => Err(AiepError::InvalidValue {
                field: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle state of a student's enrollment in a module.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    #[default]
    Active,
    Dropped,
    Completed,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Dropped => "dropped",
            EnrollmentStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = AiepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EnrollmentStatus::Active),
            "dropped" => Ok(EnrollmentStatus::Dropped),
            "completed" => Ok(EnrollmentStatus::Completed),
            other => Err(AiepError::InvalidValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// The three entity kinds that carry an embedding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Message,
    Insight,
    Topic,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Message, EntityKind::Insight, EntityKind::Topic];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Message => "message",
            EntityKind::Insight => "insight",
            EntityKind::Topic => "topic",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = AiepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(EntityKind::Message),
            "insight" => Ok(EntityKind::Insight),
            "topic" => Ok(EntityKind::Topic),
            other => Err(AiepError::InvalidValue {
                field: "kind",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_serialization() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");

        let role: MessageRole = serde_json::from_str("\"tool\"").unwrap();
        assert_eq!(role, MessageRole::Tool);
    }

    #[test]
    fn test_message_role_from_str() {
        for role in [
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::System,
            MessageRole::Tool,
        ] {
            assert_eq!(role.as_str().parse::<MessageRole>().unwrap(), role);
        }
        assert!("moderator".parse::<MessageRole>().is_err());
        assert!("User".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_enrollment_status_default_is_active() {
        assert_eq!(EnrollmentStatus::default(), EnrollmentStatus::Active);
    }

    #[test]
    fn test_enrollment_status_from_str() {
        assert_eq!(
            "completed".parse::<EnrollmentStatus>().unwrap(),
            EnrollmentStatus::Completed
        );
        let err = "paused".parse::<EnrollmentStatus>().unwrap_err();
        assert!(err.to_string().contains("paused"));
    }

    #[test]
    fn test_entity_kind_display_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.to_string().parse::<EntityKind>().unwrap(), kind);
        }
    }
}

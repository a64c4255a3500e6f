//! The three embeddable entity kinds.

pub mod insight;
pub mod message;
pub mod topic;

pub use insight::{Insight, InsightKind, InsightPatch, InsightScope, NewInsight};
pub use message::{ChatMessage, ChatMessagePatch, MessageKind, MessageScope, NewChatMessage};
pub use topic::{NewTopic, Topic, TopicKind, TopicPatch, TopicScope};

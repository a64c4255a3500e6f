//! Persistence and semantic search for embeddable entities.
//!
//! Provides a WAL-mode SQLite database with migrations, a generic
//! [`EmbeddingStore`] instantiated for chat messages, insights and topics,
//! cosine-distance nearest-neighbour search, atomic batch writes, and the
//! enrollment status rule.

pub mod batch;
pub mod db;
pub mod enrollment;
pub mod error;
pub mod kind;
pub mod kinds;
pub mod migrations;
pub mod search;
pub mod store;

#[cfg(test)]
pub(crate) mod test_utils;

pub use batch::{EmbeddingUpdate, MAX_BATCH_SIZE};
pub use db::Database;
pub use enrollment::{check_transition, Enrollment, EnrollmentStore, Transition};
pub use error::{ErrorKind, Result, StoreError};
pub use kind::{EmbeddingKind, ParentRef};
pub use kinds::{
    ChatMessage, ChatMessagePatch, Insight, InsightKind, InsightPatch, InsightScope,
    MessageKind, MessageScope, NewChatMessage, NewInsight, NewTopic, Topic, TopicKind,
    TopicPatch, TopicScope,
};
pub use search::{Scored, SimilarityQuery};
pub use store::{EmbeddingStore, InsightStore, KindStats, MessageStore, TopicStore};

//! # Session Domain Types
//!
//! Core per-session types for the voice conversation pipeline:
//! - **Conversation history**: role-tagged messages accumulated over a session
//! - **Utterance Detector**: speaking/silence state machine (`detector`)
//! - **Sentence Segmenter**: streaming text to speakable units (`segmenter`)
//! - **Session Machine**: orchestration state machine and interruption
//!   coordination (`machine`)
//! - **Session Registry**: concurrent map of live sessions (`registry`)

pub mod detector;
pub mod machine;
pub mod registry;
pub mod segmenter;

use serde::{Deserialize, Serialize};

/// The speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message of the conversation history.
///
/// History is conversation-ordered and append-only, with one exception: a
/// generation cancelled mid-stream gets its partial text appended as the
/// pending assistant message so that roles keep alternating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

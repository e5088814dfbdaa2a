//! Rendered message content handed to the remote platform.
//!
//! A [`RenderedContent`] is opaque to the store and the scheduler: it is
//! persisted as-is with each version and passed unchanged to the
//! [`Publisher`](crate::publisher::Publisher). The only rule the core enforces
//! is [`RenderedContent::validate`].

use serde::{Deserialize, Serialize};

/// Text plus structured rich-content blocks for one message version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedContent {
    /// Plain message text.
    #[serde(default)]
    pub text: String,
    /// Rich embeds rendered below the text.
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

/// A rich embed block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    /// Embed title. Omitted from the remote payload when empty.
    #[serde(default)]
    pub title: String,
    /// Embed body. Omitted from the remote payload when empty.
    #[serde(default)]
    pub description: String,
    /// Link attached to the title. Omitted from the remote payload when empty.
    #[serde(default)]
    pub url: String,
    /// RGB color as an integer. Omitted from the remote payload when zero.
    #[serde(default)]
    pub color: i32,
    /// Name/value fields.
    #[serde(default)]
    pub fields: Vec<EmbedField>,
}

/// A single name/value pair inside an [`Embed`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    /// Field heading.
    pub name: String,
    /// Field body.
    pub value: String,
    /// Whether the field may share a row with its neighbours.
    #[serde(default)]
    pub inline: bool,
}

/// Content validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    /// An embed field has an empty name.
    #[error("embed {embed} field {field}: name is required")]
    EmptyFieldName {
        /// Index of the embed.
        embed: usize,
        /// Index of the field inside the embed.
        field: usize,
    },

    /// An embed field has an empty value.
    #[error("embed {embed} field {field}: value is required")]
    EmptyFieldValue {
        /// Index of the embed.
        embed: usize,
        /// Index of the field inside the embed.
        field: usize,
    },
}

impl RenderedContent {
    /// Text-only content with no embeds.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            embeds: Vec::new(),
        }
    }

    /// Attach embeds, replacing any already present.
    #[must_use]
    pub fn with_embeds(mut self, embeds: Vec<Embed>) -> Self {
        self.embeds = embeds;
        self
    }

    /// Check that every embed field carries both a name and a value.
    ///
    /// # Errors
    ///
    /// Returns the first offending field, in embed order.
    pub fn validate(&self) -> Result<(), ContentError> {
        for (embed_idx, embed) in self.embeds.iter().enumerate() {
            for (field_idx, field) in embed.fields.iter().enumerate() {
                if field.name.is_empty() {
                    return Err(ContentError::EmptyFieldName {
                        embed: embed_idx,
                        field: field_idx,
                    });
                }
                if field.value.is_empty() {
                    return Err(ContentError::EmptyFieldValue {
                        embed: embed_idx,
                        field: field_idx,
                    });
                }
            }
        }
        Ok(())
    }
}

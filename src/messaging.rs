use std::borrow::Cow;
use std::sync::Arc;

use serenity::async_trait;
use serenity::http::Http;
use serenity::model::channel::AttachmentType;
use serenity::model::id::{ChannelId, MessageId};
use serenity::utils::Colour;
use thiserror::Error;
use tracing::debug;

use crate::presenter::Artifact;

const IMAGE_NAME: &str = "image0.png";

#[derive(Debug, Error)]
#[error("discord request failed: {0}")]
pub struct MessagingError(#[from] pub serenity::Error);

/// A message the bot posted and may want to delete later.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusMessage {
    pub channel: ChannelId,
    pub message: MessageId,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_artifact(
        &self,
        channel: ChannelId,
        artifact: Artifact,
    ) -> Result<StatusMessage, MessagingError>;

    async fn delete(&self, message: StatusMessage) -> Result<(), MessagingError>;
}

/// Deletes a status message, ignoring messages that are already gone.
pub async fn delete_quietly(messenger: &dyn Messenger, message: StatusMessage) {
    if let Err(why) = messenger.delete(message).await {
        debug!("Status message {} already gone: {why}", message.message);
    }
}

pub struct SerenityMessenger {
    http: Arc<Http>,
}

impl SerenityMessenger {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Messenger for SerenityMessenger {
    async fn send_artifact(
        &self,
        channel: ChannelId,
        artifact: Artifact,
    ) -> Result<StatusMessage, MessagingError> {
        let Artifact {
            title,
            description,
            author,
            image,
        } = artifact;
        let has_image = image.is_some();

        let message = channel
            .send_message(&self.http, |m| {
                m.embed(|e| {
                    e.title(title).description(description).colour(Colour::RED);
                    if let Some(author) = author {
                        e.author(|a| a.name(author));
                    }
                    if has_image {
                        e.thumbnail(format!("attachment://{IMAGE_NAME}"));
                    }
                    e
                });
                if let Some(image) = image {
                    m.add_file(AttachmentType::Bytes {
                        data: Cow::Owned(image),
                        filename: IMAGE_NAME.to_string(),
                    });
                }
                m
            })
            .await?;

        Ok(StatusMessage {
            channel,
            message: message.id,
        })
    }

    async fn delete(&self, message: StatusMessage) -> Result<(), MessagingError> {
        message
            .channel
            .delete_message(&self.http, message.message)
            .await?;

        Ok(())
    }
}

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::AccessToken;
use crate::stream::error::StreamError;

/// Longest prefix of an undecodable message kept in [`StreamError::Decode`].
const DECODE_SNIPPET_LEN: usize = 120;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

impl fmt::Display for SubscriptionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe => f.write_str("subscribe"),
            Self::Unsubscribe => f.write_str("unsubscribe"),
        }
    }
}

/// Stream topic a subscription refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// A plain named stream such as `public`, `public:local`, `user` or `direct`.
    Stream(String),
    /// Statuses carrying a hashtag, optionally restricted to the local server.
    Hashtag { tag: String, local: bool },
    /// Statuses of a list, by list id.
    List(String),
}

impl Topic {
    pub fn public() -> Self {
        Self::Stream("public".to_string())
    }

    pub fn user() -> Self {
        Self::Stream("user".to_string())
    }

    pub fn hashtag(tag: impl Into<String>) -> Self {
        Self::Hashtag {
            tag: tag.into(),
            local: false,
        }
    }

    pub fn list(list_id: impl Into<String>) -> Self {
        Self::List(list_id.into())
    }

    /// Value of the wire `stream` field.
    pub fn stream_name(&self) -> &str {
        match self {
            Self::Stream(name) => name,
            Self::Hashtag { local: false, .. } => "hashtag",
            Self::Hashtag { local: true, .. } => "hashtag:local",
            Self::List(_) => "list",
        }
    }

    fn validate(&self) -> Result<(), StreamError> {
        let (field, value) = match self {
            Self::Stream(name) => ("stream", name),
            Self::Hashtag { tag, .. } => ("tag", tag),
            Self::List(list_id) => ("list", list_id),
        };
        if value.trim().is_empty() {
            return Err(StreamError::InvalidArgument(format!(
                "subscription {field} must not be empty"
            )));
        }
        Ok(())
    }
}

/// Request to start or stop receiving a topic on an open stream.
#[derive(Clone, Debug)]
pub struct Subscription {
    token: SecretString,
    action: SubscriptionAction,
    topic: Topic,
}

#[derive(Serialize)]
struct SubscriptionMsg<'a> {
    access_token: &'a str,
    #[serde(rename = "type")]
    action: SubscriptionAction,
    stream: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    list: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
}

impl Subscription {
    pub fn new(token: &AccessToken, action: SubscriptionAction, topic: Topic) -> Self {
        Self {
            token: token.secret().clone(),
            action,
            topic,
        }
    }

    pub fn subscribe(token: &AccessToken, topic: Topic) -> Self {
        Self::new(token, SubscriptionAction::Subscribe, topic)
    }

    pub fn unsubscribe(token: &AccessToken, topic: Topic) -> Self {
        Self::new(token, SubscriptionAction::Unsubscribe, topic)
    }

    /// Subscribes to a named stream, e.g. `public` or `user`.
    pub fn subscribe_stream(token: &AccessToken, stream: impl Into<String>) -> Self {
        Self::subscribe(token, Topic::Stream(stream.into()))
    }

    pub fn subscribe_hashtag(token: &AccessToken, tag: impl Into<String>) -> Self {
        Self::subscribe(token, Topic::hashtag(tag))
    }

    pub fn subscribe_list(token: &AccessToken, list_id: impl Into<String>) -> Self {
        Self::subscribe(token, Topic::list(list_id))
    }

    pub fn action(&self) -> SubscriptionAction {
        self.action
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Encodes the subscription as the JSON text the server expects.
    ///
    /// Only the field matching the topic (`list` or `tag`) is emitted.
    pub fn to_text(&self) -> Result<String, StreamError> {
        let access_token = self.token.expose_secret();
        if access_token.trim().is_empty() {
            return Err(StreamError::InvalidArgument(
                "subscription access token must not be empty".to_string(),
            ));
        }
        self.topic.validate()?;

        let (list, tag) = match &self.topic {
            Topic::Stream(_) => (None, None),
            Topic::Hashtag { tag, .. } => (None, Some(tag.as_str())),
            Topic::List(list_id) => (Some(list_id.as_str()), None),
        };
        let message = SubscriptionMsg {
            access_token,
            action: self.action,
            stream: self.topic.stream_name(),
            list,
            tag,
        };
        serde_json::to_string(&message).map_err(StreamError::Encode)
    }
}

/// Known values of an event's kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Update,
    Delete,
    Notification,
    FiltersChanged,
    Conversation,
    Announcement,
    AnnouncementReaction,
    AnnouncementDelete,
    StatusUpdate,
    EncryptedMessage,
    NotificationsMerged,
    Other(String),
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        match value {
            "update" => Self::Update,
            "delete" => Self::Delete,
            "notification" => Self::Notification,
            "filters_changed" => Self::FiltersChanged,
            "conversation" => Self::Conversation,
            "announcement" => Self::Announcement,
            "announcement.reaction" => Self::AnnouncementReaction,
            "announcement.delete" => Self::AnnouncementDelete,
            "status.update" => Self::StatusUpdate,
            "encrypted_message" => Self::EncryptedMessage,
            "notifications_merged" => Self::NotificationsMerged,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One decoded message received over the streaming channel.
///
/// Any JSON object is accepted. `kind` comes from the first string-valued
/// `event` or `kind` key, and `stream` from a string or an array of strings.
/// Every other key, including ones whose values did not fit those fields, is
/// kept in `extra`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Raw event name, empty when the message carried none.
    pub kind: String,
    /// Stream names the event was delivered on.
    pub stream: Vec<String>,
    /// Event payload, `Null` when absent.
    pub payload: Value,
    /// Remaining keys of the message.
    pub extra: Map<String, Value>,
}

impl Event {
    /// Decodes one message; fails only on invalid JSON or a non-object.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Map<String, Value>>(text).map(Self::from_object)
    }

    fn from_object(mut object: Map<String, Value>) -> Self {
        let kind = ["event", "kind"]
            .into_iter()
            .find_map(|key| take_string(&mut object, key))
            .unwrap_or_default();

        let stream = match object.remove("stream") {
            Some(Value::String(name)) => vec![name],
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(name) => Some(name),
                    _ => None,
                })
                .collect(),
            Some(other) => {
                object.insert("stream".to_string(), other);
                Vec::new()
            }
            None => Vec::new(),
        };

        Self {
            kind,
            stream,
            payload: object.remove("payload").unwrap_or(Value::Null),
            extra: object,
        }
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from(self.kind.as_str())
    }

    /// Returns the payload as JSON.
    ///
    /// Mastodon sends most payloads as a JSON document encoded in a string;
    /// those are decoded, anything else is returned as-is.
    pub fn payload_json(&self) -> Result<Value, serde_json::Error> {
        match &self.payload {
            Value::String(text) => serde_json::from_str(text),
            other => Ok(other.clone()),
        }
    }
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    if !object.get(key).is_some_and(Value::is_string) {
        return None;
    }
    match object.remove(key) {
        Some(Value::String(value)) => Some(value),
        _ => None,
    }
}

pub(crate) fn decode_event(text: &str) -> Result<Event, StreamError> {
    Event::from_text(text).map_err(|source| StreamError::Decode {
        source,
        message: text.chars().take(DECODE_SNIPPET_LEN).collect(),
    })
}

//! Message model and the address type shared by messages and threads

use super::ThreadId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a message (provider message id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An email address with optional display name
///
/// Addresses are unique by `email`; the name is whatever was seen last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Format the email address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// Which mailbox view a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailLabel {
    #[default]
    Inbox,
    Sent,
    Draft,
}

impl EmailLabel {
    /// Classify from provider system labels. `sent` beats `draft` beats inbox.
    pub fn classify<S: AsRef<str>>(sys_labels: &[S]) -> Self {
        let has = |needle: &str| {
            sys_labels
                .iter()
                .any(|l| l.as_ref().eq_ignore_ascii_case(needle))
        };

        if has("sent") {
            EmailLabel::Sent
        } else if has("draft") {
            EmailLabel::Draft
        } else {
            EmailLabel::Inbox
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EmailLabel::Inbox => "inbox",
            EmailLabel::Sent => "sent",
            EmailLabel::Draft => "draft",
        }
    }
}

impl std::str::FromStr for EmailLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbox" => Ok(EmailLabel::Inbox),
            "sent" => Ok(EmailLabel::Sent),
            "draft" => Ok(EmailLabel::Draft),
            other => Err(format!("unknown email label: {}", other)),
        }
    }
}

/// A single email message within a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Provider message ID
    pub id: MessageId,
    /// ID of the thread this message belongs to
    pub thread_id: ThreadId,
    pub created_time: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub last_modified_time: DateTime<Utc>,
    /// Subject line
    pub subject: String,
    /// Provider system labels (e.g. "inbox", "unread", "important")
    pub labels: Vec<String>,
    /// Sender
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub reply_to: Vec<EmailAddress>,
    /// Full body, absent until fetched when the provider omitted it
    pub body: Option<String>,
    /// Short provider-generated preview
    pub body_snippet: Option<String>,
    /// Classification derived from the system labels
    pub email_label: EmailLabel,
    /// Message-ID this message replies to
    pub in_reply_to: Option<String>,
    /// RFC 5322 Message-ID header
    pub internet_message_id: Option<String>,
}

impl Message {
    /// Create a new message builder
    pub fn builder(id: MessageId, thread_id: ThreadId) -> MessageBuilder {
        MessageBuilder::new(id, thread_id)
    }

    /// Every address on the message: from, to, cc, bcc and reply-to
    pub fn participants(&self) -> impl Iterator<Item = &EmailAddress> {
        std::iter::once(&self.from)
            .chain(self.to.iter())
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .chain(self.reply_to.iter())
    }

    /// Preview text for the owning thread
    ///
    /// Prefers the provider snippet, falling back to the start of the body.
    pub fn preview(&self) -> String {
        if let Some(snippet) = self.body_snippet.as_deref().filter(|s| !s.trim().is_empty()) {
            return snippet.trim().to_string();
        }

        let Some(body) = self.body.as_deref() else {
            return String::new();
        };

        body.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(PREVIEW_CHARS)
            .collect()
    }
}

/// Length of the body-derived preview
const PREVIEW_CHARS: usize = 200;

/// Builder for creating Message instances
pub struct MessageBuilder {
    id: MessageId,
    thread_id: ThreadId,
    created_time: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    last_modified_time: Option<DateTime<Utc>>,
    subject: String,
    labels: Vec<String>,
    from: Option<EmailAddress>,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    bcc: Vec<EmailAddress>,
    reply_to: Vec<EmailAddress>,
    body: Option<String>,
    body_snippet: Option<String>,
    in_reply_to: Option<String>,
    internet_message_id: Option<String>,
}

impl MessageBuilder {
    fn new(id: MessageId, thread_id: ThreadId) -> Self {
        Self {
            id,
            thread_id,
            created_time: None,
            sent_at: None,
            received_at: None,
            last_modified_time: None,
            subject: String::new(),
            labels: Vec::new(),
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: Vec::new(),
            body: None,
            body_snippet: None,
            in_reply_to: None,
            internet_message_id: None,
        }
    }

    pub fn created_time(mut self, at: DateTime<Utc>) -> Self {
        self.created_time = Some(at);
        self
    }

    pub fn sent_at(mut self, at: DateTime<Utc>) -> Self {
        self.sent_at = Some(at);
        self
    }

    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = Some(at);
        self
    }

    pub fn last_modified_time(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified_time = Some(at);
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn from(mut self, from: EmailAddress) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn bcc(mut self, bcc: Vec<EmailAddress>) -> Self {
        self.bcc = bcc;
        self
    }

    pub fn reply_to(mut self, reply_to: Vec<EmailAddress>) -> Self {
        self.reply_to = reply_to;
        self
    }

    pub fn body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }

    pub fn body_snippet(mut self, snippet: Option<String>) -> Self {
        self.body_snippet = snippet;
        self
    }

    pub fn in_reply_to(mut self, in_reply_to: Option<String>) -> Self {
        self.in_reply_to = in_reply_to;
        self
    }

    pub fn internet_message_id(mut self, id: Option<String>) -> Self {
        self.internet_message_id = id;
        self
    }

    /// Finish the message.
    ///
    /// Unset timestamps collapse onto each other: sent falls back to
    /// received, created to sent, last-modified to created. A message with
    /// neither a receive nor a send time is dated at the Unix epoch, so it
    /// never becomes the head of a thread.
    pub fn build(self) -> Message {
        let received_at = self
            .received_at
            .or(self.sent_at)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let sent_at = self.sent_at.unwrap_or(received_at);
        let created_time = self.created_time.unwrap_or(sent_at);
        let last_modified_time = self.last_modified_time.unwrap_or(created_time);
        let email_label = EmailLabel::classify(&self.labels);

        Message {
            id: self.id,
            thread_id: self.thread_id,
            created_time,
            sent_at,
            received_at,
            last_modified_time,
            subject: self.subject,
            labels: self.labels,
            from: self
                .from
                .unwrap_or_else(|| EmailAddress::new("unknown@unknown.invalid")),
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            reply_to: self.reply_to,
            body: self.body,
            body_snippet: self.body_snippet,
            email_label,
            in_reply_to: self.in_reply_to,
            internet_message_id: self.internet_message_id,
        }
    }
}

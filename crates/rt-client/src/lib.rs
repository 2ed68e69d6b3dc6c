//! Request Tracker REST 1.0 client.
//!
//! # Protocol
//! RT's REST 1.0 interface is line-oriented: requests carry a form-encoded
//! `content` field of `Key: value` lines, responses answer with the same
//! shape. Create and update responses carry a `# Ticket NNN created/updated`
//! line with the assigned id; fetching a missing ticket answers with a
//! `# Ticket NNN does not exist` line instead of fields.
//!
//! [`TicketClient`] is the seam the decision engine consumes; [`RestClient`]
//! talks to a real RT, [`DummyClient`] is the in-memory stand-in for tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RtError {
    #[error("invalid URL '{url}': {reason}")]
    Url { url: String, reason: String },
    #[error("request error: {0}")]
    Http(String),
    #[error("ticket does not exist")]
    NotFound,
    #[error("malformed response: {0}")]
    Protocol(String),
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// A ticket as exchanged with RT.
///
/// `id == 0` marks a draft that has not been assigned an id yet. Empty
/// fields are "unset": they are skipped when encoding, so an update with only
/// `id` and `status` set is a partial update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ticket {
    pub id: i64,
    pub queue: String,
    pub owner: String,
    pub creator: String,
    pub subject: String,
    pub status: String,
    pub priority: String,
    pub requestors: String,
    pub text: String,
}

impl Ticket {
    /// Serialize to the `Key: value` request form.
    fn encode(&self) -> String {
        let mut out = Vec::new();

        if self.id == 0 {
            out.push("id: new".to_owned());
        } else {
            out.push(format!("id: {}", self.id));
        }

        for (key, value) in [
            ("Queue", &self.queue),
            ("Owner", &self.owner),
            ("Subject", &self.subject),
            ("Status", &self.status),
            ("Priority", &self.priority),
            ("Requestors", &self.requestors),
            ("Text", &self.text),
        ] {
            if !value.is_empty() {
                out.push(format!("{key}: {value}"));
            }
        }

        out.join("\n")
    }

    /// Parse a ticket from a fetch response body.
    ///
    /// Unknown keys are skipped. The ticket text is not returned by this
    /// endpoint and stays empty.
    fn decode(body: &str) -> Result<Ticket, RtError> {
        let mut ticket = Ticket::default();

        for line in body.lines() {
            if line.starts_with("# Ticket ") {
                return Err(RtError::NotFound);
            }

            let Some((key, value)) = line.split_once(": ") else {
                continue;
            };

            match key {
                "id" => {
                    let id_str = value.strip_prefix("ticket/").unwrap_or(value);
                    ticket.id = id_str.parse().map_err(|_| {
                        RtError::Protocol(format!("unparsable ticket id: {value:?}"))
                    })?;
                }
                "Queue" => ticket.queue = value.to_owned(),
                "Owner" => ticket.owner = value.to_owned(),
                "Creator" => ticket.creator = value.to_owned(),
                "Subject" => ticket.subject = value.to_owned(),
                "Status" => ticket.status = value.to_owned(),
                "Priority" => ticket.priority = value.to_owned(),
                "Requestors" => ticket.requestors = value.to_owned(),
                _ => {}
            }
        }

        Ok(ticket)
    }
}

/// Extract the assigned ticket id from a create/update response.
///
/// The relevant line reads `# Ticket NNN created.` (or `updated.`).
fn parse_assigned_id(body: &str) -> Result<i64, RtError> {
    for line in body.lines() {
        if !line.starts_with("# Ticket ") {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(RtError::Protocol(
                "response didn't contain ticket number".to_owned(),
            ));
        }

        return fields[2]
            .parse()
            .map_err(|_| RtError::Protocol(format!("unparsable ticket number in {line:?}")));
    }

    Err(RtError::Protocol(
        "response didn't contain ticket number".to_owned(),
    ))
}

// ---------------------------------------------------------------------------
// TicketClient trait
// ---------------------------------------------------------------------------

/// The four ticket operations the decision engine consumes.
#[async_trait]
pub trait TicketClient {
    /// Fetch a ticket by id; errors when it does not exist.
    async fn ticket(&self, id: i64) -> Result<Ticket, RtError>;
    /// Create a ticket from a draft, returning the populated record.
    async fn new_ticket(&self, draft: &Ticket) -> Result<Ticket, RtError>;
    /// Apply a partial update identified by `patch.id`.
    async fn update_ticket(&self, patch: &Ticket) -> Result<Ticket, RtError>;
    /// Append a textual comment to a ticket.
    async fn comment_ticket(&self, id: i64, text: &str) -> Result<(), RtError>;
}

// Clients hand out shared references freely; a borrowed client is as good as
// an owned one.
#[async_trait]
impl<C: TicketClient + Sync> TicketClient for &C {
    async fn ticket(&self, id: i64) -> Result<Ticket, RtError> {
        (**self).ticket(id).await
    }

    async fn new_ticket(&self, draft: &Ticket) -> Result<Ticket, RtError> {
        (**self).new_ticket(draft).await
    }

    async fn update_ticket(&self, patch: &Ticket) -> Result<Ticket, RtError> {
        (**self).update_ticket(patch).await
    }

    async fn comment_ticket(&self, id: i64, text: &str) -> Result<(), RtError> {
        (**self).comment_ticket(id, text).await
    }
}

// ---------------------------------------------------------------------------
// RestClient
// ---------------------------------------------------------------------------

/// REST 1.0 client for a real RT instance.
///
/// Credentials travel as `user`/`pass` query parameters, bodies are
/// form-encoded with a single `content` field.
pub struct RestClient {
    http: reqwest::Client,
    base: reqwest::Url,
    user: String,
    password: String,
}

impl RestClient {
    pub fn new(url: &str, user: &str, password: &str, insecure: bool) -> Result<Self, RtError> {
        let base = reqwest::Url::parse(url).map_err(|e| RtError::Url {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| RtError::Http(e.to_string()))?;

        Ok(RestClient {
            http,
            base,
            user: user.to_owned(),
            password: password.to_owned(),
        })
    }

    /// Build `{base}/REST/1.0/<segments>` with the credential query.
    fn rest_url(&self, segments: &[&str]) -> Result<reqwest::Url, RtError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| RtError::Url {
                url: self.base.to_string(),
                reason: "URL cannot be a base".to_owned(),
            })?
            .pop_if_empty()
            .extend(["REST", "1.0"])
            .extend(segments);
        url.query_pairs_mut()
            .append_pair("user", &self.user)
            .append_pair("pass", &self.password);
        Ok(url)
    }

    async fn get_text(&self, url: reqwest::Url) -> Result<String, RtError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RtError::Http(e.to_string()))?;
        response.text().await.map_err(|e| RtError::Http(e.to_string()))
    }

    async fn post_content(&self, url: reqwest::Url, content: String) -> Result<String, RtError> {
        let response = self
            .http
            .post(url)
            .form(&[("content", content)])
            .send()
            .await
            .map_err(|e| RtError::Http(e.to_string()))?;
        response.text().await.map_err(|e| RtError::Http(e.to_string()))
    }
}

#[async_trait]
impl TicketClient for RestClient {
    async fn ticket(&self, id: i64) -> Result<Ticket, RtError> {
        let url = self.rest_url(&["ticket", &id.to_string()])?;
        let body = self.get_text(url).await?;
        Ticket::decode(&body)
    }

    async fn new_ticket(&self, draft: &Ticket) -> Result<Ticket, RtError> {
        let url = self.rest_url(&["ticket", "new"])?;
        let body = self.post_content(url, draft.encode()).await?;
        let id = parse_assigned_id(&body)?;
        debug!(id, "rt: created ticket");
        self.ticket(id).await
    }

    async fn update_ticket(&self, patch: &Ticket) -> Result<Ticket, RtError> {
        let url = self.rest_url(&["ticket", &patch.id.to_string(), "edit"])?;
        let body = self.post_content(url, patch.encode()).await?;
        let id = parse_assigned_id(&body)?;
        debug!(id, "rt: updated ticket");
        self.ticket(id).await
    }

    async fn comment_ticket(&self, id: i64, text: &str) -> Result<(), RtError> {
        let url = self.rest_url(&["ticket", &id.to_string(), "comment"])?;
        let content = format!("id: {id}\nAction: comment\nText: {text}");
        let body = self.post_content(url, content).await?;
        parse_assigned_id(&body)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DummyClient
// ---------------------------------------------------------------------------

/// Default owner RT assigns to tickets nobody has taken.
const DEFAULT_OWNER: &str = "Nobody";

/// In-memory ticket backend for tests. Ids are indices into the ticket list.
#[derive(Debug, Default)]
pub struct DummyClient {
    tickets: Mutex<Vec<Ticket>>,
    comments: Mutex<Vec<(i64, String)>>,
    writes: AtomicU32,
}

impl DummyClient {
    pub fn new() -> Self {
        DummyClient::default()
    }

    /// Number of mutating backend calls so far (create, update, comment).
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    /// All comments appended so far, as `(ticket id, text)` pairs.
    pub fn comments(&self) -> Vec<(i64, String)> {
        self.comments.lock().unwrap().clone()
    }

    fn index(id: i64) -> Result<usize, RtError> {
        usize::try_from(id).map_err(|_| RtError::NotFound)
    }
}

#[async_trait]
impl TicketClient for DummyClient {
    async fn ticket(&self, id: i64) -> Result<Ticket, RtError> {
        let tickets = self.tickets.lock().unwrap();
        tickets
            .get(Self::index(id)?)
            .cloned()
            .ok_or(RtError::NotFound)
    }

    async fn new_ticket(&self, draft: &Ticket) -> Result<Ticket, RtError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut tickets = self.tickets.lock().unwrap();

        let mut ticket = draft.clone();
        ticket.id = i64::try_from(tickets.len()).expect("ticket count fits i64");
        if ticket.owner.is_empty() {
            ticket.owner = DEFAULT_OWNER.to_owned();
        }
        if ticket.status.is_empty() {
            ticket.status = "new".to_owned();
        }

        tickets.push(ticket.clone());
        Ok(ticket)
    }

    async fn update_ticket(&self, patch: &Ticket) -> Result<Ticket, RtError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut tickets = self.tickets.lock().unwrap();
        let ticket = tickets
            .get_mut(Self::index(patch.id)?)
            .ok_or(RtError::NotFound)?;

        // Partial update: only set fields overwrite.
        for (current, new) in [
            (&mut ticket.queue, &patch.queue),
            (&mut ticket.owner, &patch.owner),
            (&mut ticket.subject, &patch.subject),
            (&mut ticket.status, &patch.status),
            (&mut ticket.priority, &patch.priority),
            (&mut ticket.requestors, &patch.requestors),
            (&mut ticket.text, &patch.text),
        ] {
            if !new.is_empty() {
                current.clone_from(new);
            }
        }

        Ok(ticket.clone())
    }

    async fn comment_ticket(&self, id: i64, text: &str) -> Result<(), RtError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        {
            let tickets = self.tickets.lock().unwrap();
            if tickets.get(Self::index(id)?).is_none() {
                return Err(RtError::NotFound);
            }
        }
        self.comments.lock().unwrap().push((id, text.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DummyClient, RtError, Ticket, TicketClient, parse_assigned_id};

    #[test]
    fn encode_marks_drafts_as_new_and_skips_empty_fields() {
        let draft = Ticket {
            queue: "general".to_owned(),
            subject: "Host: web-01 is CRITICAL".to_owned(),
            text: "Output: connection refused".to_owned(),
            ..Ticket::default()
        };
        assert_eq!(
            draft.encode(),
            "id: new\nQueue: general\nSubject: Host: web-01 is CRITICAL\nText: Output: connection refused"
        );

        let patch = Ticket {
            id: 17,
            status: "deleted".to_owned(),
            ..Ticket::default()
        };
        assert_eq!(patch.encode(), "id: 17\nStatus: deleted");
    }

    #[test]
    fn decode_reads_fields_and_strips_ticket_prefix() {
        let body = "RT/4.4.4 200 Ok\n\nid: ticket/42\nQueue: general\nOwner: Nobody\nStatus: new\nSubject: test\nUnknownKey: ignored\n";
        let ticket = Ticket::decode(body).unwrap();
        assert_eq!(ticket.id, 42);
        assert_eq!(ticket.queue, "general");
        assert_eq!(ticket.owner, "Nobody");
        assert_eq!(ticket.status, "new");
        assert_eq!(ticket.subject, "test");
    }

    #[test]
    fn decode_reports_missing_tickets() {
        let body = "RT/4.4.4 200 Ok\n\n# Ticket 99 does not exist.\n";
        assert!(matches!(Ticket::decode(body), Err(RtError::NotFound)));
    }

    #[test]
    fn assigned_id_is_read_from_the_header_line() {
        let body = "RT/4.4.4 200 Ok\n\n# Ticket 123 created.\n";
        assert_eq!(parse_assigned_id(body).unwrap(), 123);

        assert!(parse_assigned_id("RT/4.4.4 200 Ok\n\nno header\n").is_err());
        assert!(parse_assigned_id("# Ticket created\n").is_err());
    }

    #[tokio::test]
    async fn dummy_assigns_sequential_ids_and_default_owner() {
        let client = DummyClient::new();

        let first = client
            .new_ticket(&Ticket {
                queue: "general".to_owned(),
                ..Ticket::default()
            })
            .await
            .unwrap();
        let second = client.new_ticket(&Ticket::default()).await.unwrap();

        assert_eq!(first.id, 0);
        assert_eq!(second.id, 1);
        assert_eq!(first.owner, "Nobody");
        assert!(matches!(client.ticket(5).await, Err(RtError::NotFound)));
    }

    #[tokio::test]
    async fn dummy_update_is_partial_and_counts_writes() {
        let client = DummyClient::new();
        let created = client
            .new_ticket(&Ticket {
                queue: "general".to_owned(),
                subject: "subject".to_owned(),
                ..Ticket::default()
            })
            .await
            .unwrap();

        let updated = client
            .update_ticket(&Ticket {
                id: created.id,
                status: "deleted".to_owned(),
                ..Ticket::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.status, "deleted");
        assert_eq!(updated.queue, "general", "unset patch fields must survive");
        assert_eq!(updated.subject, "subject");

        client.comment_ticket(created.id, "note").await.unwrap();
        assert_eq!(client.write_count(), 3);
        assert_eq!(client.comments(), vec![(created.id, "note".to_owned())]);
    }
}

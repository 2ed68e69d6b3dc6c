//! Decision engine: drives ticket side effects from incoming notifications.
//!
//! For every notification the engine derives `(state, old state, owned)`
//! from the cache and the ticket backend, picks the first matching rule, and
//! runs its action. The cache is only written after the backend call
//! succeeded, so a failed action leaves everything as it was.

use crate::cache::{Cache, CacheError, fingerprint};
use crate::mapping::{Action, Condition, Mapping};
use icinga_client::{Notification, State};
use rt_client::{RtError, Ticket, TicketClient};
use tracing::debug;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Engine failure, split by recoverability: ticket errors are retryable,
/// cache errors are not.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("ticket backend error: {0}")]
    Ticket(#[from] RtError),
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Ticket subject for a notification.
pub fn format_subject(n: &Notification) -> String {
    let state = n.check_result.state;
    if !n.host.is_empty() && n.service.is_empty() {
        format!("Host: {} is {}", n.host, state)
    } else {
        format!("Host: {} Service: {} is {}", n.host, n.service, state)
    }
}

/// Comment text for a state change.
pub fn format_comment(n: &Notification) -> String {
    let state = n.check_result.state;
    if n.check_result.output.is_empty() {
        state.to_string()
    } else {
        format!("New status: {} Output: {}", state, n.check_result.output)
    }
}

// ---------------------------------------------------------------------------
// TicketUpdater
// ---------------------------------------------------------------------------

/// The engine. Owns the cache; generic over the ticket backend.
pub struct TicketUpdater<C> {
    cache: Cache,
    client: C,
    mappings: Vec<Mapping>,
    nobody: String,
    queue: String,
    closed_status: Vec<String>,
}

impl<C: TicketClient> TicketUpdater<C> {
    pub fn new(
        cache: Cache,
        client: C,
        mappings: Vec<Mapping>,
        nobody: String,
        queue: String,
        closed_status: Vec<String>,
    ) -> Self {
        TicketUpdater {
            cache,
            client,
            mappings,
            nobody,
            queue,
            closed_status,
        }
    }

    /// Process one notification end-to-end.
    pub async fn update(&mut self, n: &Notification) -> Result<(), UpdateError> {
        let fp = format!("{:016x}", fingerprint(n));
        debug!(
            fingerprint = %fp,
            subject = %format_subject(n),
            "ticket updater: new event"
        );

        let mut old_state = State::Nil;
        let mut owned = false;

        if let Some((old_event, ticket_id)) = self.cache.get(n)? {
            if ticket_id != -1 {
                match self.client.ticket(ticket_id).await {
                    Err(e) => {
                        // Stale record: behave as if no prior event existed.
                        debug!(
                            fingerprint = %fp,
                            ticket_id,
                            error = %e,
                            "ticket updater: ticket in cache doesn't exist"
                        );
                    }
                    Ok(ticket) => {
                        old_state = old_event.check_result.state;
                        owned = ticket.owner != self.nobody;

                        if self.closed_status.contains(&ticket.status) {
                            debug!(
                                fingerprint = %fp,
                                ticket_id,
                                status = %ticket.status,
                                "ticket updater: ticket has closed status"
                            );
                            old_state = State::Nil;
                        }
                    }
                }
            }
        }

        let candidate = Condition {
            state: n.check_result.state,
            old_state,
            owned,
        };

        let action = self
            .mappings
            .iter()
            .find(|m| m.condition == candidate)
            .map(|m| m.action.clone());

        let Some(action) = action else {
            debug!(
                fingerprint = %fp,
                state = %candidate.state,
                old_state = %candidate.old_state,
                owned = candidate.owned,
                "ticket updater: no condition matched"
            );
            return Ok(());
        };

        debug!(
            fingerprint = %fp,
            action = ?action,
            "ticket updater: matched"
        );

        match action {
            Action::Ignore => Ok(()),
            Action::Create => self.create(n).await,
            Action::Comment => self.comment(n).await,
            Action::Delete => self.set_status(n, "deleted", true).await,
            Action::Status { target, invalidate } => {
                self.set_status(n, &target, invalidate).await
            }
        }
    }

    /// The ticket id recorded for this fingerprint; stale-record lookups that
    /// raced a delete surface as a backend not-found error.
    fn cached_ticket_id(&self, n: &Notification) -> Result<i64, UpdateError> {
        match self.cache.get(n)? {
            Some((_, ticket_id)) => Ok(ticket_id),
            None => Err(UpdateError::Ticket(RtError::NotFound)),
        }
    }

    async fn create(&mut self, n: &Notification) -> Result<(), UpdateError> {
        let draft = Ticket {
            queue: self.queue.clone(),
            subject: format_subject(n),
            text: format!("Output: {}", n.check_result.output),
            ..Ticket::default()
        };

        let ticket = self.client.new_ticket(&draft).await?;
        debug!(ticket_id = ticket.id, "ticket updater: created ticket");

        self.cache.put(n, ticket.id)?;
        Ok(())
    }

    async fn comment(&mut self, n: &Notification) -> Result<(), UpdateError> {
        let ticket_id = self.cached_ticket_id(n)?;

        self.client
            .comment_ticket(ticket_id, &format_comment(n))
            .await?;
        debug!(ticket_id, "ticket updater: commented ticket");

        self.cache.put(n, ticket_id)?;
        Ok(())
    }

    async fn set_status(
        &mut self,
        n: &Notification,
        target: &str,
        invalidate: bool,
    ) -> Result<(), UpdateError> {
        let ticket_id = self.cached_ticket_id(n)?;

        let patch = Ticket {
            id: ticket_id,
            status: target.to_owned(),
            ..Ticket::default()
        };
        let updated = self.client.update_ticket(&patch).await?;
        debug!(ticket_id = updated.id, status = target, "ticket updater: changed ticket status");

        if invalidate {
            self.cache.delete(n)?;
        } else {
            self.cache.put(n, ticket_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{format_comment, format_subject};
    use icinga_client::{CheckResult, Notification, State};

    fn notification(host: &str, service: &str, state: State, output: &str) -> Notification {
        Notification {
            host: host.to_owned(),
            service: service.to_owned(),
            check_result: CheckResult {
                state,
                output: output.to_owned(),
            },
            ..Notification::default()
        }
    }

    #[test]
    fn subject_names_host_and_service() {
        let n = notification("example.com", "example", State::Critical, "");
        assert_eq!(format_subject(&n), "Host: example.com Service: example is CRITICAL");
    }

    #[test]
    fn subject_for_host_checks_omits_the_service() {
        let n = notification("example.com", "", State::Warning, "");
        assert_eq!(format_subject(&n), "Host: example.com is WARNING");
    }

    #[test]
    fn subject_falls_back_to_the_full_form() {
        let n = notification("", "example", State::Ok, "");
        assert_eq!(format_subject(&n), "Host:  Service: example is OK");
    }

    #[test]
    fn comment_includes_the_output_when_present() {
        let n = notification("example.com", "example", State::Warning, "load is 12.3");
        assert_eq!(format_comment(&n), "New status: WARNING Output: load is 12.3");

        let bare = notification("example.com", "example", State::Ok, "");
        assert_eq!(format_comment(&bare), "OK");
    }
}

//! Consumer loop: decode, resolve, debounce, dispatch

use crate::{
    decode_envelope, ActivityLedger, ChangeEvent, ChangeSource, Decision, DispatchOutcome, Dispatcher,
    JobState, LullError, Operation, RawMessage, Result, TopicTableMapping,
};
use chrono::TimeDelta;
use lull_shared::EventMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Instrument};

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed poll before polling again
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What the orchestrator did with one message
#[derive(Debug)]
pub enum Disposition {
    /// Topic (or table) is not part of the mapping
    UnknownTopic,
    /// Payload could not be decoded
    Malformed,
    /// Tombstone, or an envelope without a recognised operation
    Ignored,
    /// Valid operation that does not count as activity (deletes)
    NonQualifying(Operation),
    Debounced { since_last: TimeDelta },
    Busy(JobState),
    /// Activity recorded; the table has no job configured
    NotDispatchable,
    /// A dispatch was spawned; awaiting the handle is optional
    Dispatching(JoinHandle<DispatchOutcome>),
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::UnknownTopic => "unknown_topic",
            Disposition::Malformed => "malformed",
            Disposition::Ignored => "ignored",
            Disposition::NonQualifying(_) => "non_qualifying",
            Disposition::Debounced { .. } => "debounced",
            Disposition::Busy(_) => "busy",
            Disposition::NotDispatchable => "not_dispatchable",
            Disposition::Dispatching(_) => "dispatching",
        }
    }
}

/// Reacts to change events with at most one dispatch per table per quiet period
pub struct Orchestrator {
    mapping: Arc<TopicTableMapping>,
    ledger: Arc<ActivityLedger>,
    dispatcher: Arc<Dispatcher>,
}

impl Orchestrator {
    pub fn new(mapping: Arc<TopicTableMapping>, ledger: Arc<ActivityLedger>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            mapping,
            ledger,
            dispatcher,
        }
    }

    pub fn mapping(&self) -> &TopicTableMapping {
        &self.mapping
    }

    pub fn ledger(&self) -> &Arc<ActivityLedger> {
        &self.ledger
    }

    /// Resolve and decode a raw message, then handle the resulting event
    #[instrument(skip(self, message), fields(topic = %message.topic, partition = message.partition, offset = message.offset))]
    pub async fn handle_message(&self, message: RawMessage) -> Disposition {
        let Some(table) = self.mapping.table_for(&message.topic) else {
            warn!("Unknown topic");
            EventMetrics::event_dropped("unknown_topic");
            return Disposition::UnknownTopic;
        };

        let Some(bytes) = message.payload.as_deref() else {
            debug!(table = table, "Tombstone ignored");
            return Disposition::Ignored;
        };

        match decode_envelope(bytes) {
            Ok(Some((operation, payload))) => {
                let event = ChangeEvent::new(&message.topic, table, operation, message.received_at)
                    .with_payload(payload);
                self.handle_event(event).await
            }
            Ok(None) => {
                debug!(table = table, "Message without a change operation ignored");
                Disposition::Ignored
            }
            Err(e) => {
                error!(table = table, error = %e, "Error processing message");
                EventMetrics::event_dropped("malformed");
                Disposition::Malformed
            }
        }
    }

    /// Record a decoded event and dispatch when the debounce policy allows it
    pub async fn handle_event(&self, event: ChangeEvent) -> Disposition {
        let table = event.table.as_str();

        if !self.mapping.contains_table(table) {
            warn!(table = table, "Event for untracked table");
            EventMetrics::event_dropped("unknown_table");
            return Disposition::UnknownTopic;
        }
        if !event.operation.is_qualifying() {
            debug!(table = table, op = %event.operation, "Non-qualifying operation");
            return Disposition::NonQualifying(event.operation);
        }

        info!(table = table, op = %event.operation, "Detected operation on table");
        EventMetrics::event_received(table, event.operation.code());

        match self.ledger.observe(table, event.received_at).await {
            Decision::Debounced { since_last } => {
                debug!(
                    table = table,
                    since_last_ms = since_last.num_milliseconds(),
                    "Recent activity detected, skipping job trigger"
                );
                EventMetrics::dispatch(table, "debounced");
                Disposition::Debounced { since_last }
            }
            Decision::Busy(state) => {
                debug!(table = table, state = state.as_str(), "Job already active for table");
                EventMetrics::dispatch(table, "busy");
                Disposition::Busy(state)
            }
            Decision::Eligible if !self.dispatcher.is_dispatchable(table) => {
                info!(table = table, "Table is not dispatchable, activity tracked only");
                EventMetrics::dispatch(table, DispatchOutcome::NotDispatchable.as_str());
                Disposition::NotDispatchable
            }
            Decision::Eligible => {
                info!(table = table, "Triggering streaming job for table");
                let dispatcher = self.dispatcher.clone();
                let table = table.to_string();
                let handle = tokio::spawn(
                    async move { dispatcher.dispatch(&table).await }.in_current_span(),
                );
                Disposition::Dispatching(handle)
            }
        }
    }

    /// Poll `source` until `shutdown` becomes `true` or the source closes.
    ///
    /// Dispatches are spawned and never awaited here, so shutdown does not
    /// wait on an in-flight job runtime invocation.
    pub async fn run<S: ChangeSource>(
        &self,
        mut source: S,
        poll_timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(topics = ?self.mapping.topics(), "Listening for CDC events");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                polled = source.poll(poll_timeout) => polled,
            };

            match polled {
                Ok(Some(message)) => {
                    let disposition = self.handle_message(message).await;
                    debug!(disposition = disposition.as_str(), "Message handled");
                }
                Ok(None) => {}
                Err(LullError::SourceClosed) => {
                    info!("Change source closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Polling the change source failed");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                }
            }
        }

        info!("Orchestrator stopped");
        Ok(())
    }
}

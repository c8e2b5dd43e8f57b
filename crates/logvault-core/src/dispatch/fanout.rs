//! Single-reader message fan-out into per-worker inboxes.
//!
//! Inboxes are unbounded so the reader never waits on a slow job. Every
//! inbox receives exactly one `End` after the last message routed to it.

use crate::format::{Message, MessageStream};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared cancellation flag for a dispatch run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    Complete,
    Aborted(String),
}

pub(crate) enum Envelope {
    Message(Arc<Message>),
    End(StreamEnd),
}

/// A job's view of the fileset's message stream.
///
/// Iteration ends at the end of the stream, or early once the dispatch is
/// cancelled.
pub struct Messages {
    inbox: Receiver<Envelope>,
    cancel: CancelToken,
    end: Option<StreamEnd>,
}

impl Messages {
    pub(crate) fn new(inbox: Receiver<Envelope>, cancel: CancelToken) -> Self {
        Self {
            inbox,
            cancel,
            end: None,
        }
    }

    /// A complete stream over the given messages, for running a job body
    /// outside of a dispatch.
    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let (tx, rx) = unbounded();
        for message in messages {
            let _ = tx.send(Envelope::Message(Arc::new(message)));
        }
        let _ = tx.send(Envelope::End(StreamEnd::Complete));
        Self::new(rx, CancelToken::new())
    }

    /// How the stream ended, once the job has iterated to its end.
    pub fn end(&self) -> Option<&StreamEnd> {
        self.end.as_ref()
    }
}

impl Iterator for Messages {
    type Item = Arc<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end.is_some() {
            return None;
        }
        loop {
            if self.cancel.is_cancelled() {
                self.end = Some(StreamEnd::Aborted("cancelled".to_string()));
                return None;
            }
            match self.inbox.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(Envelope::Message(message)) => return Some(message),
                Ok(Envelope::End(end)) => {
                    self.end = Some(end);
                    return None;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.end = Some(StreamEnd::Aborted("message source went away".to_string()));
                    return None;
                }
            }
        }
    }
}

/// The reader's handle on one worker's inbox.
pub(crate) struct Route {
    pub label: String,
    pub topics: BTreeSet<String>,
    inbox: Sender<Envelope>,
    active: bool,
}

impl Route {
    pub fn new(label: String, topics: BTreeSet<String>, inbox: Sender<Envelope>) -> Self {
        Self {
            label,
            topics,
            inbox,
            active: true,
        }
    }
}

/// Union of the topics every route wants: what the reader has to open.
pub(crate) fn wanted_topics(routes: &[Route]) -> BTreeSet<String> {
    routes
        .iter()
        .flat_map(|route| route.topics.iter().cloned())
        .collect()
}

/// Read the stream once, delivering each message to every interested route.
///
/// A route whose worker has gone away stops receiving; the others are not
/// affected.
pub(crate) fn pump(
    stream: MessageStream<'_>,
    routes: &mut [Route],
    cancel: &CancelToken,
) -> StreamEnd {
    let mut delivered = 0usize;
    for item in stream {
        if cancel.is_cancelled() {
            return StreamEnd::Aborted("cancelled".to_string());
        }
        let message = match item {
            Ok(message) => Arc::new(message),
            Err(err) => return StreamEnd::Aborted(format!("{:#}", err)),
        };
        for route in routes
            .iter_mut()
            .filter(|route| route.active && route.topics.contains(&message.topic))
        {
            if route
                .inbox
                .send(Envelope::Message(Arc::clone(&message)))
                .is_err()
            {
                debug!("{} stopped consuming messages", route.label);
                route.active = false;
            }
        }
        delivered += 1;
    }
    debug!("Fanned out {} messages to {} workers", delivered, routes.len());
    StreamEnd::Complete
}

/// Close every inbox with the same end marker.
pub(crate) fn finish(routes: Vec<Route>, end: &StreamEnd) {
    if let StreamEnd::Aborted(reason) = end {
        warn!("Message stream aborted: {}", reason);
    }
    for route in routes {
        let _ = route.inbox.send(Envelope::End(end.clone()));
    }
}

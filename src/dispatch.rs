//! Deduplicating request queue for the translation worker
//!
//! Every distinct normalized text moves through
//! `Absent → Pending → InFlight → (Resolved | Absent)`:
//!
//! - the first [`DispatchQueue::enqueue`] of a text makes it `Pending` and
//!   appends it to the FIFO
//! - later enqueues of the same text, while `Pending` or `InFlight`, only
//!   add a consumer, so at most one provider call per text is outstanding
//! - [`DispatchQueue::next`] hands the oldest `Pending` text to the worker
//!   and marks it `InFlight`
//! - [`DispatchQueue::complete`] and [`DispatchQueue::fail`] remove the text
//!   entirely; a later occurrence is a brand-new request
//!
//! The queue is plain data: locking is the owner's job.

use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    InFlight,
}

/// One caller waiting for a translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer<H> {
    /// Text exactly as the caller saw it
    pub original: String,
    /// Numbers lifted out of `original`, in placeholder order
    pub numbers: Vec<String>,
    /// Opaque handle passed back on completion
    pub handle: H,
}

impl<H> Consumer<H> {
    pub fn new(original: impl Into<String>, numbers: Vec<String>, handle: H) -> Self {
        Self {
            original: original.into(),
            numbers,
            handle,
        }
    }
}

#[derive(Debug)]
struct PendingRequest<H> {
    state: RequestState,
    own_ui: bool,
    consumers: Vec<Consumer<H>>,
}

/// A text taken off the queue by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dequeued {
    pub text: String,
    pub own_ui: bool,
}

#[derive(Debug)]
pub struct DispatchQueue<H> {
    queue: VecDeque<String>,
    pending: HashMap<String, PendingRequest<H>>,
}

impl<H> Default for DispatchQueue<H> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            pending: HashMap::new(),
        }
    }
}

impl<H> DispatchQueue<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer for `text`
    ///
    /// # Returns
    ///
    /// `true` if this created a new request, `false` if the consumer joined
    /// one already pending or in flight. The own-UI framing of a request is
    /// fixed by its first consumer.
    pub fn enqueue(&mut self, text: &str, consumer: Consumer<H>, own_ui: bool) -> bool {
        if let Some(request) = self.pending.get_mut(text) {
            request.consumers.push(consumer);
            return false;
        }
        self.pending.insert(
            text.to_string(),
            PendingRequest {
                state: RequestState::Pending,
                own_ui,
                consumers: vec![consumer],
            },
        );
        self.queue.push_back(text.to_string());
        true
    }

    /// Take the oldest pending text and mark it in flight
    pub fn next(&mut self) -> Option<Dequeued> {
        while let Some(text) = self.queue.pop_front() {
            if let Some(request) = self.pending.get_mut(&text) {
                request.state = RequestState::InFlight;
                return Some(Dequeued {
                    text,
                    own_ui: request.own_ui,
                });
            }
        }
        None
    }

    /// Finish a request and hand back everyone waiting for it
    pub fn complete(&mut self, text: &str) -> Vec<Consumer<H>> {
        self.pending
            .remove(text)
            .map(|request| request.consumers)
            .unwrap_or_default()
    }

    /// Drop a failed request; the text may be requested again later
    ///
    /// # Returns
    ///
    /// The number of consumers that were waiting. They already hold the
    /// untranslated text, so nothing is delivered to them.
    pub fn fail(&mut self, text: &str) -> usize {
        self.queue.retain(|queued| queued != text);
        self.pending
            .remove(text)
            .map(|request| request.consumers.len())
            .unwrap_or(0)
    }

    /// Original text and numbers of the first consumer of `text`
    pub fn first_consumer(&self, text: &str) -> Option<&Consumer<H>> {
        self.pending.get(text).and_then(|r| r.consumers.first())
    }

    pub fn state(&self, text: &str) -> Option<RequestState> {
        self.pending.get(text).map(|r| r.state)
    }

    /// Texts waiting in the FIFO (not yet in flight)
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Texts pending or in flight
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Consumers sharing one original text, for a single completion callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroup<H> {
    pub original: String,
    pub numbers: Vec<String>,
    pub handles: Vec<H>,
}

/// Group consumers by original text, keeping first-seen order
pub fn group_consumers<H>(consumers: Vec<Consumer<H>>) -> Vec<ConsumerGroup<H>> {
    let mut groups: Vec<ConsumerGroup<H>> = Vec::new();
    for consumer in consumers {
        match groups.iter_mut().find(|g| g.original == consumer.original) {
            Some(group) => group.handles.push(consumer.handle),
            None => groups.push(ConsumerGroup {
                original: consumer.original,
                numbers: consumer.numbers,
                handles: vec![consumer.handle],
            }),
        }
    }
    groups
}

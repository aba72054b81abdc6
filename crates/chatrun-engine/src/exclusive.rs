//! Exclusive execution tags.
//!
//! At most one run holds a tag. Another run asking for the same tag either
//! queues behind the holder or is told the tag is busy.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chatrun_core::RunId;
use tokio::sync::oneshot;
use tracing::debug;

use crate::state::lock;

/// Result of asking for a tag.
#[derive(Debug)]
pub enum Acquire {
    /// The caller now holds the tag.
    Acquired,
    /// The caller is queued; the receiver fires once it holds the tag.
    Queued(oneshot::Receiver<()>),
    /// Another run holds the tag and the caller didn't ask to queue.
    Busy,
}

struct TagState {
    holder: RunId,
    waiters: VecDeque<(RunId, oneshot::Sender<()>)>,
}

/// Table of held tags.
#[derive(Default)]
pub struct ExclusiveLocks {
    tags: Mutex<HashMap<String, TagState>>,
}

impl ExclusiveLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, tag: &str, run: RunId, queue: bool) -> Acquire {
        let mut tags = lock(&self.tags);
        match tags.get_mut(tag) {
            None => {
                tags.insert(
                    tag.to_string(),
                    TagState {
                        holder: run,
                        waiters: VecDeque::new(),
                    },
                );
                Acquire::Acquired
            }
            Some(state) if state.holder == run => Acquire::Acquired,
            Some(state) if queue => {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back((run, tx));
                debug!(tag = %tag, run_id = %run, holder = %state.holder, "Queued for exclusive tag");
                Acquire::Queued(rx)
            }
            Some(_) => Acquire::Busy,
        }
    }

    /// Give up the tag (or a queued claim on it). If `run` held it, the
    /// next live waiter becomes the holder.
    pub fn release(&self, tag: &str, run: RunId) {
        let mut tags = lock(&self.tags);
        let Some(state) = tags.get_mut(tag) else {
            return;
        };
        if state.holder != run {
            state.waiters.retain(|(id, _)| *id != run);
            return;
        }
        while let Some((next, tx)) = state.waiters.pop_front() {
            if tx.send(()).is_ok() {
                state.holder = next;
                debug!(tag = %tag, run_id = %next, "Exclusive tag handed off");
                return;
            }
        }
        tags.remove(tag);
    }

    /// Current holder of `tag`.
    pub fn holder(&self, tag: &str) -> Option<RunId> {
        lock(&self.tags).get(tag).map(|s| s.holder)
    }

    /// Number of runs queued for `tag`.
    pub fn waiting(&self, tag: &str) -> usize {
        lock(&self.tags).get(tag).map_or(0, |s| s.waiters.len())
    }
}

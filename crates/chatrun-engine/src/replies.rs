//! Waiters for `Robot::wait_for_reply`.
//!
//! One waiter per (user, channel). The next message from that user in that
//! channel goes to the waiter instead of normal dispatch.

use std::collections::HashMap;
use std::sync::Mutex;

use chatrun_core::RetVal;
use regex::Regex;
use tokio::sync::oneshot;

use crate::state::lock;

/// Stock reply patterns available to every task.
const STOCK_REPLIES: &[(&str, &str)] = &[
    ("YesNo", r"(?i:yes|no|y|n)"),
    ("Email", r"[\w.+-]+@(?:[\w-]+\.)+[\w-]{2,}"),
    ("Domain", r"(?:[\w-]+\.)+[\w-]{2,}"),
    ("OTP", r"\d{6}"),
    ("IPAddr", r"(?:\d{1,3}\.){3}\d{1,3}"),
    ("SimpleString", r#"[-\w .,'"?!]+"#),
];

/// Pattern for a stock reply ID.
pub fn stock_reply(id: &str) -> Option<&'static str> {
    STOCK_REPLIES
        .iter()
        .find(|(name, _)| *name == id)
        .map(|(_, re)| *re)
}

struct Waiter {
    matcher: Regex,
    tx: oneshot::Sender<(String, RetVal)>,
}

/// Outstanding reply waiters keyed by (user, channel).
#[derive(Default)]
pub struct ReplyWaiters {
    waiters: Mutex<HashMap<(String, String), Waiter>>,
}

impl ReplyWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next message from `user` in `channel`. Returns `None`
    /// if someone is already waiting there.
    pub fn register(
        &self,
        user: &str,
        channel: &str,
        matcher: Regex,
    ) -> Option<oneshot::Receiver<(String, RetVal)>> {
        let key = (user.to_string(), channel.to_string());
        let mut waiters = lock(&self.waiters);
        if waiters.get(&key).is_some_and(|w| !w.tx.is_closed()) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        waiters.insert(key, Waiter { matcher, tx });
        Some(rx)
    }

    /// Remove a waiter, e.g. after a timeout.
    pub fn cancel(&self, user: &str, channel: &str) {
        lock(&self.waiters).remove(&(user.to_string(), channel.to_string()));
    }

    /// Hand `text` to a waiter. Returns true if one consumed it.
    pub fn deliver(&self, user: &str, channel: &str, text: &str) -> bool {
        let waiter = lock(&self.waiters).remove(&(user.to_string(), channel.to_string()));
        let Some(waiter) = waiter else {
            return false;
        };
        let reply = if waiter.matcher.is_match(text) {
            (text.trim().to_string(), RetVal::Ok)
        } else {
            (String::new(), RetVal::ReplyNotMatched)
        };
        waiter.tx.send(reply).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchored(re: &str) -> Regex {
        Regex::new(&format!(r"^\s*{}\s*$", re)).unwrap()
    }

    #[tokio::test]
    async fn test_deliver_matching_reply() {
        let waiters = ReplyWaiters::new();
        let rx = waiters
            .register("alice", "ops", anchored(stock_reply("YesNo").unwrap()))
            .unwrap();
        assert!(waiters.deliver("alice", "ops", " Yes "));
        assert_eq!(rx.await.unwrap(), ("Yes".to_string(), RetVal::Ok));
    }

    #[tokio::test]
    async fn test_non_matching_reply() {
        let waiters = ReplyWaiters::new();
        let rx = waiters
            .register("alice", "ops", anchored(stock_reply("OTP").unwrap()))
            .unwrap();
        assert!(!waiters.deliver("bob", "ops", "123456"));
        assert!(waiters.deliver("alice", "ops", "hello"));
        assert_eq!(rx.await.unwrap().1, RetVal::ReplyNotMatched);
    }

    #[test]
    fn test_one_waiter_per_user_channel() {
        let waiters = ReplyWaiters::new();
        let _rx = waiters.register("alice", "ops", anchored("x")).unwrap();
        assert!(waiters.register("alice", "ops", anchored("y")).is_none());
        assert!(waiters.register("alice", "", anchored("y")).is_some());
        waiters.cancel("alice", "ops");
        assert!(waiters.register("alice", "ops", anchored("z")).is_some());
    }

    #[test]
    fn test_stock_replies_compile() {
        for (name, re) in STOCK_REPLIES {
            assert!(Regex::new(re).is_ok(), "{} should compile", name);
        }
        assert!(stock_reply("Nope").is_none());
    }
}

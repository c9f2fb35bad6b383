//! Retention: per-thread trimming and the owner/index reconciliation sweep

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::{Collections, Store};
use crate::persistence::Collection;

/// Summary of one [`Store::sweep`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub threads_trimmed: usize,
    pub messages_evicted: usize,
    /// Index entries whose owning thread does not reference them
    pub orphans_removed: usize,
    /// Thread references with no matching index entry, or duplicates
    pub dangling_refs_removed: usize,
    /// Index entries re-attached to their owning thread by [`Store::repair`]
    pub refs_restored: usize,
}

impl SweepReport {
    pub fn changed(&self) -> bool {
        self.messages_evicted > 0
            || self.orphans_removed > 0
            || self.dangling_refs_removed > 0
            || self.refs_restored > 0
    }
}

impl Collections {
    /// Reference every indexed message from its owning thread, oldest first
    fn restore_references(&mut self, cap: usize) -> usize {
        let mut missing: Vec<(i64, String, String)> = self
            .messages
            .iter()
            .filter(|(id, message)| {
                !self
                    .chats
                    .get(&message.thread_key)
                    .is_some_and(|thread| thread.contains(id))
            })
            .map(|(id, message)| (message.timestamp, id.clone(), message.thread_key.clone()))
            .collect();
        missing.sort();

        let restored = missing.len();
        for (_, id, key) in missing {
            self.attach_to_thread(&key, id, cap);
        }
        restored
    }

    fn reconcile(&mut self, report: &mut SweepReport) {
        let Collections { chats, messages, .. } = self;

        let referenced: HashMap<&str, HashSet<&str>> = chats
            .iter()
            .map(|(key, thread)| (key.as_str(), thread.message_ids().collect()))
            .collect();

        let orphans: Vec<String> = messages
            .iter()
            .filter(|(id, message)| {
                !referenced
                    .get(message.thread_key.as_str())
                    .is_some_and(|ids| ids.contains(id.as_str()))
            })
            .map(|(id, _)| id.clone())
            .collect();
        drop(referenced);

        for id in &orphans {
            messages.remove(id);
        }
        report.orphans_removed = orphans.len();

        for (key, thread) in chats.iter_mut() {
            let before = thread.len();
            let mut seen = HashSet::new();
            thread.retain(|id| {
                messages.get(id).is_some_and(|m| &m.thread_key == key) && seen.insert(id.clone())
            });
            report.dangling_refs_removed += before - thread.len();
        }
    }
}

impl Store {
    /// Trim one thread to `max_length`, oldest first
    ///
    /// Returns the removed ids; their index entries are deleted as well.
    pub fn trim(&self, thread_key: &str, max_length: usize) -> Vec<String> {
        let removed = self.write().trim_thread(thread_key, max_length);
        if !removed.is_empty() {
            debug!("Trimmed {} message(s) from {}", removed.len(), thread_key);
            self.signal_data(&[Collection::Messages, Collection::Chats]);
        }
        removed
    }

    /// Trim every thread to `max_length` and reconcile threads with the index
    ///
    /// Leaves every thread reference with an index entry owned by that thread,
    /// and every index entry referenced by its owner exactly once.
    pub fn sweep(&self, max_length: usize) -> SweepReport {
        let mut report = SweepReport::default();
        {
            let mut collections = self.write();
            let keys: Vec<String> = collections.chats.keys().cloned().collect();
            for key in keys {
                let removed = collections.trim_thread(&key, max_length);
                if !removed.is_empty() {
                    report.threads_trimmed += 1;
                    report.messages_evicted += removed.len();
                }
            }
            collections.reconcile(&mut report);
        }

        if report.changed() {
            info!(
                "Retention sweep: trimmed {} thread(s), evicted {} message(s), removed {} orphan(s) and {} dangling reference(s)",
                report.threads_trimmed,
                report.messages_evicted,
                report.orphans_removed,
                report.dangling_refs_removed
            );
            self.signal_data(&[Collection::Messages, Collection::Chats]);
        } else {
            debug!("Retention sweep: nothing to do");
        }
        report
    }
}

impl Store {
    /// Re-attach index entries their thread lost, then reconcile
    ///
    /// Used after loading, where `messages` and `chats` may come from
    /// different points in time. Unlike [`Store::sweep`], an index entry whose
    /// thread forgot it is kept rather than dropped.
    pub fn repair(&self) -> SweepReport {
        let restored = self.write().restore_references(self.thread_cap);
        let mut report = self.sweep(self.thread_cap);
        report.refs_restored = restored;

        if restored > 0 {
            info!("Restored {} thread reference(s)", restored);
            self.signal_data(&[Collection::Messages, Collection::Chats]);
        }
        report
    }
}

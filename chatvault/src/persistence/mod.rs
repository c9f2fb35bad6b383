//! Persistence for the store
//!
//! Four named records live under the data directory, one JSON file each:
//! `contacts`, `chats`, `messages` and `meta`. Writes go through a
//! [`DurableSink`], scheduled by a [`scheduler::FlushScheduler`], and are read
//! back once at startup by [`bootstrap::load_all`].
//!
//! Nothing in here holds domain data. Schedulers pull serialized bytes from a
//! [`SnapshotSource`] at flush time and hand them to the sink.

pub mod backup;
pub mod bootstrap;
pub mod scheduler;
pub mod writer;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::error::Result;

/// One persisted record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Contacts,
    Chats,
    Messages,
    Meta,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Contacts,
        Collection::Chats,
        Collection::Messages,
        Collection::Meta,
    ];

    /// Records flushed by the data group (meta has its own group)
    pub const DATA: [Collection; 3] = [
        Collection::Contacts,
        Collection::Chats,
        Collection::Messages,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Contacts => "contacts",
            Self::Chats => "chats",
            Self::Messages => "messages",
            Self::Meta => "meta",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.json", self.name())
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Contacts => 0,
            Self::Chats => 1,
            Self::Messages => 2,
            Self::Meta => 3,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Destination for serialized records
///
/// Called from a blocking thread; implementations may do synchronous I/O.
pub trait DurableSink: Send + Sync {
    fn write(&self, collection: Collection, bytes: &[u8]) -> Result<()>;
}

/// Produces the current serialized content of a record
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self, collection: Collection) -> Result<Vec<u8>>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory sink used by scheduler and store tests

    use std::sync::Mutex;

    use super::{Collection, DurableSink};
    use crate::types::error::{Result, VaultError};

    #[derive(Default)]
    pub struct RecordingSink {
        writes: Mutex<Vec<(Collection, Vec<u8>)>>,
        failing: Mutex<Vec<Collection>>,
    }

    impl RecordingSink {
        pub fn writes(&self) -> Vec<(Collection, Vec<u8>)> {
            self.writes.lock().unwrap().clone()
        }

        pub fn count(&self, collection: Collection) -> usize {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _)| *c == collection)
                .count()
        }

        pub fn last(&self, collection: Collection) -> Option<Vec<u8>> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(c, _)| *c == collection)
                .map(|(_, bytes)| bytes.clone())
        }

        pub fn fail_on(&self, collection: Collection) {
            self.failing.lock().unwrap().push(collection);
        }

        pub fn recover(&self) {
            self.failing.lock().unwrap().clear();
        }
    }

    impl DurableSink for RecordingSink {
        fn write(&self, collection: Collection, bytes: &[u8]) -> Result<()> {
            if self.failing.lock().unwrap().contains(&collection) {
                return Err(VaultError::Persistence(format!("{}: simulated failure", collection)));
            }
            self.writes.lock().unwrap().push((collection, bytes.to_vec()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        let names: Vec<_> = Collection::ALL.iter().map(|c| c.file_name()).collect();
        assert_eq!(names, vec!["contacts.json", "chats.json", "messages.json", "meta.json"]);
        assert!(!Collection::DATA.contains(&Collection::Meta));
        assert_eq!(serde_json::to_string(&Collection::Chats).unwrap(), "\"chats\"");
    }
}

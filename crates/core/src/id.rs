// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job id generation

use crate::job::JobId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Length of the random part of a generated job id
const SHORT_ID_LEN: usize = 12;

/// Generates job identifiers
pub trait IdGen: Clone + Send + Sync + 'static {
    fn next(&self) -> JobId;
}

/// UUID-based generator for production use.
///
/// Ids are the first 12 hex digits of a v4 UUID, short enough to type on
/// the command line.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn next(&self) -> JobId {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        JobId::new(&simple[..SHORT_ID_LEN])
    }
}

/// Sequential generator for testing
#[derive(Clone, Debug)]
pub struct SequentialIdGen {
    prefix: String,
    counter: Arc<AtomicU64>,
}

impl SequentialIdGen {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for SequentialIdGen {
    fn default() -> Self {
        Self::new("job")
    }
}

impl IdGen for SequentialIdGen {
    fn next(&self) -> JobId {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        JobId::new(format!("{}-{}", self.prefix, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_gen_creates_short_unique_ids() {
        let id_gen = UuidIdGen;
        let id1 = id_gen.next();
        let id2 = id_gen.next();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), SHORT_ID_LEN);
    }

    #[test]
    fn sequential_gen_is_shared_across_clones() {
        let id_gen1 = SequentialIdGen::new("exp");
        let id_gen2 = id_gen1.clone();
        assert_eq!(id_gen1.next().as_str(), "exp-1");
        assert_eq!(id_gen2.next().as_str(), "exp-2");
        assert_eq!(id_gen1.next().as_str(), "exp-3");
    }
}

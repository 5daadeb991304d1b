//! Lazy iteration over the sharded object space.
//!
//! Both backends lay objects out as `objects/<shard>/<key>`; iteration lists
//! the shards actually present in sorted order, then each shard's keys in
//! sorted order, which yields objects in ascending SHA-1 order overall.

use std::sync::Arc;

use async_trait::async_trait;

use crate::object::Object;
use crate::store::{Error, TypeHint};

/// Backend access the iterator needs: sorted listings plus point reads.
#[async_trait]
pub trait ShardRead: Send + Sync {
    /// The shard names present, sorted ascending.
    async fn shards(&self) -> Result<Vec<String>, Error>;
    /// The keys present in `shard`, sorted ascending.
    async fn keys(&self, shard: &str) -> Result<Vec<String>, Error>;
    /// Load and decode the object at `shard`/`key`.
    async fn load(&self, shard: &str, key: &str) -> Result<Object, Error>;
}

enum State {
    Unstarted,
    Walking {
        shards: Vec<String>,
        shard: usize,
        keys: Option<Vec<String>>,
        key: usize,
    },
    Exhausted,
}

/// A lazy, restartable-by-reconstruction object iterator.
///
/// Listings are fetched on demand: nothing is read until the first
/// [`ObjectIter::next`]. Not thread-safe; an error ends the iteration.
pub struct ObjectIter {
    src: Arc<dyn ShardRead>,
    hint: TypeHint,
    state: State,
}

impl ObjectIter {
    /// Build an iterator over `src`, filtered by `hint`.
    pub fn new(src: Arc<dyn ShardRead>, hint: TypeHint) -> Self {
        ObjectIter {
            src,
            hint,
            state: State::Unstarted,
        }
    }

    /// The next matching object, or `None` once the space is exhausted.
    pub async fn next(&mut self) -> Result<Option<Object>, Error> {
        loop {
            match std::mem::replace(&mut self.state, State::Exhausted) {
                State::Unstarted => {
                    let shards = self.src.shards().await?;
                    self.state = State::Walking {
                        shards,
                        shard: 0,
                        keys: None,
                        key: 0,
                    };
                }
                State::Walking {
                    shards,
                    shard,
                    mut keys,
                    mut key,
                } => {
                    if shard >= shards.len() {
                        return Ok(None);
                    }
                    if keys.is_none() {
                        keys = Some(self.src.keys(&shards[shard]).await?);
                        key = 0;
                    }
                    let loaded = keys.as_ref().expect("listed above");
                    if key >= loaded.len() {
                        self.state = State::Walking {
                            shards,
                            shard: shard + 1,
                            keys: None,
                            key: 0,
                        };
                        continue;
                    }
                    let object = self.src.load(&shards[shard], &loaded[key]).await?;
                    self.state = State::Walking {
                        shards,
                        shard,
                        keys,
                        key: key + 1,
                    };
                    if self.hint.matches(object.kind) {
                        return Ok(Some(object));
                    }
                }
                State::Exhausted => return Ok(None),
            }
        }
    }

    /// Drain the iterator into a vector.
    pub async fn collect(mut self) -> Result<Vec<Object>, Error> {
        let mut out = Vec::new();
        while let Some(object) = self.next().await? {
            out.push(object);
        }
        Ok(out)
    }
}

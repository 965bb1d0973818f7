//! Coalesces the separate updates of a Telegram album into one group.
//!
//! Telegram delivers every item of a media group as its own channel post.
//! Posts are buffered per media-group id and released once the group has
//! been quiet for `group_idle`; a background loop polls for ready groups.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, Instrument, Span};

use crate::telegram::IncomingPost;

/// Receives one flushed group, posts in arrival order.
pub type FlushFn = Arc<dyn Fn(Vec<IncomingPost>) -> BoxFuture<'static, ()> + Send + Sync>;

struct UpdateGroup {
    updates: Vec<IncomingPost>,
    /// Opening order; groups are released oldest first.
    seq: u64,
    opened_at: Instant,
    /// Last append.
    timestamp: Instant,
}

#[derive(Default)]
struct Groups {
    pending: HashMap<String, UpdateGroup>,
    next_seq: u64,
}

impl Groups {
    fn take(&mut self, ids: Vec<String>) -> Vec<Vec<IncomingPost>> {
        let mut groups: Vec<UpdateGroup> = ids
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .collect();
        groups.sort_by_key(|g| g.seq);
        groups.into_iter().map(|g| g.updates).collect()
    }
}

pub struct MediaGroupBatcher {
    groups: Mutex<Groups>,
    group_idle: Duration,
    span: Span,
}

impl MediaGroupBatcher {
    pub fn new(group_idle: Duration, span: Span) -> Self {
        Self {
            groups: Mutex::new(Groups::default()),
            group_idle,
            span,
        }
    }

    /// Buffer a grouped post. A post without a media-group id is handed back.
    pub async fn append(&self, post: IncomingPost) -> Result<(), IncomingPost> {
        self.append_at(post, Instant::now()).await
    }

    pub async fn append_at(&self, post: IncomingPost, now: Instant) -> Result<(), IncomingPost> {
        let Some(group_id) = post.media_group_id.clone() else {
            return Err(post);
        };

        let mut guard = self.groups.lock().await;
        let groups = &mut *guard;
        let seq = groups.next_seq;
        match groups.pending.get_mut(&group_id) {
            Some(group) => {
                group.updates.push(post);
                group.timestamp = now;
                debug!(
                    parent: &self.span,
                    "Media group {} now has {} posts",
                    group_id,
                    group.updates.len()
                );
            }
            None => {
                debug!(parent: &self.span, "Opening media group {}", group_id);
                groups.next_seq += 1;
                groups.pending.insert(
                    group_id,
                    UpdateGroup {
                        updates: vec![post],
                        seq,
                        opened_at: now,
                        timestamp: now,
                    },
                );
            }
        }
        Ok(())
    }

    /// Remove every group that has been idle for at least `group_idle`.
    pub async fn drain_ready(&self, now: Instant) -> Vec<Vec<IncomingPost>> {
        let mut groups = self.groups.lock().await;
        let ready: Vec<String> = groups
            .pending
            .iter()
            .filter(|(_, g)| now.saturating_duration_since(g.timestamp) >= self.group_idle)
            .map(|(id, g)| {
                debug!(
                    parent: &self.span,
                    "Media group {} ready after {:?}",
                    id,
                    now.saturating_duration_since(g.opened_at)
                );
                id.clone()
            })
            .collect();
        groups.take(ready)
    }

    /// Remove every pending group regardless of age (shutdown).
    pub async fn drain_all(&self) -> Vec<Vec<IncomingPost>> {
        let mut groups = self.groups.lock().await;
        let all: Vec<String> = groups.pending.keys().cloned().collect();
        groups.take(all)
    }

    #[cfg(test)]
    pub async fn pending(&self) -> usize {
        self.groups.lock().await.pending.len()
    }

    /// Poll for ready groups every `interval` and hand them to `flush` one at a
    /// time. The lock is released before `flush` runs.
    pub fn spawn_flush_loop(self: &Arc<Self>, interval: Duration, flush: FlushFn) -> FlushLoop {
        let batcher = Arc::clone(self);
        let span = self.span.clone();
        let stop = Arc::new(Notify::new());
        let stopped = Arc::clone(&stop);
        let handle = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    // Only the wait is interruptible; a drained group is always flushed.
                    tokio::select! {
                        biased;

                        _ = stopped.notified() => break,
                        _ = ticker.tick() => {}
                    }
                    for group in batcher.drain_ready(Instant::now()).await {
                        flush(group).await;
                    }
                }
                debug!("Flush loop stopped");
            }
            .instrument(span),
        );
        FlushLoop { stop, handle }
    }
}

/// Handle to the background flush task.
pub struct FlushLoop {
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl FlushLoop {
    /// Stop polling and wait for any flush in progress to finish.
    pub async fn stop(self) -> Result<(), JoinError> {
        self.stop.notify_one();
        self.handle.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grouped(id: i32, group: &str) -> IncomingPost {
        IncomingPost {
            chat_id: -100,
            message_id: id,
            media_group_id: Some(group.to_string()),
            ..Default::default()
        }
    }

    fn ids(group: &[IncomingPost]) -> Vec<i32> {
        group.iter().map(|p| p.message_id).collect()
    }

    fn batcher() -> MediaGroupBatcher {
        MediaGroupBatcher::new(Duration::from_secs(3), Span::none())
    }

    #[tokio::test]
    async fn test_rejects_ungrouped_post() {
        let b = batcher();
        let post = IncomingPost {
            message_id: 5,
            ..Default::default()
        };
        let rejected = b.append(post).await.unwrap_err();
        assert_eq!(rejected.message_id, 5);
        assert_eq!(b.pending().await, 0);
    }

    #[tokio::test]
    async fn test_burst_flushes_as_one_group_in_order() {
        let b = batcher();
        let t0 = Instant::now();
        b.append_at(grouped(1, "g"), t0).await.unwrap();
        b.append_at(grouped(2, "g"), t0 + Duration::from_secs(1)).await.unwrap();
        b.append_at(grouped(3, "g"), t0 + Duration::from_secs(2)).await.unwrap();

        // Not idle long enough since the last append.
        assert!(b.drain_ready(t0 + Duration::from_secs(4)).await.is_empty());

        let ready = b.drain_ready(t0 + Duration::from_secs(5)).await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ids(&ready[0]), vec![1, 2, 3]);
        assert_eq!(b.pending().await, 0);
    }

    #[tokio::test]
    async fn test_late_update_opens_new_group() {
        let b = batcher();
        let t0 = Instant::now();
        b.append_at(grouped(1, "g"), t0).await.unwrap();
        let first = b.drain_ready(t0 + Duration::from_secs(3)).await;
        assert_eq!(ids(&first[0]), vec![1]);

        b.append_at(grouped(2, "g"), t0 + Duration::from_secs(4)).await.unwrap();
        assert!(b.drain_ready(t0 + Duration::from_secs(4)).await.is_empty());
        let second = b.drain_ready(t0 + Duration::from_secs(7)).await;
        assert_eq!(ids(&second[0]), vec![2]);
    }

    #[tokio::test]
    async fn test_groups_released_oldest_first() {
        let b = batcher();
        let t0 = Instant::now();
        b.append_at(grouped(10, "b"), t0).await.unwrap();
        b.append_at(grouped(20, "a"), t0).await.unwrap();
        b.append_at(grouped(30, "c"), t0 + Duration::from_secs(10)).await.unwrap();

        let ready = b.drain_ready(t0 + Duration::from_secs(3)).await;
        assert_eq!(ready.len(), 2);
        assert_eq!(ids(&ready[0]), vec![10]);
        assert_eq!(ids(&ready[1]), vec![20]);
        assert_eq!(b.pending().await, 1);
    }

    #[tokio::test]
    async fn test_drain_all_ignores_idle_window() {
        let b = batcher();
        let t0 = Instant::now();
        b.append_at(grouped(1, "x"), t0).await.unwrap();
        b.append_at(grouped(2, "y"), t0).await.unwrap();

        let all = b.drain_all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(b.pending().await, 0);
    }

    #[tokio::test]
    async fn test_flush_loop_delivers_group() {
        let b = Arc::new(MediaGroupBatcher::new(
            Duration::from_millis(50),
            Span::none(),
        ));
        let flushed: Arc<Mutex<Vec<Vec<i32>>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&flushed);
        let flush: FlushFn = Arc::new(move |group: Vec<IncomingPost>| -> BoxFuture<'static, ()> {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().await.push(group.iter().map(|p| p.message_id).collect());
            })
        });
        let handle = b.spawn_flush_loop(Duration::from_millis(10), flush);

        b.append(grouped(1, "album")).await.unwrap();
        b.append(grouped(2, "album")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.stop().await.unwrap();

        let flushed = flushed.lock().await;
        assert_eq!(flushed.as_slice(), &[vec![1, 2]]);
    }

    #[tokio::test]
    async fn test_stop_waits_for_flush_in_progress() {
        let b = Arc::new(MediaGroupBatcher::new(Duration::ZERO, Span::none()));
        b.append(grouped(1, "first")).await.unwrap();
        b.append(grouped(2, "second")).await.unwrap();

        let flushed: Arc<Mutex<Vec<Vec<i32>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&flushed);
        let flush: FlushFn = Arc::new(move |group: Vec<IncomingPost>| -> BoxFuture<'static, ()> {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                sink.lock().await.push(group.iter().map(|p| p.message_id).collect());
            })
        });
        let handle = b.spawn_flush_loop(Duration::from_millis(10), flush);

        // Both groups are drained on the first tick; stop while the first flush sleeps.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await.unwrap();

        let flushed = flushed.lock().await;
        assert_eq!(flushed.as_slice(), &[vec![1], vec![2]]);
        assert_eq!(b.pending().await, 0);
    }

    #[tokio::test]
    async fn test_stop_leaves_unready_groups_for_drain_all() {
        let b = Arc::new(MediaGroupBatcher::new(Duration::from_secs(60), Span::none()));
        let flush: FlushFn =
            Arc::new(|_group: Vec<IncomingPost>| -> BoxFuture<'static, ()> { Box::pin(async {}) });
        let handle = b.spawn_flush_loop(Duration::from_millis(10), flush);

        b.append(grouped(1, "late")).await.unwrap();
        handle.stop().await.unwrap();

        let rest = b.drain_all().await;
        assert_eq!(rest.len(), 1);
        assert_eq!(ids(&rest[0]), vec![1]);
    }
}

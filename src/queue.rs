/**
 * Copyright (c) 2024-2025 ArcX, Inc.
 *
 * This file is part of ArcX Gateway
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::jsonrpc::RequestObject;

/// Priority class a request is enqueued under, ranked highest-served first.
/// `spec.md` §3: new work outranks retries so one bad proxy can't starve
/// fresh traffic; prefetches are preferred over explicit fetches among new
/// work because a completed prefetch can satisfy a later fetch for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
    Prefetch,
    Fetch,
    Neutral,
    FailingNeutral,
    FailingPrefetch,
    FailingFetch,
}

impl PriorityClass {
    fn rank(self) -> u8 {
        match self {
            PriorityClass::Prefetch => 0,
            PriorityClass::Fetch => 1,
            PriorityClass::Neutral => 2,
            PriorityClass::FailingNeutral => 3,
            PriorityClass::FailingPrefetch => 4,
            PriorityClass::FailingFetch => 5,
        }
    }

    /// classify the method/retry state of a request into its priority class.
    pub fn classify(method: &str, failing: bool) -> Self {
        match (method, failing) {
            ("prefetch", false) => PriorityClass::Prefetch,
            ("prefetch", true) => PriorityClass::FailingPrefetch,
            ("fetch", false) => PriorityClass::Fetch,
            ("fetch", true) => PriorityClass::FailingFetch,
            (_, false) => PriorityClass::Neutral,
            (_, true) => PriorityClass::FailingNeutral,
        }
    }

    /// the class a request falls back to once it has failed under a proxy.
    pub fn downgrade(self) -> Self {
        match self {
            PriorityClass::Prefetch => PriorityClass::FailingPrefetch,
            PriorityClass::Fetch => PriorityClass::FailingFetch,
            PriorityClass::Neutral => PriorityClass::FailingNeutral,
            already_failing => already_failing,
        }
    }
}

pub struct QueueEntry {
    pub class: PriorityClass,
    pub seq: u64,
    pub request: RequestObject,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.class.rank() == other.class.rank() && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

// BinaryHeap is a max-heap; invert rank and seq so the *lowest* rank and
// *earliest* seq pop first (FIFO within a class, highest-ranked class wins).
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .class
            .rank()
            .cmp(&self.class.rank())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// FIFO-within-priority queue of pending RPC requests, drained by idle Proxy
/// Workers. An entry is in the queue or in the in-flight map, never both.
pub struct PriorityQueue {
    heap: Mutex<BinaryHeap<QueueEntry>>,
    notify: Notify,
    seq: AtomicU64,
    max_len: usize,
}

impl PriorityQueue {
    pub fn new(max_len: usize) -> Self {
        PriorityQueue {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            max_len,
        }
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, AtomicOrdering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_len
    }

    /// Non-blocking enqueue. Callers must check `is_full` first if they want
    /// to fail fast on back-pressure (see `ServerFrame::put_request`).
    pub fn push(&self, class: PriorityClass, seq: u64, request: RequestObject) {
        self.heap.lock().unwrap().push(QueueEntry {
            class,
            seq,
            request,
        });
        self.notify.notify_one();
    }

    /// Blocks until a request is available, then returns the highest
    /// priority one. Ties within a class resolve in `put_request` order.
    pub async fn recv(&self) -> QueueEntry {
        loop {
            if let Some(entry) = self.heap.lock().unwrap().pop() {
                return entry;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(method: &str) -> RequestObject {
        serde_json::from_value(json!({"id": "x", "method": method, "params": {}})).unwrap()
    }

    #[tokio::test]
    async fn prefetch_beats_fetch() {
        let q = PriorityQueue::new(100);
        let s1 = q.next_seq();
        q.push(PriorityClass::Fetch, s1, req("fetch"));
        let s2 = q.next_seq();
        q.push(PriorityClass::Prefetch, s2, req("prefetch"));

        let first = q.recv().await;
        assert_eq!(first.request.method, "prefetch");
        let second = q.recv().await;
        assert_eq!(second.request.method, "fetch");
    }

    #[tokio::test]
    async fn fifo_within_class() {
        let q = PriorityQueue::new(100);
        for i in 0..3 {
            let s = q.next_seq();
            let mut r = req("fetch");
            r.params = json!({"n": i});
            q.push(PriorityClass::Fetch, s, r);
        }
        for i in 0..3 {
            let e = q.recv().await;
            assert_eq!(e.request.params["n"], i);
        }
    }

    #[tokio::test]
    async fn failing_fetch_is_lowest() {
        let q = PriorityQueue::new(100);
        let s1 = q.next_seq();
        q.push(PriorityClass::FailingFetch, s1, req("fetch"));
        let s2 = q.next_seq();
        q.push(PriorityClass::Neutral, s2, req("other"));

        let first = q.recv().await;
        assert_eq!(first.request.method, "other");
    }
}

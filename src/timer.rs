// src/timer.rs
use std::cell::Cell;
use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::Instant;

/// Idle-connection timeout in milliseconds, also advertised in the
/// `Keep-Alive` response header.
pub const TIMEOUT_DEFAULT: u64 = 500;

/// Cancellation handle held by the connection that owns the timer.
///
/// Cancelling is an O(1) tombstone: the heap entry stays in place and is
/// skipped when it reaches the root. Connection timers are reset on every
/// I/O event; tombstones are bounded by the live connection count.
pub struct TimerHandle {
    cancelled: Rc<Cell<bool>>,
}

impl TimerHandle {
    pub fn cancel(self) {
        self.cancelled.set(true);
    }
}

struct Entry {
    deadline: u64,
    seq: u64,
    token: usize,
    cancelled: Rc<Cell<bool>>,
}

// Ordered by (deadline, seq); seq keeps equal deadlines deterministic.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// Min-heap of idle deadlines with lazy deletion.
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    epoch: Instant,
    seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            epoch: Instant::now(),
            seq: 0,
        }
    }

    /// Milliseconds since the queue was created.
    pub fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Arm a timer for `token`, due in `timeout_ms`.
    pub fn schedule(&mut self, token: usize, timeout_ms: u64) -> TimerHandle {
        let now = self.now();
        self.schedule_at(token, now + timeout_ms)
    }

    /// Arm a timer with an explicit deadline (exposed for tests).
    pub fn schedule_at(&mut self, token: usize, deadline: u64) -> TimerHandle {
        let cancelled = Rc::new(Cell::new(false));
        self.seq += 1;
        self.heap.push(Reverse(Entry {
            deadline,
            seq: self.seq,
            token,
            cancelled: Rc::clone(&cancelled),
        }));
        TimerHandle { cancelled }
    }

    /// Poll timeout for the reactor: milliseconds until the next live
    /// deadline (clamped to >= 0), or -1 when no timers are armed.
    /// Tombstones encountered at the root are discarded here.
    pub fn next_timeout(&mut self) -> i32 {
        let now = self.now();
        self.next_timeout_at(now)
    }

    pub fn next_timeout_at(&mut self, now: u64) -> i32 {
        while let Some(Reverse(root)) = self.heap.peek() {
            if root.cancelled.get() {
                self.heap.pop();
                continue;
            }
            return root.deadline.saturating_sub(now).min(i32::MAX as u64) as i32;
        }
        -1
    }

    /// Pop every entry due at `now` or earlier, invoking `on_expire` for the
    /// live ones. Each entry fires at most once; the reactor's closure is
    /// responsible for closing the idle connection.
    pub fn expire(&mut self, on_expire: impl FnMut(usize)) {
        let now = self.now();
        self.expire_at(now, on_expire);
    }

    pub fn expire_at(&mut self, now: u64, mut on_expire: impl FnMut(usize)) {
        while let Some(Reverse(root)) = self.heap.peek() {
            if root.deadline > now {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                if !entry.cancelled.get() {
                    on_expire(entry.token);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

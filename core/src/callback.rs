//! Callback records and the per-sequence queue type.
//!
//! A record is owned by exactly one sequence at a time. Ownership moves
//! `incoming -> current -> done` by splicing whole lists, and the record is
//! consumed by its invocation, which is what makes exactly-once structural
//! rather than something the engine has to police.

use alloc::boxed::Box;
use alloc::collections::LinkedList;
use core::fmt;
use core::mem;

/// A single deferred action.
pub struct Callback {
    func: Box<dyn FnOnce() + Send>,
}

impl Callback {
    /// Wrap an action for deferred invocation.
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }

    /// Invoke the action, consuming the record.
    pub fn invoke(self) {
        (self.func)();
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// An ordered sequence of callback records.
///
/// Backed by a linked list so that promotion (`current -> done`) and
/// hotplug migration are O(1) tail splices, and per-queue FIFO order is a
/// property of the structure itself.
#[derive(Debug, Default)]
pub struct CallbackQueue {
    list: LinkedList<Callback>,
}

impl CallbackQueue {
    /// Empty queue.
    pub const fn new() -> Self {
        Self {
            list: LinkedList::new(),
        }
    }

    /// Append one record at the tail.
    pub fn push_back(&mut self, callback: Callback) {
        self.list.push_back(callback);
    }

    /// Splice every record of `other` onto this queue's tail, leaving
    /// `other` empty. O(1).
    pub fn append(&mut self, other: &mut CallbackQueue) {
        self.list.append(&mut other.list);
    }

    /// Take the whole queue, leaving this one empty.
    pub fn take_all(&mut self) -> CallbackQueue {
        CallbackQueue {
            list: mem::take(&mut self.list),
        }
    }

    /// Detach up to `max` records from the front, preserving order.
    pub fn detach_front(&mut self, max: usize) -> CallbackQueue {
        if max >= self.list.len() {
            return self.take_all();
        }
        let rest = self.list.split_off(max);
        CallbackQueue {
            list: mem::replace(&mut self.list, rest),
        }
    }

    /// Number of records queued.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl IntoIterator for CallbackQueue {
    type Item = Callback;
    type IntoIter = alloc::collections::linked_list::IntoIter<Callback>;

    fn into_iter(self) -> Self::IntoIter {
        self.list.into_iter()
    }
}

//! Ready-completion queue and in-flight accounting shared by both backends

use crate::error::{Result, RingError};
use crate::op::Completion;
use std::collections::VecDeque;

#[derive(Debug)]
pub(crate) struct CompletionQueue {
    depth: usize,
    in_flight: usize,
    ready: VecDeque<Completion>,
}

impl CompletionQueue {
    pub(crate) fn new(depth: usize) -> Self {
        Self {
            depth,
            in_flight: 0,
            ready: VecDeque::with_capacity(depth),
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Claim submission slots for a batch
    pub(crate) fn reserve(&mut self, requested: usize) -> Result<()> {
        let available = self.depth - self.in_flight;
        if requested > available {
            return Err(RingError::RingFull {
                requested,
                available,
            });
        }
        self.in_flight += requested;
        Ok(())
    }

    /// Return slots claimed for a batch the backend could not accept
    pub(crate) fn unreserve(&mut self, count: usize) {
        self.in_flight = self.in_flight.saturating_sub(count);
    }

    pub(crate) fn post(&mut self, completion: Completion) {
        self.ready.push_back(completion);
    }

    pub(crate) fn front(&self) -> Option<Completion> {
        self.ready.front().copied()
    }

    pub(crate) fn acknowledge(&mut self, completion: &Completion) {
        let position = self.ready.iter().position(|c| c == completion);
        debug_assert!(position.is_some(), "acknowledged an unknown completion");
        if let Some(c) = position.and_then(|i| self.ready.remove(i)) {
            self.retire(&c);
        }
    }

    pub(crate) fn acknowledge_n(&mut self, count: usize) {
        for _ in 0..count {
            match self.ready.pop_front() {
                Some(c) => self.retire(&c),
                None => break,
            }
        }
    }

    fn retire(&mut self, completion: &Completion) {
        let weight = usize::from(completion.weight());
        debug_assert!(weight <= self.in_flight, "in-flight count underflow");
        self.in_flight = self.in_flight.saturating_sub(weight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_respects_depth() {
        let mut q = CompletionQueue::new(4);
        q.reserve(3).unwrap();
        let err = q.reserve(2).unwrap_err();
        assert!(matches!(
            err,
            RingError::RingFull {
                requested: 2,
                available: 1
            }
        ));
        q.reserve(1).unwrap();
        assert_eq!(q.in_flight(), 4);
    }

    #[test]
    fn test_acknowledge_retires_weight() {
        let mut q = CompletionQueue::new(8);
        q.reserve(3).unwrap();
        q.post(Completion::new(1, 0, 1, 2));
        q.post(Completion::new(2, 0, 0, 1));
        let first = q.front().unwrap();
        q.acknowledge(&first);
        assert_eq!(q.in_flight(), 1);
        q.acknowledge_n(5);
        assert_eq!(q.in_flight(), 0);
        assert_eq!(q.ready_len(), 0);
    }
}

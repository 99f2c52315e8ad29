//! Three-tier FIFO for signals waiting to become the current context.

use std::collections::VecDeque;

use crate::models::{ActivityKind, ActivitySignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Text selections: the user is pointing at something.
    High,
    /// Navigations that did not take the direct path.
    Medium,
    Low,
}

impl Tier {
    pub fn of(signal: &ActivitySignal) -> Self {
        if signal.is_text_selection() {
            Tier::High
        } else if signal.kind == ActivityKind::Navigate {
            Tier::Medium
        } else {
            Tier::Low
        }
    }
}

#[derive(Debug)]
pub struct DispatchQueue {
    high: VecDeque<ActivitySignal>,
    medium: VecDeque<ActivitySignal>,
    low: VecDeque<ActivitySignal>,
    priority_budget: usize,
    dropped: u64,
}

impl DispatchQueue {
    pub fn new(priority_budget: usize) -> Self {
        Self {
            high: VecDeque::new(),
            medium: VecDeque::new(),
            low: VecDeque::new(),
            priority_budget,
            dropped: 0,
        }
    }

    /// Queue `signal` in its tier. Returns the low-priority signal evicted to
    /// make room, if any.
    pub fn enqueue(&mut self, signal: ActivitySignal) -> Option<ActivitySignal> {
        match Tier::of(&signal) {
            Tier::High => self.high.push_back(signal),
            Tier::Medium => self.medium.push_back(signal),
            Tier::Low => self.low.push_back(signal),
        }

        if self.high.len() + self.medium.len() > self.priority_budget {
            let evicted = self.low.pop_front();
            if evicted.is_some() {
                self.dropped += 1;
            }
            evicted
        } else {
            None
        }
    }

    pub fn pop(&mut self) -> Option<ActivitySignal> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tier_len(&self, tier: Tier) -> usize {
        match tier {
            Tier::High => self.high.len(),
            Tier::Medium => self.medium.len(),
            Tier::Low => self.low.len(),
        }
    }

    /// Signals evicted by backpressure since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PageLocation, SELECTION_DESCRIPTION};

    fn signal(kind: ActivityKind, description: &str) -> ActivitySignal {
        ActivitySignal::new(&PageLocation::new("https://a.test", "A"), kind, description)
    }

    fn selection(n: usize) -> ActivitySignal {
        signal(ActivityKind::Interaction, SELECTION_DESCRIPTION).with_detail(Some(format!("sel {n}")))
    }

    #[test]
    fn tiers_follow_signal_shape() {
        assert_eq!(Tier::of(&selection(0)), Tier::High);
        assert_eq!(Tier::of(&signal(ActivityKind::Navigate, "Navigated")), Tier::Medium);
        assert_eq!(Tier::of(&signal(ActivityKind::Interaction, "Scrolling fast")), Tier::Low);
        assert_eq!(Tier::of(&signal(ActivityKind::Idle, "Idle for 60s")), Tier::Low);
    }

    #[test]
    fn pops_by_tier_then_fifo() {
        let mut queue = DispatchQueue::default();
        queue.enqueue(signal(ActivityKind::Idle, "low 1"));
        queue.enqueue(signal(ActivityKind::Navigate, "nav 1"));
        queue.enqueue(signal(ActivityKind::Input, "low 2"));
        queue.enqueue(selection(1));
        queue.enqueue(signal(ActivityKind::Navigate, "nav 2"));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|s| s.detail.unwrap_or(s.description))
            .collect();
        assert_eq!(order, vec!["sel 1", "nav 1", "nav 2", "low 1", "low 2"]);
    }

    #[test]
    fn backpressure_evicts_oldest_low_per_excess_enqueue() {
        let mut queue = DispatchQueue::default();
        for i in 0..3 {
            queue.enqueue(signal(ActivityKind::Media, &format!("low {i}")));
        }
        for i in 0..10 {
            assert!(queue.enqueue(selection(i)).is_none());
        }

        let evicted = queue.enqueue(selection(10)).unwrap();
        assert_eq!(evicted.description, "low 0");
        let evicted = queue.enqueue(signal(ActivityKind::Navigate, "nav")).unwrap();
        assert_eq!(evicted.description, "low 1");
        assert_eq!(queue.tier_len(Tier::Low), 1);
        assert_eq!(queue.dropped(), 2);
    }

    #[test]
    fn backpressure_without_low_entries_keeps_everything() {
        let mut queue = DispatchQueue::default();
        for i in 0..15 {
            assert!(queue.enqueue(selection(i)).is_none());
        }
        assert_eq!(queue.len(), 15);
        assert_eq!(queue.dropped(), 0);
    }
}

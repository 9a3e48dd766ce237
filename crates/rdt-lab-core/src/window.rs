//! Cyclic sequence numbers and the sender's sliding window.
//!
//! Sequence numbers for GBN and SR live in `1..=modulus`; `0` is never used so
//! a data frame cannot be mistaken for the teardown sentinel. All window
//! arithmetic is done on forward distances, which makes the offset of the
//! first value irrelevant.

/// A cyclic space of `modulus` sequence numbers starting at `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqSpace {
    modulus: u8,
}

impl SeqSpace {
    pub fn new(modulus: u8) -> Self {
        assert!(modulus >= 2, "sequence space needs at least two values");
        Self { modulus }
    }

    pub fn modulus(self) -> u8 {
        self.modulus
    }

    pub fn first(self) -> u8 {
        1
    }

    pub fn next(self, seq: u8) -> u8 {
        seq % self.modulus + 1
    }

    pub fn prev(self, seq: u8) -> u8 {
        if seq <= 1 { self.modulus } else { seq - 1 }
    }

    pub fn add(self, seq: u8, n: u8) -> u8 {
        ((u16::from(seq) - 1 + u16::from(n)) % u16::from(self.modulus)) as u8 + 1
    }

    /// Forward distance from `from` to `to`.
    pub fn distance(self, from: u8, to: u8) -> u8 {
        let m = u16::from(self.modulus);
        ((u16::from(to) + m - u16::from(from)) % m) as u8
    }

    pub fn contains(self, seq: u8) -> bool {
        (1..=self.modulus).contains(&seq)
    }

    /// `seq` lies in `[start, start + len)`.
    pub fn in_range(self, start: u8, len: u8, seq: u8) -> bool {
        self.contains(seq) && self.distance(start, seq) < len
    }

    /// Map a sequence number onto a slot of a buffer with `capacity` entries.
    pub fn slot(self, seq: u8, capacity: usize) -> usize {
        usize::from(seq - 1) % capacity
    }
}

/// `{base, next_seq, size}` with `base <= next_seq <= base + size` in
/// modular order.
#[derive(Debug, Clone)]
pub struct SenderWindow {
    base: u8,
    next_seq: u8,
    size: u8,
    space: SeqSpace,
}

impl SenderWindow {
    pub fn new(size: u8, space: SeqSpace) -> Self {
        assert!(size >= 1, "window size must be at least 1");
        assert!(
            u16::from(space.modulus()) >= 2 * u16::from(size),
            "sequence space must be at least twice the window"
        );
        Self {
            base: space.first(),
            next_seq: space.first(),
            size,
            space,
        }
    }

    pub fn base(&self) -> u8 {
        self.base
    }

    pub fn next_seq(&self) -> u8 {
        self.next_seq
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn space(&self) -> SeqSpace {
        self.space
    }

    pub fn in_flight(&self) -> u8 {
        self.space.distance(self.base, self.next_seq)
    }

    pub fn is_empty(&self) -> bool {
        self.base == self.next_seq
    }

    pub fn can_send(&self) -> bool {
        self.in_flight() < self.size
    }

    /// Hand out the next sequence number, or `None` while the window is full.
    /// This is the only way to advance `next_seq`, so the window cannot
    /// overflow.
    pub fn reserve(&mut self) -> Option<u8> {
        if !self.can_send() {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq = self.space.next(seq);
        Some(seq)
    }

    /// `seq` has been sent and not yet acknowledged.
    pub fn is_outstanding(&self, seq: u8) -> bool {
        self.space.in_range(self.base, self.in_flight(), seq)
    }

    /// `seq` falls anywhere in `[base, base + size)`.
    pub fn in_window(&self, seq: u8) -> bool {
        self.space.in_range(self.base, self.size, seq)
    }

    /// Sequence numbers from `base` up to `next_seq - 1`, oldest first.
    pub fn outstanding(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.in_flight()).map(|i| self.space.add(self.base, i))
    }

    /// Move `base` forward to `new_base`, which must lie in
    /// `[base, next_seq]`. Returns how many sequence numbers were released.
    pub fn advance_to(&mut self, new_base: u8) -> u8 {
        let released = self.space.distance(self.base, new_base);
        debug_assert!(released <= self.in_flight(), "base moved past next_seq");
        self.base = new_base;
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_wraps_without_zero() {
        let space = SeqSpace::new(4);
        assert_eq!(space.next(4), 1);
        assert_eq!(space.prev(1), 4);
        assert_eq!(space.add(3, 3), 2);
        assert_eq!(space.distance(3, 1), 2);
        assert_eq!(space.distance(2, 2), 0);
        assert!(!space.contains(0));
        assert!(space.in_range(4, 2, 1));
        assert!(!space.in_range(4, 2, 2));
    }

    #[test]
    fn window_never_overflows() {
        let mut window = SenderWindow::new(3, SeqSpace::new(6));
        assert_eq!(window.reserve(), Some(1));
        assert_eq!(window.reserve(), Some(2));
        assert_eq!(window.reserve(), Some(3));
        assert_eq!(window.reserve(), None);
        assert_eq!(window.in_flight(), 3);
        assert_eq!(window.outstanding().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn window_slides_across_wrap() {
        let mut window = SenderWindow::new(2, SeqSpace::new(4));
        for _ in 0..3 {
            let seq = window.reserve().unwrap();
            window.advance_to(window.space().next(seq));
        }
        assert_eq!(window.base(), 4);
        assert_eq!(window.reserve(), Some(4));
        assert_eq!(window.reserve(), Some(1));
        assert!(window.is_outstanding(4));
        assert!(window.is_outstanding(1));
        assert!(!window.is_outstanding(2));
        assert_eq!(window.advance_to(2), 2);
        assert!(window.is_empty());
    }
}

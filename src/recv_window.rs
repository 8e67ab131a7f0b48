//! 수신 윈도우
//!
//! 도착 순서와 무관하게 프레임을 `sequence mod capacity` 슬롯에 보관하고,
//! `next_flush`부터 연속된 구간만 순서대로 내보낸다.
//!
//! 불변식: `available + occupied == capacity`.

use bytes::Bytes;

use crate::Sequence;

/// 보관 중인 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveSlot {
    pub sequence: Sequence,
    pub payload: Bytes,
}

/// 데이터 프레임 수용 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    /// 새로 보관됨. ACK 대상.
    Stored { available: usize },
    /// 이미 내보냈거나 보관 중. 다시 ACK만 한다.
    Duplicate { available: usize },
    /// 여유 슬롯 없음. 폐기.
    NoCapacity,
    /// 다른 시퀀스가 슬롯을 차지함. 폐기.
    Collision { occupant: Sequence },
    /// `next_flush + capacity` 이상. 폐기.
    OutOfWindow,
}

impl Intake {
    /// ACK를 보내야 하는 결과인지
    pub fn should_ack(&self) -> bool {
        matches!(self, Intake::Stored { .. } | Intake::Duplicate { .. })
    }
}

/// 수신 윈도우
#[derive(Debug)]
pub struct ReceiveWindow {
    slots: Vec<Option<ReceiveSlot>>,
    capacity: usize,
    next_flush: Sequence,
    available: usize,
}

impl ReceiveWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "capacity must be at least 1");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            capacity,
            next_flush: 0,
            available: capacity,
        }
    }

    fn index(&self, sequence: Sequence) -> usize {
        sequence as usize % self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 다음에 내보낼 시퀀스
    pub fn next_flush_sequence(&self) -> Sequence {
        self.next_flush
    }

    /// 광고할 여유 슬롯 수
    pub fn available_slots(&self) -> usize {
        self.available
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// 데이터 프레임 수용
    pub fn on_data_frame(&mut self, sequence: Sequence, payload: Bytes) -> Intake {
        if sequence < self.next_flush {
            return Intake::Duplicate {
                available: self.available,
            };
        }

        let index = self.index(sequence);
        if let Some(slot) = &self.slots[index] {
            if slot.sequence == sequence {
                return Intake::Duplicate {
                    available: self.available,
                };
            }
        }

        if self.available == 0 {
            return Intake::NoCapacity;
        }
        if let Some(slot) = &self.slots[index] {
            return Intake::Collision {
                occupant: slot.sequence,
            };
        }
        if sequence as i64 >= self.next_flush as i64 + self.capacity as i64 {
            return Intake::OutOfWindow;
        }

        self.slots[index] = Some(ReceiveSlot { sequence, payload });
        self.available -= 1;
        Intake::Stored {
            available: self.available,
        }
    }

    /// `next_flush`부터 연속 구간을 순서대로 꺼낸다. 갭에서 멈춘다.
    pub fn drain_ready(&mut self) -> Vec<ReceiveSlot> {
        let mut ready = Vec::new();
        loop {
            let index = self.index(self.next_flush);
            match self.slots[index].take() {
                Some(slot) if slot.sequence == self.next_flush => {
                    self.next_flush += 1;
                    self.available += 1;
                    ready.push(slot);
                }
                other => {
                    self.slots[index] = other;
                    break;
                }
            }
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn payload(byte: u8) -> Bytes {
        Bytes::from(vec![byte; 3])
    }

    fn assert_invariant(window: &ReceiveWindow) {
        assert_eq!(window.available_slots() + window.occupied(), window.capacity());
    }

    #[test]
    fn test_in_order_intake_and_drain() {
        let mut window = ReceiveWindow::new(4);
        assert_eq!(window.on_data_frame(0, payload(0)), Intake::Stored { available: 3 });
        assert_eq!(window.on_data_frame(1, payload(1)), Intake::Stored { available: 2 });
        assert_invariant(&window);

        let drained = window.drain_ready();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].sequence, 0);
        assert_eq!(drained[1].payload, payload(1));
        assert_eq!(window.next_flush_sequence(), 2);
        assert_eq!(window.available_slots(), 4);
        assert_invariant(&window);
    }

    #[test]
    fn test_out_of_order_waits_for_gap() {
        let mut window = ReceiveWindow::new(4);
        window.on_data_frame(1, payload(1));
        window.on_data_frame(2, payload(2));
        assert!(window.drain_ready().is_empty());
        assert_eq!(window.next_flush_sequence(), 0);

        window.on_data_frame(0, payload(0));
        let sequences: Vec<_> = window.drain_ready().iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(window.next_flush_sequence(), 3);
        assert_invariant(&window);
    }

    #[test]
    fn test_duplicates_are_reacked_not_restored() {
        let mut window = ReceiveWindow::new(4);
        window.on_data_frame(1, payload(1));
        assert_eq!(window.on_data_frame(1, payload(9)), Intake::Duplicate { available: 3 });

        window.on_data_frame(0, payload(0));
        window.drain_ready();
        let intake = window.on_data_frame(0, payload(0));
        assert_eq!(intake, Intake::Duplicate { available: 4 });
        assert!(intake.should_ack());
        assert_invariant(&window);
    }

    #[test]
    fn test_collision_and_out_of_window() {
        let mut window = ReceiveWindow::new(4);
        window.on_data_frame(1, payload(1));

        // 5 % 4 == 1
        assert_eq!(window.on_data_frame(5, payload(5)), Intake::Collision { occupant: 1 });
        // 슬롯 2는 비었지만 0 + 4 이상
        assert_eq!(window.on_data_frame(6, payload(6)), Intake::OutOfWindow);
        assert!(!Intake::OutOfWindow.should_ack());
        assert_invariant(&window);
    }

    #[test]
    fn test_no_capacity() {
        let mut window = ReceiveWindow::new(2);
        window.on_data_frame(0, payload(0));
        window.on_data_frame(1, payload(1));
        assert_eq!(window.available_slots(), 0);
        assert_eq!(window.on_data_frame(2, payload(2)), Intake::NoCapacity);
        // 이미 보관한 것은 여전히 중복으로 ACK
        assert_eq!(window.on_data_frame(1, payload(1)), Intake::Duplicate { available: 0 });

        window.drain_ready();
        assert_eq!(window.on_data_frame(2, payload(2)), Intake::Stored { available: 1 });
        assert_invariant(&window);
    }

    #[test]
    fn test_ring_wraps_many_times() {
        let mut window = ReceiveWindow::new(3);
        let mut flushed = Vec::new();
        for seq in 0..30 {
            assert!(matches!(window.on_data_frame(seq, payload(seq as u8)), Intake::Stored { .. }));
            flushed.extend(window.drain_ready().into_iter().map(|s| s.sequence));
        }
        assert_eq!(flushed, (0..30).collect::<Vec<_>>());
        assert_invariant(&window);
    }

    #[test]
    fn test_every_order_of_one_window() {
        let sequences = [0, 1, 2, 3];
        for a in sequences {
            for b in sequences {
                for c in sequences {
                    for d in sequences {
                        let order = [a, b, c, d];
                        if (0..4).any(|seq| !order.contains(&seq)) {
                            continue;
                        }

                        let mut window = ReceiveWindow::new(4);
                        let mut flushed = Vec::new();
                        for seq in order {
                            assert!(matches!(
                                window.on_data_frame(seq, payload(seq as u8)),
                                Intake::Stored { .. }
                            ));
                            flushed.extend(window.drain_ready().into_iter().map(|s| s.sequence));
                            assert_invariant(&window);
                        }
                        assert_eq!(flushed, vec![0, 1, 2, 3], "order {:?}", order);
                    }
                }
            }
        }
    }

    #[test]
    fn test_shuffled_arrivals_across_wraps() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut window = ReceiveWindow::new(5);
        // 아직 받아들여지지 않은 시퀀스 (송신자가 재전송할 것들)
        let mut pending: Vec<Sequence> = (0..200).collect();
        let mut flushed = Vec::new();

        while !pending.is_empty() {
            let seq = pending.swap_remove(rng.gen_range(0..pending.len()));
            match window.on_data_frame(seq, payload(seq as u8)) {
                Intake::Stored { .. } => {}
                Intake::OutOfWindow | Intake::NoCapacity | Intake::Collision { .. } => {
                    pending.push(seq)
                }
                other => panic!("seq={} -> {:?}", seq, other),
            }
            flushed.extend(window.drain_ready().into_iter().map(|s| s.sequence));
            assert_invariant(&window);
            assert!(flushed.windows(2).all(|pair| pair[1] == pair[0] + 1));
        }

        assert_eq!(flushed, (0..200).collect::<Vec<_>>());
        assert_eq!(window.available_slots(), 5);
    }
}

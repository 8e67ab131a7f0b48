//! 송신 윈도우
//!
//! `sequence mod capacity`로 인덱싱되는 고정 크기 링.
//!
//! ```text
//!  window_base          next_sequence
//!      │                      │
//!  ────┼──────────────────────┼──────────────▶ seq
//!      │ <──── in flight ────▶│ <── 여유 ──▶
//! ```
//!
//! 불변식: `next_sequence - window_base <= capacity`.
//! 이 타입은 상태만 관리하고 소켓 I/O는 호출측 책임이다 (락을 쥔 채 I/O 금지).

use std::time::Instant;

use bytes::Bytes;

use crate::frame::FrameCodec;
use crate::timer::RetransmitPolicy;
use crate::{Error, Result, Sequence};

/// 윈도우 슬롯 하나 (전송 중인 청크)
#[derive(Debug, Clone)]
pub struct SendSlot {
    pub sequence: Sequence,

    /// 마지막 (재)전송 시각
    pub queued_at: Instant,

    pub acknowledged: bool,

    /// 인코딩된 데이터그램 (재전송 시 그대로 사용)
    pub datagram: Bytes,

    pub payload_size: usize,

    /// 총 전송 횟수
    pub transmissions: u32,
}

/// 새로 수용된 청크
#[derive(Debug, Clone)]
pub struct Admitted {
    pub sequence: Sequence,
    pub datagram: Bytes,
}

/// ACK 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// 처음 확인된 슬롯
    Fresh { payload_size: usize },
    /// 이미 확인됐거나 윈도우가 이미 지나간 시퀀스, 광고 윈도우도 그대로
    Duplicate,
    /// 이미 확인된 시퀀스지만 광고 윈도우가 바뀜 (수신자 flush 확인)
    WindowUpdate,
    /// 아직 보내지 않은 시퀀스
    Unsent,
}

/// ACK 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckOutcome {
    pub kind: AckKind,

    /// 이번 ACK로 window_base가 전진한 슬롯 수
    pub slid: usize,
}

/// 재전송 대상
#[derive(Debug, Clone)]
pub struct Retransmission {
    pub sequence: Sequence,
    pub datagram: Bytes,
    pub attempt: u32,

    /// 확인됐지만 0 윈도우로 슬라이드가 막힌 슬롯의 탐침 재전송
    pub probe: bool,
}

/// 송신 윈도우
#[derive(Debug)]
pub struct SendWindow {
    slots: Vec<Option<SendSlot>>,
    capacity: usize,
    window_base: Sequence,
    next_sequence: Sequence,

    /// 0 광고 윈도우로 슬라이드가 막힌 시각
    blocked_since: Option<Instant>,

    /// 직전 ACK가 광고한 윈도우
    last_advertised: Option<u32>,
}

impl SendWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "capacity must be at least 1");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            capacity,
            window_base: 0,
            next_sequence: 0,
            blocked_since: None,
            last_advertised: None,
        }
    }

    fn index(&self, sequence: Sequence) -> usize {
        sequence as usize % self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 가장 오래된 미확인 시퀀스
    pub fn window_base(&self) -> Sequence {
        self.window_base
    }

    pub fn next_sequence(&self) -> Sequence {
        self.next_sequence
    }

    pub fn in_flight(&self) -> usize {
        (self.next_sequence - self.window_base) as usize
    }

    pub fn has_room(&self) -> bool {
        self.in_flight() < self.capacity
    }

    /// 보낸 모든 청크가 확인되고 슬라이드됨
    pub fn is_drained(&self) -> bool {
        self.window_base == self.next_sequence
    }

    pub fn slot(&self, sequence: Sequence) -> Option<&SendSlot> {
        if sequence < 0 {
            return None;
        }
        self.slots[self.index(sequence)]
            .as_ref()
            .filter(|slot| slot.sequence == sequence)
    }

    /// 새 청크 수용. 가득 찼으면 `WindowFull`.
    ///
    /// 반환된 데이터그램은 락을 놓은 뒤 즉시 전송해야 한다.
    pub fn admit(&mut self, payload: &[u8], codec: &FrameCodec, now: Instant) -> Result<Admitted> {
        if !self.has_room() {
            return Err(Error::WindowFull {
                in_flight: self.in_flight(),
                capacity: self.capacity,
            });
        }

        let sequence = self.next_sequence;
        if sequence == Sequence::MAX {
            return Err(Error::TooManyChunks {
                chunks: sequence as u64 + 1,
                max: Sequence::MAX as u64,
            });
        }
        let index = self.index(sequence);
        debug_assert!(self.slots[index].is_none(), "slot {} still occupied", index);

        let datagram = codec.encode_data(sequence, payload);
        self.slots[index] = Some(SendSlot {
            sequence,
            queued_at: now,
            acknowledged: false,
            datagram: datagram.clone(),
            payload_size: payload.len(),
            transmissions: 1,
        });
        self.next_sequence += 1;

        Ok(Admitted { sequence, datagram })
    }

    /// ACK 처리 후 연속 확인 구간만큼 슬라이드 (광고 윈도우로 제한)
    ///
    /// `advertised`가 None(구버전 ACK)이면 자기 용량으로 제한한다.
    pub fn on_ack(&mut self, sequence: Sequence, advertised: Option<u32>, now: Instant) -> AckOutcome {
        let kind = if sequence < self.window_base {
            AckKind::Duplicate
        } else if sequence >= self.next_sequence {
            AckKind::Unsent
        } else {
            let index = self.index(sequence);
            match self.slots[index].as_mut() {
                Some(slot) if slot.sequence == sequence => {
                    if slot.acknowledged {
                        AckKind::Duplicate
                    } else {
                        slot.acknowledged = true;
                        AckKind::Fresh {
                            payload_size: slot.payload_size,
                        }
                    }
                }
                _ => AckKind::Unsent,
            }
        };

        let kind = match (kind, advertised) {
            (AckKind::Duplicate, Some(window)) if self.last_advertised != Some(window) => {
                AckKind::WindowUpdate
            }
            (kind, _) => kind,
        };
        if advertised.is_some() {
            self.last_advertised = advertised;
        }

        let limit = advertised.map_or(self.capacity, |window| window as usize);
        let slid = self.slide(limit, now);

        AckOutcome { kind, slid }
    }

    fn slide(&mut self, limit: usize, now: Instant) -> usize {
        let mut slid = 0;
        while self.window_base < self.next_sequence {
            let index = self.index(self.window_base);
            let acked = matches!(
                &self.slots[index],
                Some(slot) if slot.sequence == self.window_base && slot.acknowledged
            );
            if !acked {
                self.blocked_since = None;
                break;
            }
            if slid >= limit {
                // 확인됐지만 수신자 여유가 없다
                self.blocked_since.get_or_insert(now);
                break;
            }
            self.slots[index] = None;
            self.window_base += 1;
            slid += 1;
        }
        if self.window_base == self.next_sequence {
            self.blocked_since = None;
        }
        slid
    }

    /// 타임아웃 스캔: 미확인 슬롯 중 오래된 것을 재전송 대상으로 돌려주고 나이를 리셋
    pub fn sweep(&mut self, now: Instant, policy: &RetransmitPolicy) -> Vec<Retransmission> {
        let mut due = Vec::new();

        for sequence in self.window_base..self.next_sequence {
            let index = self.index(sequence);
            let Some(slot) = self.slots[index].as_mut() else {
                continue;
            };
            if slot.acknowledged || slot.sequence != sequence {
                continue;
            }
            if now.saturating_duration_since(slot.queued_at) >= policy.timeout_for(slot.transmissions) {
                slot.queued_at = now;
                slot.transmissions += 1;
                due.push(Retransmission {
                    sequence,
                    datagram: slot.datagram.clone(),
                    attempt: slot.transmissions,
                    probe: false,
                });
            }
        }

        // 0 윈도우 탐침: 수신자가 현재 윈도우를 다시 광고하게 만든다
        if let Some(since) = self.blocked_since {
            if now.saturating_duration_since(since) >= policy.base_timeout() {
                let index = self.index(self.window_base);
                if let Some(slot) = self.slots[index].as_mut() {
                    slot.queued_at = now;
                    slot.transmissions += 1;
                    due.push(Retransmission {
                        sequence: slot.sequence,
                        datagram: slot.datagram.clone(),
                        attempt: slot.transmissions,
                        probe: true,
                    });
                }
                self.blocked_since = Some(now);
            }
        }

        due
    }
}

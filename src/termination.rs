//! 종료 핸드쉐이크 상태 머신
//!
//! ```text
//! 송신: TRANSFERRING ─소스 소진→ SOURCE_EXHAUSTED ─첫 알림 전송→ AWAITING_FINAL_ACK
//!       ─최종 ACK→ (CLOSE_TRANSFER 전송) → CLOSED
//! 수신: RECEIVING ─DONE_TRANSFER (last까지 flush 완료)→ DRAINING ─CLOSE_TRANSFER→ CLOSED
//! ```

use tracing::{info, warn};

use crate::Sequence;

/// 송신측 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderPhase {
    Transferring,
    SourceExhausted,
    AwaitingFinalAck,
    Closed,
}

/// 송신측 종료 추적
#[derive(Debug)]
pub struct SenderTermination {
    phase: SenderPhase,
    last_sequence: Option<Sequence>,
    notices_sent: u64,
    stall_warning_every: u64,
}

impl SenderTermination {
    /// `stall_warning_every`번 무응답마다 경고 (0이면 경고 없음)
    pub fn new(stall_warning_every: u64) -> Self {
        Self {
            phase: SenderPhase::Transferring,
            last_sequence: None,
            notices_sent: 0,
            stall_warning_every,
        }
    }

    pub fn phase(&self) -> SenderPhase {
        self.phase
    }

    pub fn last_sequence(&self) -> Option<Sequence> {
        self.last_sequence
    }

    pub fn notices_sent(&self) -> u64 {
        self.notices_sent
    }

    /// 소스 소진. 빈 소스면 `last_sequence == -1`.
    pub fn source_exhausted(&mut self, last_sequence: Sequence) {
        if self.phase == SenderPhase::Transferring {
            self.phase = SenderPhase::SourceExhausted;
            self.last_sequence = Some(last_sequence);
        }
    }

    /// 종료 알림 한 번 전송 기록
    pub fn notice_sent(&mut self) {
        if matches!(
            self.phase,
            SenderPhase::SourceExhausted | SenderPhase::AwaitingFinalAck
        ) {
            self.phase = SenderPhase::AwaitingFinalAck;
            self.notices_sent += 1;

            if self.stall_warning_every > 0 && self.notices_sent % self.stall_warning_every == 0 {
                warn!(
                    "종료 알림 {}회 무응답 (last_seq={:?}), 수신자를 확인하세요",
                    self.notices_sent, self.last_sequence
                );
            }
        }
    }

    /// 최종 ACK 수신. 대기 중이었다면 true.
    pub fn on_final_ack(&mut self) -> bool {
        if self.phase == SenderPhase::AwaitingFinalAck {
            info!("최종 ACK 수신 (알림 {}회)", self.notices_sent);
            true
        } else {
            false
        }
    }

    /// CLOSE_TRANSFER 전송 후 호출. 최종 ACK 대기 중이 아니면 무시.
    pub fn mark_closed(&mut self) -> bool {
        if self.phase == SenderPhase::AwaitingFinalAck {
            self.phase = SenderPhase::Closed;
            true
        } else {
            false
        }
    }
}

/// 수신측 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverPhase {
    Receiving,
    Draining,
    Closed,
}

/// 수신측 종료 추적
#[derive(Debug)]
pub struct ReceiverTermination {
    phase: ReceiverPhase,
    last_sequence: Option<Sequence>,
}

impl Default for ReceiverTermination {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiverTermination {
    pub fn new() -> Self {
        Self {
            phase: ReceiverPhase::Receiving,
            last_sequence: None,
        }
    }

    pub fn phase(&self) -> ReceiverPhase {
        self.phase
    }

    pub fn last_sequence(&self) -> Option<Sequence> {
        self.last_sequence
    }

    /// DONE_TRANSFER 수신.
    ///
    /// 첫 알림의 `last`만 기록한다. `last`까지 모두 내보낸 뒤에만 DRAINING으로
    /// 넘어가며, 반환값은 지금 최종 ACK를 보내야 하는지. 반복 알림마다 다시
    /// true가 될 수 있다.
    pub fn on_end_of_stream(&mut self, last: Sequence, next_flush: Sequence) -> bool {
        if self.phase == ReceiverPhase::Closed {
            return false;
        }

        match self.last_sequence {
            None => self.last_sequence = Some(last),
            Some(recorded) if recorded != last => {
                warn!(
                    "종료 알림의 last_seq 불일치: 기록={}, 수신={}",
                    recorded, last
                );
            }
            Some(_) => {}
        }

        let complete = self.is_complete(next_flush);
        if complete {
            self.phase = ReceiverPhase::Draining;
        }
        complete
    }

    /// 기록된 마지막 시퀀스까지 모두 내보냈는지
    pub fn is_complete(&self, next_flush: Sequence) -> bool {
        match self.last_sequence {
            Some(last) => next_flush > last,
            None => false,
        }
    }

    /// CLOSE_TRANSFER 수신
    pub fn on_close(&mut self) {
        self.phase = ReceiverPhase::Closed;
    }
}

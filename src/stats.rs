//! 전송 통계

use std::time::{Duration, Instant};

/// 전체 전송 통계
///
/// 프로토콜 수준 이상 징후(중복, 손실, 충돌)는 에러로 올라가지 않고 여기서만 보인다.
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    // ── 송신측 ──
    /// 최초 전송 프레임 수
    pub frames_sent: u64,

    /// 재전송 프레임 수
    pub retransmitted_frames: u64,

    /// 윈도우 가득 참으로 대기한 횟수
    pub window_full_waits: u64,

    /// 수신한 ACK 수 (최종 ACK 포함)
    pub acks_received: u64,

    /// 중복 ACK 수 (광고 윈도우가 바뀐 flush 확인 ACK는 제외)
    pub duplicate_acks: u64,

    /// 처음 확인된 바이트 수 (중복 ACK로 두 번 세지 않음)
    pub bytes_acknowledged: u64,

    /// 보낸 종료 알림 수
    pub notices_sent: u64,

    // ── 수신측 ──
    /// 수신한 데이터 프레임 수
    pub frames_received: u64,

    /// 중복 데이터 프레임 수
    pub duplicate_frames: u64,

    /// 여유 슬롯이 없어 버린 프레임 수
    pub dropped_no_capacity: u64,

    /// 슬롯 충돌로 버린 프레임 수
    pub slot_collisions: u64,

    /// 윈도우 밖이라 버린 프레임 수
    pub dropped_out_of_window: u64,

    /// 싱크에 기록한 바이트 수
    pub bytes_flushed: u64,

    /// 보낸 ACK 수
    pub acks_sent: u64,

    // ── 공통 ──
    /// 디코딩 실패 데이터그램 수
    pub decode_errors: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_sent: 0,
            retransmitted_frames: 0,
            window_full_waits: 0,
            acks_received: 0,
            duplicate_acks: 0,
            bytes_acknowledged: 0,
            notices_sent: 0,
            frames_received: 0,
            duplicate_frames: 0,
            dropped_no_capacity: 0,
            slot_collisions: 0,
            dropped_out_of_window: 0,
            bytes_flushed: 0,
            acks_sent: 0,
            decode_errors: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec). 송신측은 확인된 바이트, 수신측은 기록된 바이트 기준.
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_acknowledged.max(self.bytes_flushed) as f64 / elapsed
    }

    /// 재전송 비율
    pub fn retransmit_ratio(&self) -> f64 {
        let total = self.frames_sent + self.retransmitted_frames;
        if total == 0 {
            return 0.0;
        }
        self.retransmitted_frames as f64 / total as f64
    }

    /// 송신측 요약 문자열
    pub fn sender_summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Frames: {} (+{} retx, {:.1}%) | Acked: {} bytes | Dup ACKs: {} | Window waits: {} | Notices: {} | Throughput: {:.2} MB/s",
            self.elapsed().as_secs_f64(),
            self.frames_sent,
            self.retransmitted_frames,
            self.retransmit_ratio() * 100.0,
            self.bytes_acknowledged,
            self.duplicate_acks,
            self.window_full_waits,
            self.notices_sent,
            self.throughput() / 1_000_000.0,
        )
    }

    /// 수신측 요약 문자열
    pub fn receiver_summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Frames: {} | Written: {} bytes | Dups: {} | No capacity: {} | Collisions: {} | Out of window: {} | Decode errors: {} | Throughput: {:.2} MB/s",
            self.elapsed().as_secs_f64(),
            self.frames_received,
            self.bytes_flushed,
            self.duplicate_frames,
            self.dropped_no_capacity,
            self.slot_collisions,
            self.dropped_out_of_window,
            self.decode_errors,
            self.throughput() / 1_000_000.0,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

//! 프로토콜 설정

use std::path::PathBuf;
use std::time::Duration;

use crate::{
    Error, Result, ACK_PORT_OFFSET, DEFAULT_MAX_PAYLOAD, DEFAULT_WINDOW_CAPACITY, HEADER_LEN,
    MAX_DATAGRAM,
};

/// SWP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 윈도우 용량 (슬롯 수). 송수신 양쪽이 같은 값을 써야 한다.
    pub window_capacity: usize,

    /// 데이터 프레임당 최대 페이로드 (바이트)
    pub max_payload: usize,

    /// 재전송 타임아웃 (밀리초)
    pub retransmit_timeout_ms: u64,

    /// 재전송마다 타임아웃을 두 배로 늘릴지 여부
    pub retransmit_backoff: bool,

    /// 백오프 상한 (밀리초)
    pub max_retransmit_timeout_ms: u64,

    /// 재전송 타이머 스캔 주기 (밀리초)
    pub sweep_interval_ms: u64,

    /// 수신측 싱크 flush 주기 (밀리초)
    pub flush_interval_ms: u64,

    /// 종료 알림(DONE_TRANSFER) 재전송 주기 (밀리초)
    pub notice_interval_ms: u64,

    /// 무응답 종료 알림이 이 횟수만큼 쌓일 때마다 경고 로그
    pub stall_warning_notices: u64,

    /// 종료 알림 최대 시도 횟수 (None이면 무제한)
    pub max_notice_attempts: Option<u64>,

    /// 소켓 수신 폴링 타임아웃 (밀리초)
    pub recv_poll_ms: u64,

    /// DRAINING 상태에서 CLOSE 없이 대기할 최대 시간 (밀리초)
    pub drain_linger_ms: u64,

    /// ACK 포트 오프셋
    pub ack_port_offset: u16,

    /// 수신자 내부 명령 큐 크기
    pub command_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            max_payload: DEFAULT_MAX_PAYLOAD,
            retransmit_timeout_ms: 2000,   // 2초
            retransmit_backoff: false,
            max_retransmit_timeout_ms: 16_000,
            sweep_interval_ms: 50,
            flush_interval_ms: 20,
            notice_interval_ms: 200,
            stall_warning_notices: 50,
            max_notice_attempts: None,     // 무제한
            recv_poll_ms: 10,
            drain_linger_ms: 5000,
            ack_port_offset: ACK_PORT_OFFSET,
            command_queue_size: 1000,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 로컬/루프백 테스트용 설정
    pub fn loopback() -> Self {
        Self {
            retransmit_timeout_ms: 100,
            max_retransmit_timeout_ms: 800,
            sweep_interval_ms: 10,
            flush_interval_ms: 5,
            notice_interval_ms: 20,
            recv_poll_ms: 5,
            drain_linger_ms: 300,
            ..Self::default()
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            window_capacity: 64,
            max_payload: 1200,             // 작은 프레임
            retransmit_timeout_ms: 1000,
            retransmit_backoff: true,
            max_retransmit_timeout_ms: 30_000,
            notice_interval_ms: 500,
            drain_linger_ms: 15_000,
            ..Self::default()
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.window_capacity == 0 {
            return Err(Error::InvalidConfig("window_capacity는 1 이상이어야 함".into()));
        }
        if i32::try_from(self.window_capacity).is_err() {
            return Err(Error::InvalidConfig("window_capacity가 너무 큼".into()));
        }
        if self.max_payload == 0 || self.max_payload > MAX_DATAGRAM - HEADER_LEN {
            return Err(Error::InvalidConfig(format!(
                "max_payload는 1..={} 범위여야 함: {}",
                MAX_DATAGRAM - HEADER_LEN,
                self.max_payload
            )));
        }
        if self.retransmit_timeout_ms == 0
            || self.sweep_interval_ms == 0
            || self.flush_interval_ms == 0
            || self.notice_interval_ms == 0
            || self.recv_poll_ms == 0
        {
            return Err(Error::InvalidConfig("타이머 주기는 0일 수 없음".into()));
        }
        if self.command_queue_size == 0 {
            return Err(Error::InvalidConfig("command_queue_size는 1 이상이어야 함".into()));
        }
        Ok(())
    }

    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }

    pub fn max_retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.max_retransmit_timeout_ms.max(self.retransmit_timeout_ms))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn notice_interval(&self) -> Duration {
        Duration::from_millis(self.notice_interval_ms)
    }

    pub fn recv_poll(&self) -> Duration {
        Duration::from_millis(self.recv_poll_ms)
    }

    pub fn drain_linger(&self) -> Duration {
        Duration::from_millis(self.drain_linger_ms)
    }

    /// 데이터 포트로부터 ACK 포트 계산
    pub fn ack_port_for(&self, data_port: u16) -> u16 {
        data_port.wrapping_add(self.ack_port_offset)
    }
}

/// 송신 프로세스 경계 설정
#[derive(Debug, Clone)]
pub struct SenderOptions {
    /// 수신자 호스트명
    pub destination_host: String,

    /// 수신자 데이터 포트
    pub destination_port: u16,

    /// 보낼 파일 경로
    pub source_path: PathBuf,

    /// 최대 전송 바이트 (파일이 더 짧으면 파일 끝까지)
    pub max_bytes: u64,
}

/// 수신 프로세스 경계 설정
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// 데이터 수신 포트
    pub listen_port: u16,

    /// 저장할 파일 경로 (생성/절단 후 append만)
    pub destination_path: PathBuf,
}

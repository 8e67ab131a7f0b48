//! 재전송 타이머
//!
//! 주기적으로 송신 윈도우를 스캔해 타임아웃된 슬롯을 다시 보낸다.
//! 윈도우 락은 만료 목록을 모으는 동안만 잡고, 전송은 락을 놓은 뒤에 한다.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::channel::DatagramChannel;
use crate::config::Config;
use crate::send_window::{Retransmission, SendWindow};
use crate::stats::TransferStats;
use crate::Result;

/// 이 횟수 이상 재전송된 슬롯은 경고
const RETRANSMIT_WARN_ATTEMPTS: u32 = 8;

/// 재전송 타임아웃 정책
#[derive(Debug, Clone, Copy)]
pub struct RetransmitPolicy {
    base: Duration,
    max: Duration,
    backoff: bool,
}

impl RetransmitPolicy {
    /// 고정 타임아웃
    pub fn fixed(timeout: Duration) -> Self {
        Self {
            base: timeout,
            max: timeout,
            backoff: false,
        }
    }

    /// 지수 백오프 (`max`에서 포화)
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            backoff: true,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        if config.retransmit_backoff {
            Self::exponential(config.retransmit_timeout(), config.max_retransmit_timeout())
        } else {
            Self::fixed(config.retransmit_timeout())
        }
    }

    pub fn base_timeout(&self) -> Duration {
        self.base
    }

    /// `transmissions`번 전송된 슬롯의 타임아웃
    pub fn timeout_for(&self, transmissions: u32) -> Duration {
        if !self.backoff {
            return self.base;
        }
        let shift = transmissions.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << shift).min(self.max)
    }
}

/// 재전송 타이머 태스크
pub struct RetransmitTimer<C> {
    window: Arc<Mutex<SendWindow>>,
    stats: Arc<RwLock<TransferStats>>,
    channel: Arc<C>,
    destination: SocketAddr,
    policy: RetransmitPolicy,
    interval: Duration,
}

impl<C: DatagramChannel> RetransmitTimer<C> {
    pub fn new(
        window: Arc<Mutex<SendWindow>>,
        stats: Arc<RwLock<TransferStats>>,
        channel: Arc<C>,
        destination: SocketAddr,
        policy: RetransmitPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            window,
            stats,
            channel,
            destination,
            policy,
            interval,
        }
    }

    /// 한 번 스캔해서 재전송할 목록을 돌려준다 (통계 반영)
    pub fn collect_due(&self, now: Instant) -> Vec<Retransmission> {
        let due = self.window.lock().sweep(now, &self.policy);
        if !due.is_empty() {
            self.stats.write().retransmitted_frames += due.len() as u64;
        }
        due
    }

    /// `running`이 꺼질 때까지 스캔 반복
    pub async fn run(self, running: Arc<AtomicBool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while running.load(Ordering::Relaxed) {
            ticker.tick().await;

            for retransmission in self.collect_due(Instant::now()) {
                if retransmission.probe {
                    debug!("0 윈도우 탐침: seq={}", retransmission.sequence);
                } else if retransmission.attempt >= RETRANSMIT_WARN_ATTEMPTS {
                    warn!(
                        "seq={} 재전송 {}회째, 수신자 응답 없음",
                        retransmission.sequence, retransmission.attempt
                    );
                } else {
                    debug!(
                        "Retransmit seq={} (attempt {})",
                        retransmission.sequence, retransmission.attempt
                    );
                }
                self.channel
                    .send_to(&retransmission.datagram, self.destination)
                    .await?;
            }
        }

        Ok(())
    }
}

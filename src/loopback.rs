//! 인메모리 데이터그램 네트워크
//!
//! 실제 소켓 없이 엔진을 검증하기 위한 [`DatagramChannel`] 구현.
//! 장애 모델:
//!
//! | 장애        | 설명                                           |
//! |-------------|------------------------------------------------|
//! | 손실        | `loss_rate` 확률로 폐기 (시드 고정 RNG)        |
//! | 중복        | `duplicate_rate` 확률로 두 번 전달             |
//! | 지정 폐기   | 조건에 맞는 데이터그램을 처음 N개만 폐기       |
//! | 지연        | 조건에 맞는 데이터그램을 지연 후 전달 (순서 뒤바뀜) |
//!
//! 모든 전송은 장애 적용 전에 목적지별 로그에 기록된다.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::trace;

use crate::channel::DatagramChannel;
use crate::{Error, Result};

type Datagram = (Bytes, SocketAddr);
type Matcher = Box<dyn Fn(&[u8]) -> bool + Send>;

struct DropRule {
    matcher: Matcher,
    remaining: usize,
}

struct DelayRule {
    matcher: Matcher,
    delay: Duration,
    remaining: usize,
}

/// 무작위 장애 설정
#[derive(Debug, Clone, Default)]
pub struct FaultModel {
    /// 손실 확률 (0.0 ~ 1.0)
    pub loss_rate: f64,

    /// 중복 확률 (0.0 ~ 1.0)
    pub duplicate_rate: f64,
}

struct NetworkInner {
    endpoints: HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    faults: FaultModel,
    rng: StdRng,
    drop_rules: Vec<DropRule>,
    delay_rules: Vec<DelayRule>,
    sent: HashMap<SocketAddr, Vec<Bytes>>,
}

/// 인메모리 네트워크 (복제 가능한 핸들)
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// 장애 없는 네트워크
    pub fn new() -> Self {
        Self::with_faults(FaultModel::default(), 0)
    }

    /// 무작위 장애 + 고정 시드
    pub fn with_faults(faults: FaultModel, seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NetworkInner {
                endpoints: HashMap::new(),
                faults,
                rng: StdRng::seed_from_u64(seed),
                drop_rules: Vec::new(),
                delay_rules: Vec::new(),
                sent: HashMap::new(),
            })),
        }
    }

    /// 주소에 엔드포인트 바인드
    pub fn bind(&self, addr: SocketAddr) -> Result<MemoryChannel> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if inner.endpoints.contains_key(&addr) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("{} 이미 사용 중", addr),
            )));
        }
        inner.endpoints.insert(addr, tx);

        Ok(MemoryChannel {
            local_addr: addr,
            network: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    /// 조건에 맞는 데이터그램을 처음 `count`개 폐기
    pub fn drop_first<F>(&self, count: usize, matcher: F)
    where
        F: Fn(&[u8]) -> bool + Send + 'static,
    {
        self.inner.lock().drop_rules.push(DropRule {
            matcher: Box::new(matcher),
            remaining: count,
        });
    }

    /// 조건에 맞는 데이터그램을 처음 `count`개 지연 전달
    pub fn delay_first<F>(&self, count: usize, delay: Duration, matcher: F)
    where
        F: Fn(&[u8]) -> bool + Send + 'static,
    {
        self.inner.lock().delay_rules.push(DelayRule {
            matcher: Box::new(matcher),
            delay,
            remaining: count,
        });
    }

    /// 목적지로 전송 시도된 모든 데이터그램 (장애 적용 전)
    pub fn sent_to(&self, addr: SocketAddr) -> Vec<Bytes> {
        self.inner.lock().sent.get(&addr).cloned().unwrap_or_default()
    }

    fn unbind(&self, addr: SocketAddr) {
        self.inner.lock().endpoints.remove(&addr);
    }

    fn deliver(&self, bytes: &[u8], from: SocketAddr, to: SocketAddr) {
        let datagram = Bytes::copy_from_slice(bytes);
        let mut inner = self.inner.lock();
        inner.sent.entry(to).or_default().push(datagram.clone());

        if let Some(rule) = inner
            .drop_rules
            .iter_mut()
            .find(|rule| rule.remaining > 0 && (rule.matcher)(bytes))
        {
            rule.remaining -= 1;
            trace!("loopback: {} → {} 지정 폐기", from, to);
            return;
        }

        let loss_rate = inner.faults.loss_rate;
        if loss_rate > 0.0 && inner.rng.gen_bool(loss_rate.min(1.0)) {
            trace!("loopback: {} → {} 무작위 손실", from, to);
            return;
        }

        let duplicate_rate = inner.faults.duplicate_rate;
        let copies = if duplicate_rate > 0.0 && inner.rng.gen_bool(duplicate_rate.min(1.0)) {
            2
        } else {
            1
        };

        // 목적지가 없으면 UDP처럼 조용히 사라진다
        let Some(tx) = inner.endpoints.get(&to).cloned() else {
            return;
        };

        let delay = inner
            .delay_rules
            .iter_mut()
            .find(|rule| rule.remaining > 0 && (rule.matcher)(bytes))
            .map(|rule| {
                rule.remaining -= 1;
                rule.delay
            });
        drop(inner);

        match delay {
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for _ in 0..copies {
                        let _ = tx.send((datagram.clone(), from));
                    }
                });
            }
            None => {
                for _ in 0..copies {
                    let _ = tx.send((datagram.clone(), from));
                }
            }
        }
    }
}

/// [`MemoryNetwork`]에 바인드된 엔드포인트
pub struct MemoryChannel {
    local_addr: SocketAddr,
    network: MemoryNetwork,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl DatagramChannel for MemoryChannel {
    async fn send_to(&self, bytes: &[u8], destination: SocketAddr) -> Result<()> {
        self.network.deliver(bytes, self.local_addr, destination);
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let (datagram, from) = self.rx.lock().await.recv().await.ok_or(Error::ChannelClosed)?;
        // UDP와 같이 버퍼보다 긴 데이터그램은 잘린다
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok((len, from))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.network.unbind(self.local_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_delivery_and_log() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1)).unwrap();
        let b = net.bind(addr(2)).unwrap();

        a.send_to(b"hello", addr(2)).await.unwrap();
        let mut buf = [0u8; 32];
        let (len, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, addr(1));
        assert_eq!(net.sent_to(addr(2)).len(), 1);
    }

    #[tokio::test]
    async fn test_drop_first_only_drops_count() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1)).unwrap();
        let b = net.bind(addr(2)).unwrap();
        net.drop_first(1, |bytes| bytes == b"x");

        a.send_to(b"x", addr(2)).await.unwrap();
        a.send_to(b"x", addr(2)).await.unwrap();

        let mut buf = [0u8; 8];
        let (len, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"x");
        assert!(tokio::time::timeout(Duration::from_millis(20), b.recv_from(&mut buf))
            .await
            .is_err());
        assert_eq!(net.sent_to(addr(2)).len(), 2);
    }

    #[tokio::test]
    async fn test_delay_reorders() {
        let net = MemoryNetwork::new();
        let a = net.bind(addr(1)).unwrap();
        let b = net.bind(addr(2)).unwrap();
        net.delay_first(1, Duration::from_millis(30), |bytes| bytes == b"first");

        a.send_to(b"first", addr(2)).await.unwrap();
        a.send_to(b"second", addr(2)).await.unwrap();

        let mut buf = [0u8; 8];
        let (len, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"second");
        let (len, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"first");
    }

    #[test]
    fn test_double_bind_rejected() {
        let net = MemoryNetwork::new();
        let _a = net.bind(addr(1)).unwrap();
        assert!(net.bind(addr(1)).is_err());
    }
}

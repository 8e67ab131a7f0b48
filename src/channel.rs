//! 데이터그램 채널 추상화
//!
//! 엔진은 소켓을 직접 만지지 않고 [`DatagramChannel`]만 사용한다.
//! 실제 전송은 [`UdpChannel`], 테스트는 [`crate::loopback::MemoryChannel`].

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::Result;

/// 비신뢰/비순서 데이터그램 전송 계층
pub trait DatagramChannel: Send + Sync + 'static {
    /// 데이터그램 하나 전송
    fn send_to(
        &self,
        bytes: &[u8],
        destination: SocketAddr,
    ) -> impl Future<Output = Result<()>> + Send;

    /// 데이터그램 하나 수신 (블로킹). 타임아웃은 호출측에서 건다.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, SocketAddr)>> + Send;

    /// 바인드된 로컬 주소
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// tokio UDP 소켓 기반 채널
#[derive(Debug)]
pub struct UdpChannel {
    socket: UdpSocket,
}

impl UdpChannel {
    /// 로컬 주소에 바인드 (`0.0.0.0:0`이면 OS가 포트 할당)
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl DatagramChannel for UdpChannel {
    async fn send_to(&self, bytes: &[u8], destination: SocketAddr) -> Result<()> {
        self.socket.send_to(bytes, destination).await?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

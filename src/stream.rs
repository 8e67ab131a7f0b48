//! 바이트 소스/싱크
//!
//! - [`ByteSource`]: 최대 `max_bytes`까지 순차적으로 청크를 읽는다
//! - [`ByteSink`]: 생성(절단) 후 append만 한다

use std::path::Path;

use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Take};

use crate::Result;

/// 청크 단위 순차 읽기
pub struct ByteSource<R> {
    reader: Take<R>,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin + Send> ByteSource<R> {
    /// `max_bytes`까지만 읽는 소스
    pub fn new(reader: R, max_bytes: u64) -> Self {
        Self {
            reader: reader.take(max_bytes),
            bytes_read: 0,
        }
    }

    /// 제한 없는 소스
    pub fn unbounded(reader: R) -> Self {
        Self::new(reader, u64::MAX)
    }

    /// 다음 청크. 마지막 청크만 `max_len`보다 짧을 수 있고, 소진되면 None.
    pub async fn next_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>> {
        let mut buf = BytesMut::zeroed(max_len);
        let mut filled = 0;

        // 짧은 read가 와도 청크를 가득 채운다
        while filled < max_len {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }

        buf.truncate(filled);
        self.bytes_read += filled as u64;
        Ok(Some(buf.freeze()))
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl ByteSource<File> {
    /// 파일 열기
    pub async fn open(path: impl AsRef<Path>, max_bytes: u64) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::new(file, max_bytes))
    }
}

/// append 전용 싱크
pub struct ByteSink<W> {
    writer: W,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin + Send> ByteSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            bytes_written: 0,
        }
    }

    /// 순서대로 이어 쓰기
    pub async fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl ByteSink<File> {
    /// 대상 파일 생성 (기존 내용은 절단)
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path).await?;
        Ok(Self::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_splits_into_chunks() {
        let data: Vec<u8> = (0..35).collect();
        let mut source = ByteSource::unbounded(&data[..]);

        let mut sizes = Vec::new();
        let mut joined = Vec::new();
        while let Some(chunk) = source.next_chunk(10).await.unwrap() {
            sizes.push(chunk.len());
            joined.extend_from_slice(&chunk);
        }

        assert_eq!(sizes, vec![10, 10, 10, 5]);
        assert_eq!(joined, data);
        assert_eq!(source.bytes_read(), 35);
    }

    #[tokio::test]
    async fn test_respects_max_bytes() {
        let data = vec![7u8; 100];
        let mut source = ByteSource::new(&data[..], 25);

        let mut total = 0;
        while let Some(chunk) = source.next_chunk(10).await.unwrap() {
            total += chunk.len();
        }
        assert_eq!(total, 25);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let mut source = ByteSource::unbounded(&b""[..]);
        assert!(source.next_chunk(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sink_appends() {
        let mut sink = ByteSink::new(Vec::new());
        sink.append(b"abc").await.unwrap();
        sink.append(b"de").await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(sink.bytes_written(), 5);
        assert_eq!(sink.into_inner(), b"abcde");
    }

    #[tokio::test]
    async fn test_file_sink_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        tokio::fs::write(&path, b"old contents that are long").await.unwrap();

        let mut sink = ByteSink::create(&path).await.unwrap();
        sink.append(b"new").await.unwrap();
        sink.flush().await.unwrap();
        drop(sink);

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"new");
    }
}

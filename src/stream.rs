//! 流式文件访问
//!
//! 按条目读取的简单封装，语义对齐 fread/fseek：
//! 读取返回完整条目数，条目不足时尾部字节留在缓冲区但不计数。
//! 预读提示会被记录，但当前不触发任何预读，所有调用直通内层句柄。

use std::io::{self, Read, Seek, SeekFrom};

/// 流式打开的文件
pub struct StreamedFile<R> {
    inner: R,
    read_ahead_hint: usize,
}

impl<R: Read + Seek> StreamedFile<R> {
    /// 开始流式访问
    ///
    /// `read_ahead_hint` 是调用方建议的预读量（字节）
    pub fn begin(inner: R, read_ahead_hint: usize) -> Self {
        log::debug!("Streamed file opened, read-ahead hint: {} bytes", read_ahead_hint);
        Self {
            inner,
            read_ahead_hint,
        }
    }

    /// 结束流式访问，归还内层句柄
    pub fn end(self) -> R {
        self.inner
    }

    /// 读取至多 `item_count` 个 `item_size` 字节的条目
    ///
    /// 返回读到的完整条目数。缓冲区必须至少容纳
    /// `item_size * item_count` 字节，不足时按缓冲区长度截断
    pub fn read_items(
        &mut self,
        buffer: &mut [u8],
        item_size: usize,
        item_count: usize,
    ) -> io::Result<usize> {
        if item_size == 0 || item_count == 0 {
            return Ok(0);
        }

        let wanted = (item_size * item_count).min(buffer.len());
        let mut filled = 0;
        while filled < wanted {
            match self.inner.read(&mut buffer[filled..wanted]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled / item_size)
    }

    /// 移动读取位置
    pub fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }

    /// 调用方建议的预读量（字节）
    pub fn read_ahead_hint(&self) -> usize {
        self.read_ahead_hint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_items_counts_whole_items() {
        let data: Vec<u8> = (0..10).collect();
        let mut stream = StreamedFile::begin(Cursor::new(data), 0);

        let mut buffer = [0u8; 12];
        // 只有 10 字节可读，第 3 个条目不完整
        let items = stream.read_items(&mut buffer, 4, 3).unwrap();
        assert_eq!(items, 2);
        assert_eq!(&buffer[..10], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_read_items_after_seek() {
        let data: Vec<u8> = (0..16).collect();
        let mut stream = StreamedFile::begin(Cursor::new(data), 4096);

        stream.seek(SeekFrom::Start(4)).unwrap();
        let mut buffer = [0u8; 8];
        let items = stream.read_items(&mut buffer, 2, 4).unwrap();
        assert_eq!(items, 4);
        assert_eq!(&buffer, &[4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_read_items_zero_count_is_noop() {
        let mut stream = StreamedFile::begin(Cursor::new(vec![1u8, 2, 3]), 0);
        let mut buffer = [0u8; 4];
        assert_eq!(stream.read_items(&mut buffer, 4, 0).unwrap(), 0);
        assert_eq!(stream.read_items(&mut buffer, 0, 4).unwrap(), 0);
    }

    #[test]
    fn test_end_returns_inner_at_current_position() {
        let data: Vec<u8> = (0..8).collect();
        let mut stream = StreamedFile::begin(Cursor::new(data), 0);

        let mut buffer = [0u8; 4];
        stream.read_items(&mut buffer, 4, 1).unwrap();

        let inner = stream.end();
        assert_eq!(inner.position(), 4);
    }

    #[test]
    fn test_hint_is_recorded() {
        let stream = StreamedFile::begin(Cursor::new(Vec::new()), 65536);
        assert_eq!(stream.read_ahead_hint(), 65536);
    }
}

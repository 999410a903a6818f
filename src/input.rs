//! Random-access byte sources the decoder reads from.

use std::io::{self, Read, Seek, SeekFrom};

pub trait ByteSource {
    /// Read up to `buf.len()` bytes at `offset`. Returns how many were read;
    /// 0 means end of input.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total length in bytes, if known.
    fn size(&mut self) -> Option<u64>;

    /// Fill as much of `buf` as the source holds, retrying short reads.
    fn read_full_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.read_at(offset + done as u64, &mut buf[done..]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }
}

fn read_slice(data: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= data.len() {
        return 0;
    }
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

impl ByteSource for &[u8] {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        Ok(read_slice(self, offset, buf))
    }

    fn size(&mut self) -> Option<u64> {
        Some(self.len() as u64)
    }
}

impl ByteSource for Vec<u8> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        Ok(read_slice(self, offset, buf))
    }

    fn size(&mut self) -> Option<u64> {
        Some(self.len() as u64)
    }
}

impl<B: ByteSource + ?Sized> ByteSource for &mut B {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&mut self) -> Option<u64> {
        (**self).size()
    }
}

/// Adapter for files and other `Read + Seek` streams.
#[derive(Debug)]
pub struct SeekSource<R> {
    inner: R,
    size: Option<u64>,
}

impl<R: Read + Seek> SeekSource<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let size = inner.seek(SeekFrom::End(0))?;
        Ok(SeekSource {
            inner,
            size: Some(size),
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> ByteSource for SeekSource<R> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read(buf)
    }

    fn size(&mut self) -> Option<u64> {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn slices_stop_at_the_end() {
        let mut src: &[u8] = &[1, 2, 3];
        let mut buf = [0u8; 4];
        assert_eq!(src.read_full_at(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[2, 3]);
        assert_eq!(src.read_at(3, &mut buf).unwrap(), 0);
        assert_eq!(src.read_at(u64::MAX, &mut buf).unwrap(), 0);
        assert_eq!(src.size(), Some(3));
    }

    #[test]
    fn seek_source_reads_at_offsets() {
        let mut src = SeekSource::new(Cursor::new(vec![9u8, 8, 7, 6])).unwrap();
        assert_eq!(src.size(), Some(4));
        let mut buf = [0u8; 2];
        assert_eq!(src.read_full_at(2, &mut buf).unwrap(), 2);
        assert_eq!(buf, [7, 6]);
        assert_eq!(src.read_full_at(0, &mut buf).unwrap(), 2);
        assert_eq!(buf, [9, 8]);
    }
}

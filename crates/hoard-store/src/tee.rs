use std::io::{self, Read, Seek, SeekFrom, Write};

/// Duplicates every write into two sinks; the first error wins and is
/// reported to the caller.
pub struct TeeWriter<A, B> {
    pub a: A,
    pub b: B,
}

impl<A, B> TeeWriter<A, B> {
    pub fn new(a: A, b: B) -> Self {
        Self { a, b }
    }
}

impl<A: Write, B: Write> Write for TeeWriter<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.a.write_all(buf)?;
        self.b.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

/// Default spill threshold for [`Spool`]: streams at or under this stay in
/// memory.
pub const SPOOL_MEMORY_LIMIT: usize = 1 << 20;

/// Seekable view over a one-shot stream.
///
/// Small streams are buffered in memory; anything larger spills to a
/// scratch file that is removed when the spool is dropped.
pub enum Spool {
    Memory(io::Cursor<Vec<u8>>),
    File(tempfile::NamedTempFile),
}

impl Spool {
    /// Drain `source` into a spool with the default memory limit.
    pub fn from_reader(source: &mut dyn Read) -> io::Result<Self> {
        Self::with_limit(source, SPOOL_MEMORY_LIMIT)
    }

    pub fn with_limit(source: &mut dyn Read, memory_limit: usize) -> io::Result<Self> {
        let mut buf = Vec::new();
        let mut limited = source.take(memory_limit as u64 + 1);
        limited.read_to_end(&mut buf)?;
        if buf.len() <= memory_limit {
            return Ok(Spool::Memory(io::Cursor::new(buf)));
        }
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(&buf)?;
        io::copy(source, &mut file)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Spool::File(file))
    }

    pub fn len(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(pos))?;
        Ok(end)
    }
}

impl Read for Spool {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Spool::Memory(c) => c.read(buf),
            Spool::File(f) => f.read(buf),
        }
    }
}

impl Seek for Spool {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Spool::Memory(c) => c.seek(pos),
            Spool::File(f) => f.seek(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tee_duplicates_writes() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        {
            let mut tee = TeeWriter::new(&mut a, &mut b);
            tee.write_all(b"fan ").unwrap();
            tee.write_all(b"out").unwrap();
        }
        assert_eq!(a, b"fan out");
        assert_eq!(a, b);
    }

    #[test]
    fn small_stream_stays_in_memory() {
        let mut src = io::Cursor::new(vec![7u8; 128]);
        let mut spool = Spool::with_limit(&mut src, 1024).unwrap();
        assert!(matches!(spool, Spool::Memory(_)));
        assert_eq!(spool.len().unwrap(), 128);
    }

    #[test]
    fn large_stream_spills_and_seeks() {
        let data: Vec<u8> = (0..4096u32).map(|i| i as u8).collect();
        let mut src = io::Cursor::new(data.clone());
        let mut spool = Spool::with_limit(&mut src, 1024).unwrap();
        assert!(matches!(spool, Spool::File(_)));
        assert_eq!(spool.len().unwrap(), 4096);

        spool.seek(SeekFrom::Start(1000)).unwrap();
        let mut got = vec![0u8; 8];
        spool.read_exact(&mut got).unwrap();
        assert_eq!(got, data[1000..1008]);
    }
}

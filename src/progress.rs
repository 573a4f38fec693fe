//! Progress tracking.
//!
//! `ProgressReader` wraps the input file reader and reports the running byte
//! count to a callback, which feeds the progress bar. It sits below the
//! decompressor so the count tracks compressed file bytes, matching the
//! file size the bar is sized with.

use std::io::Read;

pub struct ProgressReader<R: Read> {
    reader: R,
    callback: Box<dyn Fn(u64)>,
    bytes_read: u64,
}

impl<R: Read> ProgressReader<R> {
    /// The callback receives the total bytes read so far after each
    /// successful read.
    pub fn new<F>(reader: R, callback: F) -> Self
    where
        F: Fn(u64) + 'static,
    {
        Self {
            reader,
            callback: Box::new(callback),
            bytes_read: 0,
        }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.bytes_read += n as u64;
        (self.callback)(self.bytes_read);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_reports_cumulative_bytes() {
        let seen = Rc::new(Cell::new(0u64));
        let seen_clone = seen.clone();

        let data = vec![0u8; 10];
        let mut reader = ProgressReader::new(&data[..], move |n| seen_clone.set(n));

        let mut buf = [0u8; 4];
        reader.read(&mut buf).unwrap();
        assert_eq!(seen.get(), 4);
        reader.read(&mut buf).unwrap();
        assert_eq!(seen.get(), 8);
    }
}

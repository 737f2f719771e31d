use crate::core::errors::{Result, WorkshareError};
use parking_lot::{Mutex, MutexGuard};
use std::fs::File;
use std::io::{BufWriter, Stdout, Write};
use std::path::Path;
use std::sync::Arc;

/// Output handle shared by many workers
///
/// Every write call holds the sink's lock for the whole line or record, so
/// output from different workers never interleaves mid-line.
#[derive(Debug)]
pub struct SharedSink<W> {
    writer: Arc<Mutex<W>>,
}

impl<W> Clone for SharedSink<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
        }
    }
}

impl SharedSink<BufWriter<File>> {
    /// Create (or truncate) a file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| WorkshareError::io(format!("create {}", path.display()), e))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl SharedSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> SharedSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, W> {
        self.writer.lock()
    }

    /// Write `line` followed by a newline
    pub fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = self.lock();
        writeln!(writer, "{line}").map_err(|e| WorkshareError::io("write_line", e))
    }

    /// Write `fields` joined by `separator`, followed by a newline
    pub fn write_record(&self, fields: &[&str], separator: &str) -> Result<()> {
        self.write_line(&fields.join(separator))
    }

    pub fn flush(&self) -> Result<()> {
        self.lock()
            .flush()
            .map_err(|e| WorkshareError::io("flush", e))
    }

    /// Run `f` against the underlying writer under the sink's lock
    pub fn with_inner<R>(&self, f: impl FnOnce(&mut W) -> R) -> Result<R> {
        let mut writer = self.lock();
        Ok(f(&mut writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;

    #[test]
    fn test_lines_do_not_interleave() {
        let sink = SharedSink::new(Vec::new());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let sink = sink.clone();
                thread::spawn(move || {
                    let name = format!("worker{w}");
                    for i in 0..25 {
                        let index = i.to_string();
                        sink.write_record(&[name.as_str(), index.as_str()], "\t")
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let text = sink
            .with_inner(|buf| String::from_utf8(buf.clone()).unwrap())
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 100);
        assert!(lines.iter().all(|l| l.starts_with("worker") && l.contains('\t')));
    }

    #[test]
    fn test_write_line() {
        let sink = SharedSink::new(Vec::new());
        sink.write_line(">seq1").unwrap();
        sink.write_line("ACGT").unwrap();
        sink.flush().unwrap();
        let bytes = sink.with_inner(|buf| buf.clone()).unwrap();
        assert_eq!(bytes, b">seq1\nACGT\n".to_vec());
    }

    #[test]
    fn test_create_writes_file() {
        let path = std::env::temp_dir().join(format!("workshare-sink-{}.tsv", std::process::id()));
        let sink = SharedSink::create(&path).unwrap();
        sink.write_record(&["id", "len"], "\t").unwrap();
        sink.flush().unwrap();
        drop(sink);

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(content, "id\tlen\n");
    }

    #[test]
    fn test_panic_under_lock_leaves_sink_usable() {
        let sink = SharedSink::new(Vec::new());
        sink.write_line("before").unwrap();

        let crashed = {
            let sink = sink.clone();
            thread::spawn(move || {
                sink.with_inner(|_| panic!("writer callback failed")).ok();
            })
            .join()
        };
        assert!(crashed.is_err());

        sink.write_line("after").unwrap();
        let bytes = sink.with_inner(|buf| buf.clone()).unwrap();
        assert_eq!(bytes, b"before\nafter\n".to_vec());
    }
}

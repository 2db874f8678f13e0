//! FASTA/FASTQ input and output.
//!
//! Parsing (plain or gzip) is delegated to `needletail`; writing is plain text, gzip-encoded
//! with `flate2` when the path ends in `.gz`. `-` and `stdin`/`stdout` name the standard
//! streams.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use needletail::{FastxReader, parse_fastx_file, parse_fastx_reader};

use crate::error::DukError;
use crate::pipeline::{ReadSink, ReadSource};
use crate::read::{Read, ReadPair};

/// Pairs per input batch.
pub const DEFAULT_BATCH: usize = 200;
/// ASCII offset of FASTQ qualities.
const QUAL_OFFSET: u8 = 33;

fn is_std_stream(path: &Path) -> bool {
    matches!(path.to_str(), Some("-" | "stdin" | "stdout"))
}

fn open_fastx(path: &Path) -> Result<Box<dyn FastxReader>, DukError> {
    let label = path.display().to_string();
    if is_std_stream(path) {
        parse_fastx_reader(io::stdin()).map_err(|e| DukError::parse(label, e))
    } else {
        parse_fastx_file(path).map_err(|e| DukError::parse(label, e))
    }
}

/// Reference sequences, one `(name, bases)` at a time.
pub struct ReferenceReader {
    label: String,
    inner: Box<dyn FastxReader>,
}

impl ReferenceReader {
    pub fn open(path: &Path) -> Result<Self, DukError> {
        Ok(Self {
            label: path.display().to_string(),
            inner: open_fastx(path)?,
        })
    }

    pub fn next_record(&mut self) -> Result<Option<(String, Vec<u8>)>, DukError> {
        match self.inner.next() {
            None => Ok(None),
            Some(Err(e)) => Err(DukError::parse(self.label.as_str(), e)),
            Some(Ok(rec)) => {
                let name = String::from_utf8_lossy(rec.id()).into_owned();
                Ok(Some((name, rec.seq().into_owned())))
            }
        }
    }
}

/// Reads from one file, two mate files, or one interleaved file.
pub struct FastxSource {
    r1: Box<dyn FastxReader>,
    r2: Option<Box<dyn FastxReader>>,
    label1: String,
    label2: String,
    interleaved: bool,
    batch_size: usize,
    max_reads: Option<u64>,
    pairs_read: u64,
}

impl FastxSource {
    pub fn open(path1: &Path, path2: Option<&Path>, interleaved: bool) -> Result<Self, DukError> {
        let r2 = path2.map(open_fastx).transpose()?;
        Ok(Self {
            r1: open_fastx(path1)?,
            label1: path1.display().to_string(),
            label2: path2.map(|p| p.display().to_string()).unwrap_or_default(),
            interleaved: interleaved && r2.is_none(),
            r2,
            batch_size: DEFAULT_BATCH,
            max_reads: None,
            pairs_read: 0,
        })
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    /// Stop after this many pairs.
    pub fn with_max_reads(mut self, n: Option<u64>) -> Self {
        self.max_reads = n;
        self
    }

    fn next_read(reader: &mut dyn FastxReader, label: &str, numeric_id: u64) -> Result<Option<Read>, DukError> {
        let rec = match reader.next() {
            None => return Ok(None),
            Some(rec) => rec.map_err(|e| DukError::parse(label, e))?,
        };
        let quality = rec
            .qual()
            .map(|q| q.iter().map(|&c| c.saturating_sub(QUAL_OFFSET)).collect());
        let mut read = Read::new(String::from_utf8_lossy(rec.id()).into_owned(), rec.seq().into_owned(), quality);
        read.numeric_id = numeric_id;
        Ok(Some(read))
    }
}

impl ReadSource for FastxSource {
    fn next_batch(&mut self) -> Result<Option<Vec<ReadPair>>, DukError> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            if self.max_reads.is_some_and(|m| self.pairs_read >= m) {
                break;
            }
            let id = self.pairs_read;
            let Some(first) = Self::next_read(self.r1.as_mut(), &self.label1, id)? else {
                break;
            };
            let mate = if let Some(r2) = self.r2.as_mut() {
                let m = Self::next_read(r2.as_mut(), &self.label2, id)?;
                if m.is_none() {
                    return Err(DukError::parse(self.label2.as_str(), "fewer reads than the first mate file"));
                }
                m
            } else if self.interleaved {
                let m = Self::next_read(self.r1.as_mut(), &self.label1, id)?;
                if m.is_none() {
                    return Err(DukError::parse(self.label1.as_str(), "odd number of interleaved reads"));
                }
                m
            } else {
                None
            };
            self.pairs_read += 1;
            batch.push(match mate {
                Some(m) => ReadPair::paired(first, m),
                None => ReadPair::single(first),
            });
        }
        Ok((!batch.is_empty()).then_some(batch))
    }
}

/// A text output stream, optionally gzip-compressed.
enum Output {
    Plain(BufWriter<Box<dyn Write + Send>>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Output {
    fn create(path: &Path) -> Result<Self, DukError> {
        if is_std_stream(path) {
            let w: Box<dyn Write + Send> = Box::new(io::stdout());
            return Ok(Output::Plain(BufWriter::new(w)));
        }
        let file = File::create(path)?;
        if path.extension().is_some_and(|e| e == "gz") {
            Ok(Output::Gzip(GzEncoder::new(BufWriter::new(file), Compression::default())))
        } else {
            let w: Box<dyn Write + Send> = Box::new(file);
            Ok(Output::Plain(BufWriter::new(w)))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Output::Plain(w) => w,
            Output::Gzip(w) => w,
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        match self {
            Output::Plain(w) => w.flush(),
            Output::Gzip(w) => {
                w.try_finish()?;
                w.get_mut().flush()
            }
        }
    }
}

/// FASTQ (reads with qualities) or FASTA writer; mates go to a second stream or are
/// interleaved into the first.
pub struct FastxWriter {
    out1: Output,
    out2: Option<Output>,
    label: String,
}

impl FastxWriter {
    pub fn create(path1: &Path, path2: Option<&Path>) -> Result<Self, DukError> {
        Ok(Self {
            out1: Output::create(path1)?,
            out2: path2.map(Output::create).transpose()?,
            label: path1.display().to_string(),
        })
    }

    fn write_read(w: &mut dyn Write, r: &Read) -> io::Result<()> {
        match &r.quality {
            Some(q) => {
                w.write_all(b"@")?;
                w.write_all(r.id.as_bytes())?;
                w.write_all(b"\n")?;
                w.write_all(&r.bases)?;
                w.write_all(b"\n+\n")?;
                let ascii: Vec<u8> = q.iter().map(|&p| p.saturating_add(QUAL_OFFSET)).collect();
                w.write_all(&ascii)?;
                w.write_all(b"\n")
            }
            None => {
                w.write_all(b">")?;
                w.write_all(r.id.as_bytes())?;
                w.write_all(b"\n")?;
                w.write_all(&r.bases)?;
                w.write_all(b"\n")
            }
        }
    }

    fn write_pairs(&mut self, pairs: &[ReadPair]) -> io::Result<()> {
        for pair in pairs {
            Self::write_read(self.out1.writer(), &pair.first)?;
            if let Some(mate) = &pair.mate {
                let w = match self.out2.as_mut() {
                    Some(o) => o.writer(),
                    None => self.out1.writer(),
                };
                Self::write_read(w, mate)?;
            }
        }
        Ok(())
    }
}

impl ReadSink for FastxWriter {
    fn write_batch(&mut self, pairs: &[ReadPair]) -> Result<(), DukError> {
        self.write_pairs(pairs)
            .map_err(|e| DukError::Output(format!("{}: {e}", self.label)))
    }

    fn finish(&mut self) -> Result<(), DukError> {
        let label = &self.label;
        self.out1
            .finish()
            .map_err(|e| DukError::Output(format!("{label}: {e}")))?;
        if let Some(o) = self.out2.as_mut() {
            o.finish().map_err(|e| DukError::Output(format!("{label} (mates): {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn fastq_round_trip_with_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fq.gz");
        let mut w = FastxWriter::create(&path, None).unwrap();
        let pair = ReadPair::paired(
            Read::new("a/1", b"ACGT".to_vec(), Some(vec![40, 30, 20, 10])),
            Read::new("a/2", b"TTGA".to_vec(), Some(vec![2, 2, 2, 2])),
        );
        w.write_batch(std::slice::from_ref(&pair)).unwrap();
        w.finish().unwrap();

        let mut text = String::new();
        flate2::read::GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "@a/1\nACGT\n+\nI?5+\n@a/2\nTTGA\n+\n####\n");

        let mut src = FastxSource::open(&path, None, true).unwrap();
        let batch = src.next_batch().unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].first.quality, Some(vec![40, 30, 20, 10]));
        assert_eq!(batch[0].mate.as_ref().unwrap().pairnum, 1);
        assert!(src.next_batch().unwrap().is_none());
    }

    #[test]
    fn max_reads_limits_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.fa");
        std::fs::write(&path, ">r1\nACGT\n>r2\nCCGG\n>r3\nTTAA\n").unwrap();
        let mut src = FastxSource::open(&path, None, false)
            .unwrap()
            .with_batch_size(2)
            .with_max_reads(Some(3));
        assert_eq!(src.next_batch().unwrap().unwrap().len(), 2);
        let last = src.next_batch().unwrap().unwrap();
        assert_eq!(last[0].first.id, "r3");
        assert_eq!(last[0].first.numeric_id, 2);
        assert!(last[0].first.quality.is_none());
        assert!(src.next_batch().unwrap().is_none());
    }

    #[test]
    fn reference_reader_yields_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.fa");
        std::fs::write(&path, ">adapter one\nAGATCGGAAGAGC\n").unwrap();
        let mut r = ReferenceReader::open(&path).unwrap();
        let (name, seq) = r.next_record().unwrap().unwrap();
        assert_eq!(name, "adapter one");
        assert_eq!(seq, b"AGATCGGAAGAGC");
        assert!(r.next_record().unwrap().is_none());
    }
}

use seq_io::fastq::{Reader, Record};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use flate2::read::GzDecoder;
use crate::utils::file::is_gzipped;

pub enum FastqReader {
    Uncompressed(BufReader<File>),
    Gzipped(GzDecoder<File>),
}

impl Read for FastqReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FastqReader::Uncompressed(r) => r.read(buf),
            FastqReader::Gzipped(r) => r.read(buf),
        }
    }
}

pub fn fastq_reader(path: &Path) -> io::Result<Reader<FastqReader>> {
    let file = File::open(path)?;
    let gzipped = match is_gzipped(path) {
        Ok(gz) => gz,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e),
    };
    let reader = if gzipped {
        Reader::new(FastqReader::Gzipped(GzDecoder::new(file)))
    } else {
        Reader::new(FastqReader::Uncompressed(BufReader::new(file)))
    };
    Ok(reader)
}


/// Mean sequence length over the first `max_reads` records.
///
/// # Arguments
///
/// * `path` - Plain or gzipped FASTQ.
/// * `max_reads` - Sample size.
///
/// # Returns
/// None for a FASTQ with no records.
pub fn mean_read_length(path: &Path, max_reads: usize) -> anyhow::Result<Option<f64>> {
    let mut reader = fastq_reader(path)?;
    let mut total: u64 = 0;
    let mut count: u64 = 0;

    while let Some(record) = reader.next() {
        let record = record.map_err(|e| anyhow::anyhow!("Bad FASTQ record in {}: {}", path.display(), e))?;
        total += record.seq().len() as u64;
        count += 1;
        if count as usize >= max_reads {
            break;
        }
    }

    if count == 0 {
        return Ok(None);
    }
    Ok(Some(total as f64 / count as f64))
}

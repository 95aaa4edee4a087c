//! Datafile primitives
//!
//! A datafile is a preallocated file of fixed maximal size, identified by
//! its fid tick. The first bytes hold a crc-checked header; the tail
//! reserves room for a footer. The storage layer only tracks the sizes
//! here; marker encoding and footer scans happen elsewhere.

use byteorder::{ByteOrder, LittleEndian};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};
use vellum_core::{Error, Result, Tick};

const MAGIC: u32 = 0x5644_4631; // "VDF1"
const HEADER_SIZE: u64 = 28;
const FOOTER_SIZE: u64 = 16;

/// A preallocated on-disk file with a crc-checked header
#[derive(Debug)]
pub struct Datafile {
    fid: Tick,
    path: PathBuf,
    maximal_size: u64,
    current_size: AtomicU64,
}

impl Datafile {
    /// Create a new datafile of `maximal_size` bytes
    pub fn create(path: &Path, fid: Tick, maximal_size: u64) -> Result<Datafile> {
        if maximal_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(Error::IllegalOption(format!(
                "datafile size {} is below the fixed overhead",
                maximal_size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        LittleEndian::write_u32(&mut header[0..4], MAGIC);
        LittleEndian::write_u32(&mut header[4..8], 1); // version
        LittleEndian::write_u64(&mut header[8..16], fid.as_u64());
        LittleEndian::write_u64(&mut header[16..24], maximal_size);
        let crc = crc32fast::hash(&header[0..24]);
        LittleEndian::write_u32(&mut header[24..28], crc);

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)
            .map_err(|err| {
                error!(path = %path.display(), %err, "unable to create datafile");
                Error::Io(err)
            })?;
        file.write_all(&header)?;
        file.set_len(maximal_size)?;
        file.sync_all()?;

        debug!(path = %path.display(), fid = %fid, size = maximal_size, "created datafile");
        Ok(Datafile {
            fid,
            path: path.to_path_buf(),
            maximal_size,
            current_size: AtomicU64::new(HEADER_SIZE),
        })
    }

    /// Open an existing datafile, verifying its header
    pub fn open(path: &Path) -> Result<Datafile> {
        let mut file = File::open(path)?;
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if LittleEndian::read_u32(&header[0..4]) != MAGIC {
            return Err(Error::Corruption(format!(
                "datafile {} has a bad magic value",
                path.display()
            )));
        }
        let stored_crc = LittleEndian::read_u32(&header[24..28]);
        if crc32fast::hash(&header[0..24]) != stored_crc {
            return Err(Error::Corruption(format!(
                "datafile {} failed its header checksum",
                path.display()
            )));
        }

        let fid = Tick(LittleEndian::read_u64(&header[8..16]));
        let maximal_size = LittleEndian::read_u64(&header[16..24]);

        Ok(Datafile {
            fid,
            path: path.to_path_buf(),
            maximal_size,
            current_size: AtomicU64::new(HEADER_SIZE),
        })
    }

    /// The file identifier tick
    pub fn fid(&self) -> Tick {
        self.fid
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fixed allocation size in bytes
    pub fn maximal_size(&self) -> u64 {
        self.maximal_size
    }

    /// Bytes used so far, including the header
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::SeqCst)
    }

    /// Bytes reserved for the footer
    pub fn footer_size(&self) -> u64 {
        FOOTER_SIZE
    }

    /// Record that `n` more bytes are in use
    pub fn advance(&self, n: u64) -> Result<()> {
        let used = self.current_size.load(Ordering::SeqCst);
        if used + n + FOOTER_SIZE > self.maximal_size {
            return Err(Error::IllegalOption(format!(
                "datafile {} cannot hold {} more bytes",
                self.path.display(),
                n
            )));
        }
        self.current_size.fetch_add(n, Ordering::SeqCst);
        Ok(())
    }

    /// Remove the backing file
    pub fn unlink(&self) -> Result<()> {
        debug!(path = %self.path.display(), "unlinking datafile");
        std::fs::remove_file(&self.path).map_err(Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datafile-1.db");

        let created = Datafile::create(&path, Tick(1), 4096).unwrap();
        assert_eq!(created.maximal_size(), 4096);
        assert_eq!(created.current_size(), HEADER_SIZE);

        let opened = Datafile::open(&path).unwrap();
        assert_eq!(opened.fid(), Tick(1));
        assert_eq!(opened.maximal_size(), 4096);
    }

    #[test]
    fn test_create_preallocates_full_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datafile-2.db");
        Datafile::create(&path, Tick(2), 8192).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8192);
    }

    #[test]
    fn test_open_rejects_corrupt_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datafile-3.db");
        Datafile::create(&path, Tick(3), 4096).unwrap();

        // flip a byte inside the checksummed region
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[9] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let err = Datafile::open(&path).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_advance_respects_footer_reservation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datafile-4.db");
        let df = Datafile::create(&path, Tick(4), 128).unwrap();

        let free = 128 - HEADER_SIZE - FOOTER_SIZE;
        df.advance(free).unwrap();
        assert!(df.advance(1).is_err());
    }

    #[test]
    fn test_rejects_undersized_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datafile-5.db");
        assert!(Datafile::create(&path, Tick(5), 16).is_err());
    }
}

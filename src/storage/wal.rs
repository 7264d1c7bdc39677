//! Write-ahead log with CRC-32 integrity checks.
//!
//! The log is an append-only file `db.wal` inside a per-collection `wal/`
//! directory: a fixed 24-byte header followed by framed entries, all
//! little-endian. Each entry carries two CRC-32s, one over the ordering
//! fields (op, version, lsn, txid) and one over the raw vector payload,
//! so a single flipped bit anywhere in a record is detected on read.
//! Every append is flushed and fsynced before returning; `File::sync_all`
//! maps to `fsync` on Linux, `F_FULLFSYNC` on Apple platforms, and
//! `FlushFileBuffers` on Windows.

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::binary::{ByteReader, ByteWriter};
use crate::config;
use crate::error::{Error, Result};
use crate::types::VectorId;

/// Magic number for the WAL file format: "AWL" + version byte.
pub const WAL_MAGIC: u32 = 0x41574C01;

/// Entry and header format version this build writes.
pub const WAL_FORMAT_VERSION: u16 = 1;

/// Wire size of the file header in bytes.
pub const WAL_HEADER_SIZE: usize = 24;

/// Name of the log file inside the WAL directory.
pub const WAL_FILE_NAME: &str = "db.wal";

/// Operation type of a WAL entry.
///
/// Only `Insert` and `Delete` are replayed today; the transaction and
/// batch types are reserved wire-format citizens and are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OperationType {
    CommitTxn = 1,
    AbortTxn = 2,
    Insert = 3,
    Delete = 4,
    Update = 5,
    BatchInsert = 6,
}

impl OperationType {
    /// Decodes a wire value; `None` for anything outside `[1, 6]`.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(OperationType::CommitTxn),
            2 => Some(OperationType::AbortTxn),
            3 => Some(OperationType::Insert),
            4 => Some(OperationType::Delete),
            5 => Some(OperationType::Update),
            6 => Some(OperationType::BatchInsert),
            _ => None,
        }
    }
}

/// WAL file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    /// Seconds since the Unix epoch at file creation.
    pub creation_time: u64,
}

impl WalHeader {
    /// Builds a header stamped with the current time.
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self {
            magic: WAL_MAGIC,
            version: WAL_FORMAT_VERSION,
            flags: 0,
            creation_time: now,
        }
    }

    /// CRC-32 over the 16 fixed bytes preceding the checksum field.
    pub fn compute_crc32(&self) -> u32 {
        let mut fixed = [0u8; 16];
        fixed[0..4].copy_from_slice(&self.magic.to_le_bytes());
        fixed[4..6].copy_from_slice(&self.version.to_le_bytes());
        fixed[6..8].copy_from_slice(&self.flags.to_le_bytes());
        fixed[8..16].copy_from_slice(&self.creation_time.to_le_bytes());
        crc32fast::hash(&fixed)
    }

    /// Serializes the header to its 24-byte wire form.
    pub fn encode(&self) -> [u8; WAL_HEADER_SIZE] {
        let mut buf = [0u8; WAL_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.creation_time.to_le_bytes());
        buf[16..20].copy_from_slice(&self.compute_crc32().to_le_bytes());
        // bytes 20..24 reserved
        buf
    }

    /// Parses and validates a header from the start of `raw`.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < WAL_HEADER_SIZE {
            return Err(Error::BadHeader(format!(
                "file too small for a WAL header: {} bytes",
                raw.len()
            )));
        }
        let mut r = ByteReader::new(raw);
        let magic = r.get_u32()?;
        if magic != WAL_MAGIC {
            return Err(Error::BadHeader(format!(
                "invalid WAL magic number: {magic:#010x}"
            )));
        }
        let header = Self {
            magic,
            version: r.get_u16()?,
            flags: r.get_u16()?,
            creation_time: r.get_u64()?,
        };
        let stored = r.get_u32()?;
        let computed = header.compute_crc32();
        if stored != computed {
            return Err(Error::ChecksumMismatch(format!(
                "WAL header CRC: stored={stored:#010x}, computed={computed:#010x}"
            )));
        }
        Ok(header)
    }
}

impl Default for WalHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    pub op: OperationType,
    pub version: u16,
    /// Log sequence number, assigned monotonically by the orchestrator.
    pub lsn: u64,
    /// Transaction id, currently one per mutation.
    pub txid: u64,
    pub vector_id: VectorId,
    /// Embedding length in floats; 0 for payload-free operations.
    pub dimension: u32,
    pub payload: Vec<f32>,
}

impl WalEntry {
    /// Builds an INSERT entry carrying the full embedding.
    pub fn insert(lsn: u64, txid: u64, vector_id: VectorId, embedding: Vec<f32>) -> Self {
        Self {
            op: OperationType::Insert,
            version: WAL_FORMAT_VERSION,
            lsn,
            txid,
            vector_id,
            dimension: embedding.len() as u32,
            payload: embedding,
        }
    }

    /// Builds a DELETE entry with an empty payload.
    pub fn delete(lsn: u64, txid: u64, vector_id: VectorId) -> Self {
        Self {
            op: OperationType::Delete,
            version: WAL_FORMAT_VERSION,
            lsn,
            txid,
            vector_id,
            dimension: 0,
            payload: Vec::new(),
        }
    }

    /// Payload length in bytes: `dimension * 4`.
    pub fn payload_length(&self) -> u32 {
        self.dimension * 4
    }

    /// CRC-32 over `{op, version, lsn, txid}` as wired.
    pub fn compute_header_crc(&self) -> u32 {
        entry_header_crc(self.op as u16, self.version, self.lsn, self.txid)
    }

    /// CRC-32 over the raw little-endian payload bytes; 0 when empty.
    pub fn compute_payload_crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for v in &self.payload {
            hasher.update(&v.to_le_bytes());
        }
        hasher.finalize()
    }

    /// Serialized wire size of this entry in bytes.
    pub fn wire_size(&self) -> usize {
        45 + self.payload.len() * 4
    }

    fn encode(&self, w: &mut ByteWriter) {
        debug_assert_eq!(self.dimension as usize, self.payload.len());
        w.put_u16(self.op as u16);
        w.put_u16(self.version);
        w.put_u64(self.lsn);
        w.put_u64(self.txid);
        w.put_u32(self.compute_header_crc());
        w.put_u32(self.payload_length());
        w.put_u64(self.vector_id);
        w.put_u32(self.dimension);
        w.put_u8(0); // padding
        w.put_f32_slice(&self.payload);
        w.put_u32(self.compute_payload_crc());
    }
}

fn entry_header_crc(op: u16, version: u16, lsn: u64, txid: u64) -> u32 {
    let mut fixed = [0u8; 20];
    fixed[0..2].copy_from_slice(&op.to_le_bytes());
    fixed[2..4].copy_from_slice(&version.to_le_bytes());
    fixed[4..12].copy_from_slice(&lsn.to_le_bytes());
    fixed[12..20].copy_from_slice(&txid.to_le_bytes());
    crc32fast::hash(&fixed)
}

/// Parses one entry at the reader's current position.
///
/// Field validation happens before the payload is read so a corrupt
/// dimension cannot force a huge allocation.
fn parse_entry(r: &mut ByteReader<'_>) -> Result<WalEntry> {
    let op_raw = r.get_u16()?;
    let op = OperationType::from_u16(op_raw)
        .ok_or_else(|| Error::BadRecord(format!("invalid operation type {op_raw}")))?;
    let version = r.get_u16()?;
    let lsn = r.get_u64()?;
    let txid = r.get_u64()?;
    let stored_header_crc = r.get_u32()?;
    let computed_header_crc = entry_header_crc(op_raw, version, lsn, txid);
    if stored_header_crc != computed_header_crc {
        return Err(Error::ChecksumMismatch(format!(
            "entry header CRC at lsn {lsn}: stored={stored_header_crc:#010x}, computed={computed_header_crc:#010x}"
        )));
    }
    let payload_length = r.get_u32()?;
    let vector_id = r.get_u64()?;
    let dimension = r.get_u32()?;
    let _padding = r.get_u8()?;
    if dimension > config::WAL_MAX_DIMENSION {
        return Err(Error::BadRecord(format!(
            "dimension {dimension} exceeds limit {}",
            config::WAL_MAX_DIMENSION
        )));
    }
    if payload_length != dimension * 4 {
        return Err(Error::BadRecord(format!(
            "payload length {payload_length} does not match dimension {dimension}"
        )));
    }
    let payload_bytes = r.take(payload_length as usize)?;
    let stored_payload_crc = r.get_u32()?;
    let computed_payload_crc = crc32fast::hash(payload_bytes);
    if stored_payload_crc != computed_payload_crc {
        return Err(Error::ChecksumMismatch(format!(
            "entry payload CRC at lsn {lsn}: stored={stored_payload_crc:#010x}, computed={computed_payload_crc:#010x}"
        )));
    }
    let payload = payload_bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(WalEntry {
        op,
        version,
        lsn,
        txid,
        vector_id,
        dimension,
        payload,
    })
}

/// Append-only write-ahead log handle.
///
/// Appends are serialized through an internal mutex; the durability fence
/// runs before every `append`/`append_batch` return. Reads open the file
/// independently, so they see everything flushed so far.
pub struct Wal {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl Wal {
    /// Opens (creating if needed) the log directory and `db.wal` inside it.
    ///
    /// A brand-new file is left empty; the owner writes the header before
    /// the first append.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(WAL_FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` if the log file holds no bytes yet.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(fs::metadata(&self.path)?.len() == 0)
    }

    /// Appends an encoded header and fsyncs.
    pub fn write_header(&self, header: &WalHeader) -> Result<()> {
        let mut w = self.writer.lock();
        w.write_all(&header.encode())?;
        w.flush()?;
        w.get_mut().sync_all()?;
        Ok(())
    }

    /// Appends one entry durably: write, flush, fsync, then return.
    pub fn append(&self, entry: &WalEntry) -> Result<()> {
        let mut buf = ByteWriter::with_capacity(entry.wire_size());
        entry.encode(&mut buf);
        let bytes = buf.into_bytes();

        let mut w = self.writer.lock();
        w.write_all(&bytes)?;
        w.flush()?;
        w.get_mut().sync_all()?;
        Ok(())
    }

    /// Appends a batch of entries with a single flush and fsync.
    pub fn append_batch(&self, entries: &[WalEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let total: usize = entries.iter().map(WalEntry::wire_size).sum();
        let mut buf = ByteWriter::with_capacity(total);
        for entry in entries {
            entry.encode(&mut buf);
        }
        let bytes = buf.into_bytes();

        let mut w = self.writer.lock();
        w.write_all(&bytes)?;
        w.flush()?;
        w.get_mut().sync_all()?;
        Ok(())
    }

    /// Parses and validates the file header.
    pub fn read_header(&self) -> Result<WalHeader> {
        let raw = fs::read(&self.path)?;
        WalHeader::decode(&raw)
    }

    /// Reads every entry after the header.
    ///
    /// An empty file returns `Eof`. Corruption that made forward progress
    /// is fatal; a parse failure that consumed nothing at a record
    /// boundary is treated as a clean end of stream so a pathological
    /// tail cannot loop the reader.
    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        let raw = fs::read(&self.path)?;
        if raw.is_empty() {
            return Err(Error::Eof);
        }
        WalHeader::decode(&raw)?;

        let mut r = ByteReader::new(&raw);
        r.skip(WAL_HEADER_SIZE)?;
        let mut entries = Vec::new();
        while r.remaining() > 0 {
            let start = r.position();
            match parse_entry(&mut r) {
                Ok(entry) => entries.push(entry),
                Err(Error::Eof) if r.position() == start => {
                    tracing::warn!(
                        path = %self.path.display(),
                        trailing = r.remaining(),
                        "ignoring unparseable trailing bytes in WAL"
                    );
                    break;
                }
                Err(Error::Eof) => {
                    return Err(Error::Corruption(format!(
                        "WAL entry truncated at offset {start}"
                    )));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(entries)
    }

    /// Checkpoint: rewrites the file as a fresh header with no entries.
    pub fn truncate(&self) -> Result<()> {
        let mut w = self.writer.lock();
        {
            let file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            let mut fresh = BufWriter::new(file);
            fresh.write_all(&WalHeader::new().encode())?;
            fresh.flush()?;
            fresh.get_mut().sync_all()?;
        }
        *w = BufWriter::new(OpenOptions::new().create(true).append(true).open(&self.path)?);
        tracing::debug!(path = %self.path.display(), "truncated WAL");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_entry(lsn: u64, txid: u64, vector_id: VectorId, embedding: Vec<f32>) -> WalEntry {
        WalEntry::insert(lsn, txid, vector_id, embedding)
    }

    fn open_with_header(dir: &Path) -> Wal {
        let wal = Wal::open(dir).unwrap();
        wal.write_header(&WalHeader::new()).unwrap();
        wal
    }

    #[test]
    fn header_encode_is_24_bytes_and_round_trips() {
        let header = WalHeader {
            magic: WAL_MAGIC,
            version: 1,
            flags: 0x1234,
            creation_time: 1_234_567_890,
        };
        let bytes = header.encode();
        assert_eq!(bytes.len(), WAL_HEADER_SIZE);
        let decoded = WalHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_bad_magic_rejected() {
        let mut bytes = WalHeader::new().encode();
        bytes[0] = 0xEF;
        assert!(matches!(
            WalHeader::decode(&bytes),
            Err(Error::BadHeader(_))
        ));
    }

    #[test]
    fn header_crc_flip_detected() {
        let mut bytes = WalHeader::new().encode();
        bytes[9] ^= 0x01; // inside creation_time
        assert!(matches!(
            WalHeader::decode(&bytes),
            Err(Error::ChecksumMismatch(_))
        ));
    }

    #[test]
    fn header_too_small_rejected() {
        assert!(matches!(
            WalHeader::decode(&[0u8; 10]),
            Err(Error::BadHeader(_))
        ));
    }

    #[test]
    fn append_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let wal = open_with_header(dir.path());

        let entry = test_entry(1, 1, 42, vec![1.1, 2.2, 3.3, 4.4]);
        wal.append(&entry).unwrap();

        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], entry);
    }

    #[test]
    fn append_preserves_order() {
        let dir = TempDir::new().unwrap();
        let wal = open_with_header(dir.path());
        for i in 0..10u64 {
            wal.append(&test_entry(i + 1, i + 1, i, vec![i as f32; 3]))
                .unwrap();
        }
        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 10);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.lsn, i as u64 + 1);
            assert_eq!(entry.vector_id, i as u64);
        }
    }

    #[test]
    fn append_batch_round_trips() {
        let dir = TempDir::new().unwrap();
        let wal = open_with_header(dir.path());
        let batch: Vec<WalEntry> = (0..5u64)
            .map(|i| test_entry(i + 1, i + 1, i, vec![0.5; 2]))
            .collect();
        wal.append_batch(&batch).unwrap();
        assert_eq!(wal.read_all().unwrap(), batch);
    }

    #[test]
    fn delete_entry_has_empty_payload() {
        let dir = TempDir::new().unwrap();
        let wal = open_with_header(dir.path());
        wal.append(&WalEntry::delete(1, 1, 7)).unwrap();
        let entries = wal.read_all().unwrap();
        assert_eq!(entries[0].op, OperationType::Delete);
        assert_eq!(entries[0].dimension, 0);
        assert!(entries[0].payload.is_empty());
    }

    #[test]
    fn reserved_op_types_round_trip() {
        let dir = TempDir::new().unwrap();
        let wal = open_with_header(dir.path());
        let mut commit = test_entry(1, 1, 0, Vec::new());
        commit.op = OperationType::CommitTxn;
        let mut abort = test_entry(2, 1, 0, Vec::new());
        abort.op = OperationType::AbortTxn;
        wal.append(&commit).unwrap();
        wal.append(&abort).unwrap();

        let entries = wal.read_all().unwrap();
        assert_eq!(entries[0].op, OperationType::CommitTxn);
        assert_eq!(entries[1].op, OperationType::AbortTxn);
    }

    #[test]
    fn empty_file_reads_as_eof() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path()).unwrap();
        assert!(wal.is_empty().unwrap());
        assert!(matches!(wal.read_all(), Err(Error::Eof)));
    }

    #[test]
    fn header_only_file_reads_as_no_entries() {
        let dir = TempDir::new().unwrap();
        let wal = open_with_header(dir.path());
        assert!(wal.read_all().unwrap().is_empty());
        let header = wal.read_header().unwrap();
        assert_eq!(header.magic, WAL_MAGIC);
        assert_eq!(header.version, WAL_FORMAT_VERSION);
    }

    #[test]
    fn payload_bit_flip_is_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let wal = open_with_header(dir.path());
        wal.append(&test_entry(1, 1, 1, vec![1.0, 2.0, 3.0]))
            .unwrap();

        let mut raw = fs::read(wal.path()).unwrap();
        // payload starts 41 bytes into the entry
        let payload_offset = WAL_HEADER_SIZE + 41;
        raw[payload_offset + 2] ^= 0x10;
        fs::write(wal.path(), &raw).unwrap();

        assert!(matches!(
            wal.read_all(),
            Err(Error::ChecksumMismatch(_))
        ));
    }

    #[test]
    fn every_payload_bit_position_is_detected() {
        let dir = TempDir::new().unwrap();
        let wal = open_with_header(dir.path());
        wal.append(&test_entry(1, 1, 1, vec![0.25, -0.5])).unwrap();
        let pristine = fs::read(wal.path()).unwrap();

        let payload_offset = WAL_HEADER_SIZE + 41;
        for byte in 0..8 {
            for bit in 0..8 {
                let mut raw = pristine.clone();
                raw[payload_offset + byte] ^= 1 << bit;
                fs::write(wal.path(), &raw).unwrap();
                assert!(
                    matches!(wal.read_all(), Err(Error::ChecksumMismatch(_))),
                    "flip at payload byte {byte} bit {bit} went undetected"
                );
            }
        }
    }

    #[test]
    fn lsn_field_flip_is_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let wal = open_with_header(dir.path());
        wal.append(&test_entry(1, 1, 1, vec![1.0])).unwrap();

        let mut raw = fs::read(wal.path()).unwrap();
        raw[WAL_HEADER_SIZE + 5] ^= 0x01; // inside the lsn field
        fs::write(wal.path(), &raw).unwrap();
        assert!(matches!(
            wal.read_all(),
            Err(Error::ChecksumMismatch(_))
        ));
    }

    #[test]
    fn invalid_op_type_is_bad_record() {
        let dir = TempDir::new().unwrap();
        let wal = open_with_header(dir.path());
        wal.append(&test_entry(1, 1, 1, vec![1.0])).unwrap();

        let mut raw = fs::read(wal.path()).unwrap();
        raw[WAL_HEADER_SIZE] = 0x63; // op type 99
        fs::write(wal.path(), &raw).unwrap();
        assert!(matches!(wal.read_all(), Err(Error::BadRecord(_))));
    }

    #[test]
    fn truncated_entry_is_corruption() {
        let dir = TempDir::new().unwrap();
        let wal = open_with_header(dir.path());
        wal.append(&test_entry(1, 1, 1, vec![1.0, 2.0, 3.0]))
            .unwrap();

        let raw = fs::read(wal.path()).unwrap();
        fs::write(wal.path(), &raw[..raw.len() - 6]).unwrap();
        assert!(matches!(wal.read_all(), Err(Error::Corruption(_))));
    }

    #[test]
    fn truncate_leaves_fresh_header_only() {
        let dir = TempDir::new().unwrap();
        let wal = open_with_header(dir.path());
        for i in 0..5u64 {
            wal.append(&test_entry(i + 1, i + 1, i, vec![1.0; 2]))
                .unwrap();
        }
        wal.truncate().unwrap();

        assert_eq!(
            fs::metadata(wal.path()).unwrap().len(),
            WAL_HEADER_SIZE as u64
        );
        assert!(wal.read_all().unwrap().is_empty());
        assert!(wal.read_header().is_ok());

        // the log accepts appends again after a checkpoint
        wal.append(&test_entry(6, 6, 9, vec![2.0; 2])).unwrap();
        assert_eq!(wal.read_all().unwrap().len(), 1);
    }

    #[test]
    fn open_creates_directories() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let wal = Wal::open(&nested).unwrap();
        assert!(nested.is_dir());
        assert!(wal.path().exists());
    }

    #[test]
    fn operation_type_decoding_bounds() {
        assert_eq!(OperationType::from_u16(0), None);
        assert_eq!(OperationType::from_u16(1), Some(OperationType::CommitTxn));
        assert_eq!(OperationType::from_u16(6), Some(OperationType::BatchInsert));
        assert_eq!(OperationType::from_u16(7), None);
    }
}

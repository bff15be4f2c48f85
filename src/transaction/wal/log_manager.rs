use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, TxnId};
use crate::transaction::wal::log_record::{LogRecord, LogRecordType};

#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Append-only sink for transaction lifecycle records.
///
/// Each record is written length-prefixed and flushed immediately. The core
/// never reads the log back; recovery is out of scope.
pub struct LogManager {
    log_file: Mutex<File>,
    next_lsn: AtomicU64,
}

impl LogManager {
    pub fn new(log_path: impl AsRef<Path>) -> Result<Self, LogManagerError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            log_file: Mutex::new(file),
            next_lsn: AtomicU64::new(1),
        })
    }

    /// Append one record and return its LSN.
    pub fn append_record(
        &self,
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
    ) -> Result<Lsn, LogManagerError> {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let record = LogRecord {
            lsn,
            prev_lsn,
            txn_id,
            record_type,
        };

        let payload = bincode::serialize(&record)
            .map_err(|e| LogManagerError::SerializationError(e.to_string()))?;
        let mut length_prefix = [0u8; 4];
        LittleEndian::write_u32(&mut length_prefix, payload.len() as u32);

        let mut file = self.log_file.lock();
        file.write_all(&length_prefix)?;
        file.write_all(&payload)?;
        file.flush()?;

        Ok(lsn)
    }
}

use serde::{Deserialize, Serialize};

use crate::common::types::{Lsn, TxnId};

/// Kinds of transaction lifecycle records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordType {
    Begin,
    Commit,
    Abort,
}

/// A single log record. Records of one transaction are chained through
/// `prev_lsn`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn: Lsn,
    pub txn_id: TxnId,
    pub record_type: LogRecordType,
}

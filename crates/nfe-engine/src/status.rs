//! # Authority Status Taxonomy
//!
//! Every `cStat` the orchestrator can receive maps to exactly one
//! [`StatusClass`]. Codes outside the table are rejections, and their
//! `xMotivo` is passed through verbatim.
//!
//! | Code | Class |
//! |---|---|
//! | 100, 150 | Authorized |
//! | 103, 105 | Pending |
//! | 104 | BatchProcessed |
//! | 108, 109 | ServiceHalted |
//! | 204, 206, 301, anything else | Rejected |

use serde::{Deserialize, Serialize};

/// Authorized for use.
pub const AUTHORIZED: u16 = 100;
/// Authorized outside the regular deadline.
pub const AUTHORIZED_LATE: u16 = 150;
/// Batch received, not yet processed.
pub const BATCH_RECEIVED: u16 = 103;
/// Batch processed; per-document results follow.
pub const BATCH_PROCESSED: u16 = 104;
/// Batch still being processed.
pub const BATCH_PROCESSING: u16 = 105;
/// The status service answered that the authorizer is operating.
pub const SERVICE_IN_OPERATION: u16 = 107;
/// Service temporarily halted.
pub const SERVICE_HALTED: u16 = 108;
/// Service halted without forecast.
pub const SERVICE_HALTED_NO_FORECAST: u16 = 109;
/// Duplicate document.
pub const DUPLICATE: u16 = 204;
/// Number previously voided.
pub const NUMBER_VOIDED: u16 = 206;
/// Use denied: issuer irregular.
pub const DENIED: u16 = 301;
/// Distribution: no document found.
pub const NO_DOCUMENTS: u16 = 137;
/// Distribution: documents found.
pub const DOCUMENTS_FOUND: u16 = 138;
/// Schema validation failure of the request.
pub const SCHEMA_REJECTED: u16 = 215;

/// Classification of a `cStat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    /// The document may be used.
    Authorized,
    /// Still being processed; ask again later.
    Pending,
    /// The batch is done; look at each document's own status.
    BatchProcessed,
    /// The authority refused the document.
    Rejected,
    /// The authorizer is not operating.
    ServiceHalted,
}

impl StatusClass {
    /// Whether the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Pending | Self::ServiceHalted)
    }

    /// Whether the class ends the document's life cycle.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Authorized | Self::Rejected)
    }
}

/// Classify an authority status code.
pub fn classify(code: u16) -> StatusClass {
    match code {
        AUTHORIZED | AUTHORIZED_LATE => StatusClass::Authorized,
        BATCH_RECEIVED | BATCH_PROCESSING => StatusClass::Pending,
        BATCH_PROCESSED => StatusClass::BatchProcessed,
        SERVICE_HALTED | SERVICE_HALTED_NO_FORECAST => StatusClass::ServiceHalted,
        _ => StatusClass::Rejected,
    }
}

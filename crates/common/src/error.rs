//! # Coded Errors
//!
//! Every failure that crosses the RPC boundary is a [`CodedError`]: a code
//! space naming the owning component, an HTTP status for gateway mapping, a
//! process-unique inner code, and a human-readable description. Inner codes
//! are registered once at bootstrap; a duplicate registration is a programmer
//! error and aborts the process.
//!
//! ## Guarantees
//!
//! - Encoding then decoding a `CodedError` yields bit-identical fields.
//! - The inner-code registry rejects duplicates (panic at bootstrap only).
//! - Transient-overload codes carry HTTP 503; programmer bugs carry 500.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Code space for errors that were not pre-registered.
pub const DEFAULT_CODE_SPACE: &str = "OSPN";

/// Inner code used when wrapping an arbitrary error into a [`CodedError`].
pub const DEFAULT_INNER_CODE: i32 = 999_999;

// ════════════════════════════════════════════════════════════════════════════
// CODED ERROR
// ════════════════════════════════════════════════════════════════════════════

/// The standard error record inside the SP system.
///
/// Responses embed an `Option<CodedError>`; a `None` means success. The
/// `http_status` is what the gateway surfaces to end users, the `inner_code`
/// is the stable machine-readable identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodedError {
    pub code_space: String,
    pub http_status: u16,
    pub inner_code: i32,
    pub description: String,
}

impl CodedError {
    /// Wrap an arbitrary error into the default code space.
    pub fn internal(description: impl Into<String>) -> Self {
        CodedError {
            code_space: DEFAULT_CODE_SPACE.to_string(),
            http_status: 500,
            inner_code: DEFAULT_INNER_CODE,
            description: description.into(),
        }
    }

    /// Whether this error signals a transient overload the caller should
    /// retry with back-off.
    pub fn is_transient(&self) -> bool {
        self.http_status == 503
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "code_space: {}, http_status: {}, inner_code: {}, description: {}",
            self.code_space, self.http_status, self.inner_code, self.description
        )
    }
}

impl std::error::Error for CodedError {}

// ════════════════════════════════════════════════════════════════════════════
// ERROR SPECS (the static catalogue)
// ════════════════════════════════════════════════════════════════════════════

/// A const-constructible catalogue entry. Converted into a [`CodedError`]
/// with [`ErrorSpec::to_err`] at the point of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorSpec {
    pub code_space: &'static str,
    pub http_status: u16,
    pub inner_code: i32,
    pub description: &'static str,
}

impl ErrorSpec {
    pub const fn new(
        code_space: &'static str,
        http_status: u16,
        inner_code: i32,
        description: &'static str,
    ) -> Self {
        ErrorSpec { code_space, http_status, inner_code, description }
    }

    pub fn to_err(&self) -> CodedError {
        CodedError {
            code_space: self.code_space.to_string(),
            http_status: self.http_status,
            inner_code: self.inner_code,
            description: self.description.to_string(),
        }
    }

    /// Same code, but with extra context appended to the description.
    pub fn with_detail(&self, detail: impl AsRef<str>) -> CodedError {
        CodedError {
            code_space: self.code_space.to_string(),
            http_status: self.http_status,
            inner_code: self.inner_code,
            description: format!("{}: {}", self.description, detail.as_ref()),
        }
    }
}

// Kernel (9900xx)
pub const ERR_MODULE_MISSING: ErrorSpec =
    ErrorSpec::new("kernel", 404, 990_001, "module not registered on this node");
pub const ERR_SERVER_STOPPING: ErrorSpec =
    ErrorSpec::new("kernel", 503, 990_002, "server is shutting down");

// Approver (9901xx)
pub const ERR_APPROVAL_TASK_DANGLING: ErrorSpec =
    ErrorSpec::new("approver", 500, 990_101, "approval request with null task");
pub const ERR_APPROVAL_EXHAUST_RESOURCE: ErrorSpec =
    ErrorSpec::new("approver", 503, 990_102, "approval reservation refused");

// Downloader (9903xx)
pub const ERR_DOWNLOAD_TASK_DANGLING: ErrorSpec =
    ErrorSpec::new("downloader", 500, 990_301, "download request with null task");
pub const ERR_DOWNLOAD_EXHAUST_RESOURCE: ErrorSpec =
    ErrorSpec::new("downloader", 503, 990_302, "download reservation refused");
pub const ERR_NO_SUCH_PIECE: ErrorSpec =
    ErrorSpec::new("downloader", 404, 990_303, "piece not found in store");
pub const ERR_NO_SUCH_INTEGRITY: ErrorSpec =
    ErrorSpec::new("downloader", 404, 990_304, "object integrity meta not found");

// Authenticator (9904xx)
pub const ERR_UNSUPPORTED_AUTH_OP: ErrorSpec =
    ErrorSpec::new("authenticator", 404, 990_401, "unsupported auth op type");
pub const ERR_MISMATCH_AUTH_NONCE: ErrorSpec =
    ErrorSpec::new("authenticator", 400, 990_402, "off-chain auth nonce mismatch");
pub const ERR_PUBLIC_KEY_EXPIRED: ErrorSpec =
    ErrorSpec::new("authenticator", 400, 990_403, "off-chain auth public key expired");
pub const ERR_BAD_OFF_CHAIN_SIGNATURE: ErrorSpec =
    ErrorSpec::new("authenticator", 400, 990_404, "off-chain signature verify failed");
pub const ERR_NO_SUCH_AUTH_KEY: ErrorSpec =
    ErrorSpec::new("authenticator", 404, 990_405, "no off-chain auth key for account");
pub const ERR_UNAUTHORIZED: ErrorSpec =
    ErrorSpec::new("authenticator", 403, 990_406, "operation not permitted for account");

// Manager (9906xx)
pub const ERR_UPLOAD_TASK_DANGLING: ErrorSpec =
    ErrorSpec::new("manager", 500, 990_601, "request with null task");
pub const ERR_UNSUPPORTED_TASK_TYPE: ErrorSpec =
    ErrorSpec::new("manager", 404, 990_602, "unsupported task type");
pub const ERR_NO_TASK_MATCH_LIMIT: ErrorSpec =
    ErrorSpec::new("manager", 404, 990_603, "no pending task matches the node limit");
pub const ERR_NO_SUCH_TASK: ErrorSpec =
    ErrorSpec::new("manager", 404, 990_604, "no task for the queried key");
pub const ERR_REPEATED_TASK: ErrorSpec =
    ErrorSpec::new("manager", 400, 990_605, "task with this key already exists");
pub const ERR_TASK_QUEUE_FULL: ErrorSpec =
    ErrorSpec::new("manager", 503, 990_606, "manager task queue is full");

// P2P (9907xx)
pub const ERR_REPLICATE_APPROVAL_TASK_DANGLING: ErrorSpec = ErrorSpec::new(
    "p2p",
    500,
    990_701,
    "replicate piece approval request with null task",
);
pub const ERR_INSUFFICIENT_APPROVALS: ErrorSpec =
    ErrorSpec::new("p2p", 503, 990_702, "fewer approvals than required minimum");

// Receiver (9908xx)
pub const ERR_RECEIVE_TASK_DANGLING: ErrorSpec =
    ErrorSpec::new("receiver", 500, 990_801, "receive request with null task");
pub const ERR_RECEIVE_EXHAUST_RESOURCE: ErrorSpec =
    ErrorSpec::new("receiver", 503, 990_802, "receive reservation refused");
pub const ERR_PIECE_CHECKSUM_MISMATCH: ErrorSpec =
    ErrorSpec::new("receiver", 400, 990_803, "received piece checksum mismatch");
pub const ERR_REPLICATE_UNFINISHED: ErrorSpec =
    ErrorSpec::new("receiver", 400, 990_804, "replication not finished for object");

// Signer service (9910xx)
pub const ERR_SIGN_TASK_DANGLING: ErrorSpec =
    ErrorSpec::new("signer", 500, 991_001, "sign request with null input");

// Uploader (991xx — short range kept verbatim from the wire contract)
pub const ERR_UPLOAD_OBJECT_DANGLING: ErrorSpec =
    ErrorSpec::new("uploader", 500, 99_111, "upload stream first frame missing task");
pub const ERR_UPLOAD_EXHAUST_RESOURCE: ErrorSpec =
    ErrorSpec::new("uploader", 503, 99_112, "upload reservation refused");
pub const ERR_UPLOAD_STREAM_BROKEN: ErrorSpec =
    ErrorSpec::new("uploader", 500, 99_113, "upload stream closed abnormally");

// On-chain submission, one code per signer operation (1200xx)
pub const ERR_SIGN_MSG: ErrorSpec =
    ErrorSpec::new("signer", 500, 120_001, "failed to sign message");
pub const ERR_SEAL_OBJECT_ON_CHAIN: ErrorSpec =
    ErrorSpec::new("signer", 400, 120_002, "failed to seal object on chain");
pub const ERR_REJECT_UNSEAL_ON_CHAIN: ErrorSpec =
    ErrorSpec::new("signer", 400, 120_003, "failed to reject unseal object on chain");
pub const ERR_DISCONTINUE_BUCKET_ON_CHAIN: ErrorSpec =
    ErrorSpec::new("signer", 400, 120_004, "failed to discontinue bucket on chain");
pub const ERR_CREATE_GVG_ON_CHAIN: ErrorSpec = ErrorSpec::new(
    "signer",
    400,
    120_005,
    "failed to create global virtual group on chain",
);
pub const ERR_COMPLETE_MIGRATE_BUCKET_ON_CHAIN: ErrorSpec =
    ErrorSpec::new("signer", 400, 120_006, "failed to complete migrate bucket on chain");
pub const ERR_REJECT_MIGRATE_BUCKET_ON_CHAIN: ErrorSpec =
    ErrorSpec::new("signer", 400, 120_007, "failed to reject migrate bucket on chain");
pub const ERR_SWAP_OUT_ON_CHAIN: ErrorSpec =
    ErrorSpec::new("signer", 400, 120_008, "failed to swap out on chain");
pub const ERR_COMPLETE_SWAP_OUT_ON_CHAIN: ErrorSpec =
    ErrorSpec::new("signer", 400, 120_009, "failed to complete swap out on chain");
pub const ERR_SP_EXIT_ON_CHAIN: ErrorSpec =
    ErrorSpec::new("signer", 400, 120_010, "failed to submit sp exit on chain");
pub const ERR_COMPLETE_SP_EXIT_ON_CHAIN: ErrorSpec =
    ErrorSpec::new("signer", 400, 120_011, "failed to complete sp exit on chain");
pub const ERR_UPDATE_SP_PRICE_ON_CHAIN: ErrorSpec =
    ErrorSpec::new("signer", 400, 120_012, "failed to update sp price on chain");

/// Every pre-registered entry. Bootstrap registers the whole table; the
/// registry panics if two entries collide on inner code.
pub const CATALOGUE: &[ErrorSpec] = &[
    ERR_MODULE_MISSING,
    ERR_SERVER_STOPPING,
    ERR_APPROVAL_TASK_DANGLING,
    ERR_APPROVAL_EXHAUST_RESOURCE,
    ERR_DOWNLOAD_TASK_DANGLING,
    ERR_DOWNLOAD_EXHAUST_RESOURCE,
    ERR_NO_SUCH_PIECE,
    ERR_NO_SUCH_INTEGRITY,
    ERR_UNSUPPORTED_AUTH_OP,
    ERR_MISMATCH_AUTH_NONCE,
    ERR_PUBLIC_KEY_EXPIRED,
    ERR_BAD_OFF_CHAIN_SIGNATURE,
    ERR_NO_SUCH_AUTH_KEY,
    ERR_UNAUTHORIZED,
    ERR_UPLOAD_TASK_DANGLING,
    ERR_UNSUPPORTED_TASK_TYPE,
    ERR_NO_TASK_MATCH_LIMIT,
    ERR_NO_SUCH_TASK,
    ERR_REPEATED_TASK,
    ERR_TASK_QUEUE_FULL,
    ERR_REPLICATE_APPROVAL_TASK_DANGLING,
    ERR_INSUFFICIENT_APPROVALS,
    ERR_RECEIVE_TASK_DANGLING,
    ERR_RECEIVE_EXHAUST_RESOURCE,
    ERR_PIECE_CHECKSUM_MISMATCH,
    ERR_REPLICATE_UNFINISHED,
    ERR_SIGN_TASK_DANGLING,
    ERR_UPLOAD_OBJECT_DANGLING,
    ERR_UPLOAD_EXHAUST_RESOURCE,
    ERR_UPLOAD_STREAM_BROKEN,
    ERR_SIGN_MSG,
    ERR_SEAL_OBJECT_ON_CHAIN,
    ERR_REJECT_UNSEAL_ON_CHAIN,
    ERR_DISCONTINUE_BUCKET_ON_CHAIN,
    ERR_CREATE_GVG_ON_CHAIN,
    ERR_COMPLETE_MIGRATE_BUCKET_ON_CHAIN,
    ERR_REJECT_MIGRATE_BUCKET_ON_CHAIN,
    ERR_SWAP_OUT_ON_CHAIN,
    ERR_COMPLETE_SWAP_OUT_ON_CHAIN,
    ERR_SP_EXIT_ON_CHAIN,
    ERR_COMPLETE_SP_EXIT_ON_CHAIN,
    ERR_UPDATE_SP_PRICE_ON_CHAIN,
];

// ════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ════════════════════════════════════════════════════════════════════════════

/// Process-wide inner-code registry.
///
/// Holds one entry per inner code. Registration of a duplicate inner code is
/// a fatal bootstrap error (panic). Request paths never register codes.
pub struct ErrorRegistry {
    inner: Mutex<BTreeMap<i32, CodedError>>,
}

impl ErrorRegistry {
    fn new() -> Self {
        ErrorRegistry { inner: Mutex::new(BTreeMap::new()) }
    }

    /// Register one entry. Panics on a duplicate inner code; only bootstrap
    /// may call this.
    pub fn register(&self, spec: &ErrorSpec) {
        let mut map = self.inner.lock();
        if let Some(old) = map.get(&spec.inner_code) {
            panic!(
                "duplicate error inner code {}: {} vs {}",
                spec.inner_code, old.description, spec.description
            );
        }
        map.insert(spec.inner_code, spec.to_err());
    }

    /// Look up the registered entry for an inner code.
    pub fn lookup(&self, inner_code: i32) -> Option<CodedError> {
        self.inner.lock().get(&inner_code).cloned()
    }

    /// All registered entries, ascending by inner code.
    pub fn list(&self) -> Vec<CodedError> {
        self.inner.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

static REGISTRY: OnceLock<ErrorRegistry> = OnceLock::new();

/// The process-wide registry, with the static catalogue registered on first
/// access. Duplicate inner codes in [`CATALOGUE`] panic here, at bootstrap.
pub fn registry() -> &'static ErrorRegistry {
    REGISTRY.get_or_init(|| {
        let reg = ErrorRegistry::new();
        for spec in CATALOGUE {
            reg.register(spec);
        }
        reg
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_registers_without_duplicates() {
        let reg = registry();
        assert_eq!(reg.len(), CATALOGUE.len());
        assert_eq!(
            reg.lookup(990_603).map(|e| e.description),
            Some(ERR_NO_TASK_MATCH_LIMIT.description.to_string())
        );
    }

    #[test]
    fn duplicate_registration_panics() {
        let reg = ErrorRegistry::new();
        reg.register(&ERR_NO_SUCH_TASK);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            reg.register(&ERR_NO_SUCH_TASK);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn coded_error_roundtrip_is_bit_identical() {
        let err = ERR_SEAL_OBJECT_ON_CHAIN.with_detail("tx rejected");
        let bytes = bincode::serialize(&err).expect("encode");
        let back: CodedError = bincode::deserialize(&bytes).expect("decode");
        assert_eq!(err, back);
    }

    #[test]
    fn transient_classification_follows_http_status() {
        assert!(ERR_APPROVAL_EXHAUST_RESOURCE.to_err().is_transient());
        assert!(!ERR_APPROVAL_TASK_DANGLING.to_err().is_transient());
    }

    #[test]
    fn list_is_sorted_by_inner_code() {
        let list = registry().list();
        let codes: Vec<i32> = list.iter().map(|e| e.inner_code).collect();
        assert_eq!(codes.len(), CATALOGUE.len());
        assert!(codes.windows(2).all(|w| w[0] < w[1]));
    }
}

//! Domain Ports - Core trait definitions for the qtree pool operator
//!
//! These traits define the boundaries between the pooling logic and the
//! remote array. Adapters implement [`OntapApi`] to carry calls over whatever
//! transport the array speaks; drivers implement [`StorageDriver`].

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// =============================================================================
// API Results
// =============================================================================

/// Error codes the array attaches to a failed (non-pass) reply
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Generic API failure
    ApiError,
    /// The named volume does not exist
    VolumeDoesNotExist,
    /// The named object (qtree, quota entry, policy) does not exist
    ObjectNotFound,
    /// The entry being created already exists
    DuplicateEntry,
    /// The object being created already exists
    AlreadyExists,
    /// Any other code the array returns
    Other(String),
}

impl ErrorCode {
    /// Map a raw errno string to a code
    pub fn from_errno(errno: &str) -> Self {
        match errno {
            "13001" => ErrorCode::ApiError,
            "13040" => ErrorCode::VolumeDoesNotExist,
            "15661" => ErrorCode::ObjectNotFound,
            "13130" => ErrorCode::DuplicateEntry,
            "17" => ErrorCode::AlreadyExists,
            other => ErrorCode::Other(other.to_string()),
        }
    }

    /// Raw errno string for this code
    pub fn errno(&self) -> &str {
        match self {
            ErrorCode::ApiError => "13001",
            ErrorCode::VolumeDoesNotExist => "13040",
            ErrorCode::ObjectNotFound => "15661",
            ErrorCode::DuplicateEntry => "13130",
            ErrorCode::AlreadyExists => "17",
            ErrorCode::Other(errno) => errno,
        }
    }

    /// Whether the code means the target is already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, ErrorCode::VolumeDoesNotExist | ErrorCode::ObjectNotFound)
    }

    /// Whether the code means the target is already present
    pub fn is_duplicate(&self) -> bool {
        matches!(self, ErrorCode::DuplicateEntry | ErrorCode::AlreadyExists)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "errno {}", self.errno())
    }
}

/// Failure details carried by a non-pass reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiFailure {
    pub code: ErrorCode,
    pub reason: String,
}

impl ApiFailure {
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// A reply that made it across the transport.
///
/// Transport failures are the `Err` side of the surrounding `Result`; this
/// type carries the array's own pass/fail verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiReply<T> {
    Passed(T),
    Failed(ApiFailure),
}

impl<T> ApiReply<T> {
    pub fn failed(code: ErrorCode, reason: impl Into<String>) -> Self {
        ApiReply::Failed(ApiFailure::new(code, reason))
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, ApiReply::Passed(_))
    }

    /// Error code of a failed reply
    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            ApiReply::Passed(_) => None,
            ApiReply::Failed(failure) => Some(&failure.code),
        }
    }

    /// Convert a failed reply into an [`Error::ApiFailed`] naming `operation`
    pub fn into_result(self, operation: &str) -> Result<T> {
        match self {
            ApiReply::Passed(value) => Ok(value),
            ApiReply::Failed(failure) => Err(Error::api(operation, failure.code, failure.reason)),
        }
    }
}

// =============================================================================
// Flexvol Types
// =============================================================================

/// Space guarantee of a Flexvol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceReserve {
    #[default]
    None,
    Volume,
}

impl std::str::FromStr for SpaceReserve {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(SpaceReserve::None),
            "volume" => Ok(SpaceReserve::Volume),
            _ => Err(Error::InvalidOption {
                key: "spaceReserve".into(),
                value: s.into(),
            }),
        }
    }
}

impl std::fmt::Display for SpaceReserve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpaceReserve::None => write!(f, "none"),
            SpaceReserve::Volume => write!(f, "volume"),
        }
    }
}

/// The attribute set a Flexvol must match exactly to host a qtree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolAttributes {
    pub aggregate: String,
    pub space_reserve: SpaceReserve,
    pub snapshot_policy: String,
    pub snapshot_dir: bool,
    pub encryption: bool,
}

/// Everything needed to create a Flexvol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexvolCreateSpec {
    pub name: String,
    pub attributes: PoolAttributes,
    pub size_bytes: u64,
    pub unix_permissions: String,
    pub export_policy: String,
    pub security_style: String,
    pub snapshot_reserve_percent: Option<u32>,
}

/// Flexvol attributes as reported by the array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexvolInfo {
    pub name: String,
    pub attributes: PoolAttributes,
    pub size_bytes: u64,
    pub snapshot_reserve_percent: u32,
    pub junction_path: Option<String>,
}

/// New size for a Flexvol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeSize {
    /// Set an absolute size
    Absolute(u64),
    /// Grow by the given amount
    Grow(u64),
}

impl std::fmt::Display for VolumeSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeSize::Absolute(bytes) => write!(f, "{}", bytes),
            VolumeSize::Grow(bytes) => write!(f, "+{}", bytes),
        }
    }
}

// =============================================================================
// Qtree & Quota Types
// =============================================================================

/// A qtree as reported by the array
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QtreeInfo {
    pub name: String,
    pub flexvol: String,
}

/// Everything needed to create a qtree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QtreeCreateSpec {
    pub name: String,
    pub flexvol: String,
    pub unix_permissions: String,
    pub export_policy: String,
    pub security_style: String,
}

/// Hard disk limit of a quota rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskLimit {
    /// No limit (`-`)
    Unlimited,
    /// Hard limit in KiB
    Kilobytes(u64),
}

impl DiskLimit {
    /// Limit in bytes, if numeric
    pub fn bytes(&self) -> Option<u64> {
        match self {
            DiskLimit::Unlimited => None,
            DiskLimit::Kilobytes(kb) => Some(kb.saturating_mul(1024)),
        }
    }
}

impl std::fmt::Display for DiskLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskLimit::Unlimited => write!(f, "-"),
            DiskLimit::Kilobytes(kb) => write!(f, "{}", kb),
        }
    }
}

/// A tree quota rule. `qtree == None` targets the Flexvol default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaEntry {
    pub flexvol: String,
    pub qtree: Option<String>,
    pub disk_limit: DiskLimit,
}

impl QuotaEntry {
    /// The default rule installed on every pooled Flexvol
    pub fn flexvol_default(flexvol: impl Into<String>) -> Self {
        Self {
            flexvol: flexvol.into(),
            qtree: None,
            disk_limit: DiskLimit::Unlimited,
        }
    }

    /// A hard limit on one qtree, rounded down to whole KiB
    pub fn for_qtree(flexvol: impl Into<String>, qtree: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            flexvol: flexvol.into(),
            qtree: Some(qtree.into()),
            disk_limit: DiskLimit::Kilobytes(size_bytes / 1024),
        }
    }
}

/// Quota subsystem state of a Flexvol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaStatus {
    Off,
    On,
    /// Quota-on accepted, scan still running
    Initializing,
    /// Quota resize accepted, scan still running
    Resizing,
    /// Quota-off accepted, still shutting down
    Quitting,
    /// Fatal; needs manual repair
    Corrupt,
}

impl std::fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaStatus::Off => write!(f, "off"),
            QuotaStatus::On => write!(f, "on"),
            QuotaStatus::Initializing => write!(f, "initializing"),
            QuotaStatus::Resizing => write!(f, "resizing"),
            QuotaStatus::Quitting => write!(f, "quitting"),
            QuotaStatus::Corrupt => write!(f, "corrupt"),
        }
    }
}

/// One export policy rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRule {
    pub policy: String,
    pub client_match: String,
}

// =============================================================================
// Backend Client Port
// =============================================================================

/// Port for the remote array's control-plane API.
///
/// Every method is a blocking round trip. `Err` means the call never got a
/// verdict (transport failure); `Ok(ApiReply::Failed(..))` means the array
/// answered with a non-pass status the caller must interpret. Methods named
/// `*_async` only report whether the job was accepted.
#[async_trait]
pub trait OntapApi: Send + Sync {
    async fn volume_create(&self, spec: &FlexvolCreateSpec) -> Result<ApiReply<()>>;

    async fn volume_destroy(&self, name: &str, force: bool) -> Result<ApiReply<()>>;

    /// List volumes whose names start with `prefix`
    async fn volume_list(&self, prefix: &str) -> Result<ApiReply<Vec<String>>>;

    /// List volumes whose names start with `prefix` and whose attributes
    /// match `attributes` exactly
    async fn volume_list_by_attrs(
        &self,
        prefix: &str,
        attributes: &PoolAttributes,
    ) -> Result<ApiReply<Vec<String>>>;

    async fn volume_mount(&self, name: &str, junction_path: &str) -> Result<ApiReply<()>>;

    async fn volume_get(&self, name: &str) -> Result<ApiReply<FlexvolInfo>>;

    async fn volume_set_size(&self, name: &str, size: VolumeSize) -> Result<ApiReply<()>>;

    async fn qtree_create(&self, spec: &QtreeCreateSpec) -> Result<ApiReply<()>>;

    /// Find the Flexvol (among those starting with `flexvol_prefix`) holding
    /// a qtree called `name`
    async fn qtree_exists(&self, name: &str, flexvol_prefix: &str) -> Result<ApiReply<Option<String>>>;

    /// List qtrees whose names start with `name_prefix` across Flexvols
    /// starting with `flexvol_prefix`
    async fn qtree_list(&self, name_prefix: &str, flexvol_prefix: &str) -> Result<ApiReply<Vec<QtreeInfo>>>;

    async fn qtree_rename(&self, flexvol: &str, from: &str, to: &str) -> Result<ApiReply<()>>;

    async fn qtree_destroy_async(&self, flexvol: &str, name: &str) -> Result<ApiReply<()>>;

    async fn qtree_count(&self, flexvol: &str) -> Result<ApiReply<usize>>;

    async fn quota_set_entry(&self, entry: &QuotaEntry) -> Result<ApiReply<()>>;

    async fn quota_get_entry(&self, flexvol: &str, qtree: &str) -> Result<ApiReply<QuotaEntry>>;

    async fn quota_entry_list(&self, flexvol: &str) -> Result<ApiReply<Vec<QuotaEntry>>>;

    async fn quota_on(&self, flexvol: &str) -> Result<ApiReply<()>>;

    async fn quota_off(&self, flexvol: &str) -> Result<ApiReply<()>>;

    async fn quota_status(&self, flexvol: &str) -> Result<ApiReply<QuotaStatus>>;

    async fn quota_resize(&self, flexvol: &str) -> Result<ApiReply<()>>;

    async fn export_policy_create(&self, policy: &str) -> Result<ApiReply<()>>;

    async fn export_rule_create(&self, policy: &str, client_match: &str) -> Result<ApiReply<()>>;

    async fn export_rule_list(&self, policy: &str) -> Result<ApiReply<Vec<ExportRule>>>;
}

// =============================================================================
// Storage Driver Port
// =============================================================================

/// Request to create a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRequest {
    /// Name of the volume (becomes the qtree name)
    pub name: String,
    /// Requested capacity in bytes
    pub size_bytes: u64,
    /// Attribute options (`aggregate`, `spaceReserve`, `snapshotPolicy`,
    /// `snapshotDir`, `encryption`); missing keys use driver defaults
    pub options: BTreeMap<String, String>,
}

/// A provisioned volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    /// Backing container holding the volume
    pub container: String,
    /// Enforced capacity in bytes, when known
    pub size_bytes: Option<u64>,
    /// Driver that owns the volume
    pub driver: String,
}

/// Volume count of one backing container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    pub volume_count: usize,
}

/// Point-in-time view of a driver's pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverStatus {
    pub name: String,
    pub containers: Vec<ContainerStatus>,
    /// Containers waiting for a quota resize
    pub pending_resizes: Vec<String>,
    pub counters: BTreeMap<String, u64>,
}

/// Port for volume lifecycle operations
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name
    fn name(&self) -> &str;

    /// One-time setup against the backend
    async fn initialize(&self) -> Result<()>;

    /// Create a volume
    async fn create(&self, request: VolumeRequest) -> Result<VolumeInfo>;

    /// Destroy a volume. Destroying a missing volume succeeds.
    async fn destroy(&self, name: &str) -> Result<()>;

    /// Look up a volume
    async fn get(&self, name: &str) -> Result<Option<VolumeInfo>>;

    /// List volume names
    async fn list(&self) -> Result<Vec<String>>;

    /// Grow a volume
    async fn resize(&self, name: &str, size_bytes: u64) -> Result<VolumeInfo>;

    /// Pool summary
    async fn status(&self) -> Result<DriverStatus>;

    /// Spawn periodic maintenance tasks that stop when `token` is cancelled
    fn start_background(&self, _token: CancellationToken) -> Vec<JoinHandle<()>> {
        Vec::new()
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type OntapApiRef = Arc<dyn OntapApi>;
pub type StorageDriverRef = Arc<dyn StorageDriver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(ErrorCode::from_errno("13040"), ErrorCode::VolumeDoesNotExist);
        assert_eq!(ErrorCode::from_errno("13130"), ErrorCode::DuplicateEntry);
        assert_eq!(ErrorCode::from_errno("99"), ErrorCode::Other("99".into()));
        assert_eq!(ErrorCode::ObjectNotFound.errno(), "15661");
        assert!(ErrorCode::VolumeDoesNotExist.is_not_found());
        assert!(ErrorCode::AlreadyExists.is_duplicate());
    }

    #[test]
    fn test_reply_into_result() {
        let ok: ApiReply<u32> = ApiReply::Passed(3);
        assert_eq!(ok.into_result("op").unwrap(), 3);

        let failed: ApiReply<u32> = ApiReply::failed(ErrorCode::VolumeDoesNotExist, "gone");
        assert_eq!(failed.code(), Some(&ErrorCode::VolumeDoesNotExist));
        let err = failed.into_result("volume-destroy").unwrap_err();
        assert!(err.to_string().contains("volume-destroy"));
    }

    #[test]
    fn test_quota_entry_limits() {
        let entry = QuotaEntry::for_qtree("vol", "q1", 10 * 1024 * 1024 + 100);
        assert_eq!(entry.disk_limit, DiskLimit::Kilobytes(10 * 1024));
        assert_eq!(entry.disk_limit.bytes(), Some(10 * 1024 * 1024));
        assert_eq!(QuotaEntry::flexvol_default("vol").disk_limit.bytes(), None);
        assert_eq!(DiskLimit::Unlimited.to_string(), "-");
    }

    #[test]
    fn test_volume_size_display() {
        assert_eq!(VolumeSize::Absolute(1024).to_string(), "1024");
        assert_eq!(VolumeSize::Grow(10).to_string(), "+10");
        assert_eq!("volume".parse::<SpaceReserve>().unwrap(), SpaceReserve::Volume);
        assert!("thick".parse::<SpaceReserve>().is_err());
    }
}

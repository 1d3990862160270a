//! Report payloads delivered through the [`Host`](crate::host::Host)
//! trait.

use heapless::Vec;

use crate::result::{MAX_ERR_INFO, StdResult};
use crate::signature::Signature;

// ---------------------------------------------------------------------------
// System diagnosis
// ---------------------------------------------------------------------------

/// Identifies one segment of the ring walk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Branch index, counted from the master node's first port.
    pub branch: u8,
    /// Segment number within the branch (1 = first hop).
    pub num: u8,
    pub source: Signature,
    pub target: Signature,
}

/// Detail attached to a system diagnosis error report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdErrInfo {
    Unspecified,
    /// The welcomed node answered, but refused the welcome.
    WelcomeNoSuccess(SegmentInfo),
    /// Leaving diagnosis mode failed; the engine gave up.
    StopDiagFailed,
    /// A fatal engine event aborted the procedure.
    Terminated,
}

/// Progress report of the system diagnosis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdReport {
    /// A neighbor was welcomed on the current segment.
    TargetFound(SegmentInfo),
    /// Cable-link diagnosis ran on a dead segment; carries the quality
    /// code the controller returned.
    CableLink { segment: SegmentInfo, quality: u8 },
    Error(SdErrInfo),
    Aborted,
    /// Exactly one `Finished` closes every run.
    Finished,
}

// ---------------------------------------------------------------------------
// Back-channel diagnosis
// ---------------------------------------------------------------------------

/// Report of the back-channel diagnosis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BcdReport {
    /// The probed segment works.
    Success { segment: u8 },
    /// The master answered: the whole ring is closed.
    NoRingBreak { segment: u8 },
    /// No answer from the device under test: break located.
    RingBreak { segment: u8 },
    /// The device under test timed out on the back channel.
    Timeout1 { segment: u8 },
    /// The overall procedure timed out.
    Timeout2,
    Error,
    /// Diagnosis mode left; closes every run.
    End,
}

// ---------------------------------------------------------------------------
// Programming
// ---------------------------------------------------------------------------

/// Outcome class of a programming run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrgResult {
    Success,
    Timeout,
    NetOff,
    Error,
    /// A command failed synchronously before it reached the link.
    FktSync,
    /// A command was answered with an error by the target.
    FktAsync,
}

/// Which exchange of the programming sequence a report refers to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrgFunc {
    #[default]
    None,
    Welcome,
    WelcomeNoSuccess,
    MemOpen,
    MemWrite,
    MemClose,
    Init,
}

/// Report of a programming run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrgReport {
    pub code: PrgResult,
    pub function: PrgFunc,
    /// Raw error parameter bytes (tag + arguments), empty on success.
    pub parm: Vec<u8, MAX_ERR_INFO>,
}

impl PrgReport {
    pub fn success() -> Self {
        Self {
            code: PrgResult::Success,
            function: PrgFunc::None,
            parm: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Node scripting
// ---------------------------------------------------------------------------

/// Where a script run failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NsFailure {
    #[default]
    None,
    /// The link driver reported a transmission failure.
    Tx,
    /// The target answered a script step with an error, or the reply
    /// supervision timed out.
    TargetScript,
    /// Synchronizing the remote device failed.
    TargetSync,
}

/// Status handed back by the link driver for one transmitted telegram.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TxStatus {
    #[default]
    Ok,
    /// No receiver acknowledged the telegram.
    NoAck,
    /// The link driver gave up after retries.
    Failed,
}

/// Result of a script run on one node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NsResult {
    pub success: bool,
    pub failure: NsFailure,
    pub tx_status: TxStatus,
    /// Result of the failing exchange, when one exists.
    pub nic_result: StdResult,
}

impl NsResult {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Lifecycle state of a route.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RouteState {
    /// Inactive or endpoints not yet usable.
    #[default]
    Idle,
    /// Both endpoint nodes available and the route is active.
    Built,
    /// Was built, then an endpoint node became unavailable.
    Suspended,
}

// ---------------------------------------------------------------------------
// Node discovery
// ---------------------------------------------------------------------------

/// Application verdict on a freshly discovered signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NdAction {
    /// Welcome the node and assign it this operational address.
    Welcome { node_address: u16 },
    Ignore,
}

/// Report of the node discovery service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NdReport {
    /// A node accepted its welcome.
    WelcomeSuccess { signature: Signature },
    /// A node refused its welcome.
    WelcomeNoSuccess { signature: Signature },
    /// A queried node answered a signature request.
    Signature { signature: Signature },
    /// Discovery stopped (API or termination).
    Stopped,
    Error,
}

// ---------------------------------------------------------------------------
// Cable link / physical layer
// ---------------------------------------------------------------------------

/// Result of a single-shot cable-link diagnosis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CableLinkResult {
    pub port: u8,
    pub quality: u8,
}

/// Result of a physical-layer test poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhyTestResult {
    pub port: u8,
    pub lock_status: bool,
    pub err_count: u16,
}

// ---------------------------------------------------------------------------
// Remote device synchronization
// ---------------------------------------------------------------------------

/// Synchronization state of a remote device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeviceState {
    #[default]
    Unsynced,
    Syncing,
    Synced,
    Unsyncing,
}

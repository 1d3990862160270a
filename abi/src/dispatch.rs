//! Dispatch currency shared by the engine crates.
//!
//! No component stores a callback into another. Timers, observer slots
//! and scheduler entries carry the discriminants below; the engine root
//! matches on them and calls the owning component. The `match` is
//! exhaustive, so adding a variant forces every dispatcher to handle
//! it.

/// Which subsystem a timer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// Command supervision of the system diagnosis.
    SysDiag,
    /// Command supervision and wait states of the back-channel
    /// diagnosis.
    BcDiag,
    /// Supervision of a single-shot cable-link diagnosis.
    CableLink,
    /// Supervision of the programming sequence.
    Prog,
    /// Periodic hello broadcast of the node discovery.
    Discovery,
    /// Pre-send pause of a script session; the key selects the session.
    ScriptPause,
    /// Reply supervision of a script step; the key selects the session.
    ScriptGuard,
    /// API-lock countdown of the command set.
    LockCountdown,
}

/// Observer endpoint a reply (or synthetic result) is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObsToken {
    SdStart,
    SdStop,
    SdHello,
    SdWelcome,
    SdEnablePort,
    SdDisablePort,
    SdCableLink,
    BcdStart,
    BcdEnd,
    BcdEnableTx,
    BcdResult,
    NdHello,
    NdWelcome,
    NdSignature,
    PrgWelcome,
    PrgMemOpen,
    PrgMemWrite,
    PrgMemClose,
    CableLink,
    PhyTestArm,
    PhyTestResult,
    /// Device-init exchange of the remote sync manager; the payload is
    /// the device table index.
    RsmInit(u8),
}

/// Completion tag recorded with a tx message sent through
/// `send_ex`-style APIs; reported back with the link driver's status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxTag {
    /// A script step of the given session.
    Script(u8),
}

/// Identity of a registered scheduler service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceId {
    SysDiag,
    BcDiag,
    Discovery,
    Prog,
    /// One script session; the payload is the session index.
    Script(u8),
    Routing,
}

//! The host adapter trait.

use crate::error::EngineError;
use crate::report::{
    BcdReport, CableLinkResult, NdAction, NdReport, NsResult, PhyTestResult, PrgReport,
    RouteState, SdReport,
};
use crate::signature::Signature;
use crate::status::{NetworkStatus, StatusMask};

/// Everything the engine needs from its host.
///
/// The engine owns exactly one implementation and performs every upcall
/// through it: platform services (tick source, one wake-up timer,
/// service request, byte-link transmit) and the report surfaces of the
/// individual procedures. Report methods default to no-ops, mirroring
/// a configuration that leaves the corresponding callback unset.
pub trait Host {
    /// Returns the host's monotonic millisecond tick. Sixteen bits wide
    /// on purpose: deadline arithmetic is modular.
    fn get_tick_count(&mut self) -> u16;

    /// Asks the host to call `report_timeout()` after `ms` milliseconds.
    /// `0` disarms the platform timer.
    fn set_timer(&mut self, ms: u16);

    /// Asks the host to call `service()` soon.
    fn request_service(&mut self);

    /// Reports a fatal engine condition.
    fn error(&mut self, code: EngineError);

    /// Hands one encoded frame to the byte link driver.
    fn tx_enqueue(&mut self, frame: &[u8]);

    // --- report surfaces --------------------------------------------------

    fn sys_diag_report(&mut self, report: &SdReport) {
        let _ = report;
    }

    fn bc_diag_report(&mut self, report: BcdReport) {
        let _ = report;
    }

    fn prog_report(&mut self, report: &PrgReport) {
        let _ = report;
    }

    fn script_report(&mut self, node_address: u16, result: &NsResult) {
        let _ = (node_address, result);
    }

    fn route_report(&mut self, route_id: u16, state: RouteState) {
        let _ = (route_id, state);
    }

    /// Asked once per newly discovered signature; the verdict decides
    /// whether the node is welcomed and at which address.
    fn discovery_evaluate(&mut self, signature: &Signature) -> NdAction {
        let _ = signature;
        NdAction::Ignore
    }

    fn discovery_report(&mut self, report: &NdReport) {
        let _ = report;
    }

    fn cable_link_report(&mut self, result: CableLinkResult) {
        let _ = result;
    }

    fn phy_test_report(&mut self, result: &PhyTestResult) {
        let _ = result;
    }

    /// A physical-layer test exchange failed; `code` is the exchange
    /// result (timeout when the reply supervision expired).
    fn phy_test_failed(&mut self, code: crate::result::ResultCode) {
        let _ = code;
    }

    /// Network status changed; `mask` names the fields that differ from
    /// the previous report, pre-filtered by the configured change mask.
    fn network_status(&mut self, mask: StatusMask, status: &NetworkStatus) {
        let _ = (mask, status);
    }
}

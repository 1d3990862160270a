//! Synchronous API errors and asynchronous operation results.

use core::fmt;

use heapless::Vec;

/// Maximum number of raw error-info bytes carried inside a result.
///
/// The longest observed error info is the session-active reply of the
/// memory session (tag bytes plus a 16-bit session handle).
pub const MAX_ERR_INFO: usize = 8;

/// Error returned synchronously from an engine API call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiError {
    /// A caller-supplied argument violates a precondition.
    Parameter,
    /// The tx message pool is exhausted; retry after a send completes.
    BufferOverflow,
    /// The addressed method is already running.
    ApiLocked,
    /// The engine has not been initialized.
    NotInitialized,
    /// A one-time setting was applied twice.
    AlreadySet,
    /// The operation has no work to act on (e.g. abort while idle).
    NotAvailable,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parameter => write!(f, "invalid parameter"),
            Self::BufferOverflow => write!(f, "tx message pool exhausted"),
            Self::ApiLocked => write!(f, "method already in use"),
            Self::NotInitialized => write!(f, "engine not initialized"),
            Self::AlreadySet => write!(f, "value already set"),
            Self::NotAvailable => write!(f, "operation not available"),
        }
    }
}

/// Result code of an asynchronous exchange with a node or the local
/// controller.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    /// The exchange succeeded.
    Success = 0x00,
    /// The peer reported a standard (non function-specific) error.
    Standard = 0x01,
    /// The request was malformed from the peer's point of view.
    Format = 0x02,
    /// The peer is busy.
    Busy = 0x03,
    /// The function is not available on the peer.
    NotAvailable = 0x04,
    /// The peer is still processing an earlier request.
    Processing = 0x05,
    /// The peer rejected the request for configuration reasons.
    Configuration = 0x06,
    /// No reply arrived within the supervision window.
    Timeout = 0x07,
    /// The link driver failed to transmit the request.
    Transmission = 0x08,
}

impl ResultCode {
    /// Maps a function-specific error class byte onto the result enum.
    ///
    /// The error info of a function-specific error carries the class in
    /// byte 1; the resulting code is that value plus one, saturated to
    /// `Configuration` for classes this engine does not distinguish.
    pub const fn from_class(class: u8) -> Self {
        match class.wrapping_add(1) {
            0x01 => Self::Standard,
            0x02 => Self::Format,
            0x03 => Self::Busy,
            0x04 => Self::NotAvailable,
            0x05 => Self::Processing,
            _ => Self::Configuration,
        }
    }
}

/// First error-info byte that marks a function-specific error; anything
/// else is reported as [`ResultCode::Standard`].
pub const ERR_MARKER_FUNCTION_SPECIFIC: u8 = 0x20;

impl Default for ResultCode {
    fn default() -> Self {
        Self::Success
    }
}

/// Result of an asynchronous exchange: a code plus the raw error-info
/// bytes the peer attached (empty on success).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StdResult {
    pub code: ResultCode,
    pub info: Vec<u8, MAX_ERR_INFO>,
}

impl StdResult {
    /// A plain success result with no error info.
    pub fn success() -> Self {
        Self::default()
    }

    /// A synthetic result carrying only a code (timeout, transmission).
    pub fn from_code(code: ResultCode) -> Self {
        Self {
            code,
            info: Vec::new(),
        }
    }

    /// `true` if the exchange succeeded.
    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }

    /// Translates a raw error payload into a result.
    ///
    /// Byte 0 different from [`ERR_MARKER_FUNCTION_SPECIFIC`] yields a
    /// standard error; otherwise byte 1 selects the function-specific
    /// class. The remaining bytes are kept verbatim (truncated to
    /// [`MAX_ERR_INFO`]).
    pub fn translate_error(raw: &[u8]) -> Self {
        let code = match raw {
            [] => ResultCode::Standard,
            [first, ..] if *first != ERR_MARKER_FUNCTION_SPECIFIC => ResultCode::Standard,
            [_, class, ..] => ResultCode::from_class(*class),
            [_] => ResultCode::Standard,
        };
        let rest = if raw.first() == Some(&ERR_MARKER_FUNCTION_SPECIFIC) && raw.len() >= 2 {
            &raw[2..]
        } else {
            raw
        };
        let mut info = Vec::new();
        for b in rest.iter().take(MAX_ERR_INFO) {
            // capacity matches the take() bound
            let _ = info.push(*b);
        }
        Self { code, info }
    }

    /// Builds the raw error payload a peer would send for `(code, info)`.
    ///
    /// Inverse of [`translate_error`](Self::translate_error) for every
    /// representable pair; used by tests and by the loopback paths.
    pub fn encode_error(code: ResultCode, info: &[u8], out: &mut [u8]) -> usize {
        match code {
            ResultCode::Standard => {
                let n = info.len().min(out.len());
                out[..n].copy_from_slice(&info[..n]);
                n
            }
            other => {
                out[0] = ERR_MARKER_FUNCTION_SPECIFIC;
                out[1] = (other as u8).wrapping_sub(1);
                let n = info.len().min(out.len().saturating_sub(2));
                out[2..2 + n].copy_from_slice(&info[..n]);
                n + 2
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_error_marker() {
        let res = StdResult::translate_error(&[0x11, 0x03, 0xAA]);
        assert_eq!(res.code, ResultCode::Standard);
        assert_eq!(res.info.as_slice(), &[0x11, 0x03, 0xAA]);
    }

    #[test]
    fn function_specific_classes() {
        let res = StdResult::translate_error(&[0x20, 0x02, 0x55, 0x66]);
        assert_eq!(res.code, ResultCode::Busy);
        assert_eq!(res.info.as_slice(), &[0x55, 0x66]);
    }

    #[test]
    fn error_round_trip() {
        let mut buf = [0u8; 16];
        for code in [
            ResultCode::Format,
            ResultCode::Busy,
            ResultCode::NotAvailable,
            ResultCode::Processing,
        ] {
            let info = [0xDE, 0xAD];
            let n = StdResult::encode_error(code, &info, &mut buf);
            let back = StdResult::translate_error(&buf[..n]);
            assert_eq!(back.code, code);
            assert_eq!(back.info.as_slice(), &info);
        }
    }
}

//! Error codes for the MQTT client shell
//!
//! Every status coming back from the engine boundary is translated into a single
//! typed error, [`CrtError`], carrying a numeric code. Human-readable names and
//! messages are resolved through a process-wide list of error tables which the
//! subsystem registry registers during `initialize()` and removes during
//! `clean_up()`.

use once_cell::sync::Lazy;
use std::sync::RwLock;
use thiserror::Error;

/// First code of the crate's error range
pub const MQTT_KIT_ERROR_BASE: i32 = 0x3C00;

/// Error codes raised by the client shell and the bundled engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    EventLoopUnavailable = MQTT_KIT_ERROR_BASE,
    InvalidClientOptions,
    InvalidDisconnectPacket,
    ClientTerminated,
    ConnectionRefused,
    ConnectionFailed,
    ConnackTimeout,
    ServerDisconnect,
    UserRequestedStop,
    ReconnectAttemptsExhausted,
    SubscribeFailed,
}

impl ErrorCode {
    const ALL: [ErrorCode; 11] = [
        ErrorCode::EventLoopUnavailable,
        ErrorCode::InvalidClientOptions,
        ErrorCode::InvalidDisconnectPacket,
        ErrorCode::ClientTerminated,
        ErrorCode::ConnectionRefused,
        ErrorCode::ConnectionFailed,
        ErrorCode::ConnackTimeout,
        ErrorCode::ServerDisconnect,
        ErrorCode::UserRequestedStop,
        ErrorCode::ReconnectAttemptsExhausted,
        ErrorCode::SubscribeFailed,
    ];

    /// Numeric value of this code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a raw code back onto the crate's range
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }
}

/// Name and description of one error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: i32,
    pub name: &'static str,
    pub message: &'static str,
}

/// A contiguous block of error codes owned by one package
#[derive(Debug)]
pub struct ErrorTable {
    pub package: &'static str,
    pub entries: &'static [ErrorInfo],
}

impl ErrorTable {
    fn lookup(&self, code: i32) -> Option<&'static ErrorInfo> {
        self.entries.iter().find(|info| info.code == code)
    }
}

const fn info(code: ErrorCode, name: &'static str, message: &'static str) -> ErrorInfo {
    ErrorInfo {
        code: code as i32,
        name,
        message,
    }
}

/// Error table for this crate, registered by the subsystem registry
pub static MQTT_KIT_ERROR_TABLE: ErrorTable = ErrorTable {
    package: "mqttkit",
    entries: &[
        info(
            ErrorCode::EventLoopUnavailable,
            "MQTT_KIT_ERROR_EVENT_LOOP_UNAVAILABLE",
            "The messaging subsystem is not initialized; call runtime::initialize() first",
        ),
        info(
            ErrorCode::InvalidClientOptions,
            "MQTT_KIT_ERROR_INVALID_CLIENT_OPTIONS",
            "Client options failed validation",
        ),
        info(
            ErrorCode::InvalidDisconnectPacket,
            "MQTT_KIT_ERROR_INVALID_DISCONNECT_PACKET",
            "Disconnect packet is not valid for a client to send",
        ),
        info(
            ErrorCode::ClientTerminated,
            "MQTT_KIT_ERROR_CLIENT_TERMINATED",
            "The engine client has terminated and no longer accepts requests",
        ),
        info(
            ErrorCode::ConnectionRefused,
            "MQTT_KIT_ERROR_CONNECTION_REFUSED",
            "The broker rejected the connection",
        ),
        info(
            ErrorCode::ConnectionFailed,
            "MQTT_KIT_ERROR_CONNECTION_FAILED",
            "The network connection to the broker failed",
        ),
        info(
            ErrorCode::ConnackTimeout,
            "MQTT_KIT_ERROR_CONNACK_TIMEOUT",
            "No CONNACK was received before the connack timeout elapsed",
        ),
        info(
            ErrorCode::ServerDisconnect,
            "MQTT_KIT_ERROR_SERVER_DISCONNECT",
            "The broker closed the session with a DISCONNECT packet",
        ),
        info(
            ErrorCode::UserRequestedStop,
            "MQTT_KIT_ERROR_USER_REQUESTED_STOP",
            "The connection was closed because the client was stopped",
        ),
        info(
            ErrorCode::ReconnectAttemptsExhausted,
            "MQTT_KIT_ERROR_RECONNECT_ATTEMPTS_EXHAUSTED",
            "Maximum reconnection attempts exceeded",
        ),
        info(
            ErrorCode::SubscribeFailed,
            "MQTT_KIT_ERROR_SUBSCRIBE_FAILED",
            "Failed to queue a subscription request",
        ),
    ],
};

static REGISTERED_TABLES: Lazy<RwLock<Vec<&'static ErrorTable>>> =
    Lazy::new(|| RwLock::new(Vec::new()));

/// Make a table's names and messages available to [`CrtError`]
pub fn register_error_table(table: &'static ErrorTable) {
    let mut tables = REGISTERED_TABLES
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    tables.push(table);
}

/// Remove one registration of `table`
///
/// Registrations are counted: a table stays resolvable until every
/// registration has been matched by an unregistration.
pub fn unregister_error_table(table: &'static ErrorTable) {
    let mut tables = REGISTERED_TABLES
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(index) = tables.iter().position(|t| std::ptr::eq(*t, table)) {
        tables.remove(index);
    }
}

/// Whether `table` currently has at least one registration
pub fn is_error_table_registered(table: &'static ErrorTable) -> bool {
    REGISTERED_TABLES
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .iter()
        .any(|t| std::ptr::eq(*t, table))
}

fn lookup(code: i32) -> Option<&'static ErrorInfo> {
    REGISTERED_TABLES
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .iter()
        .find_map(|table| table.lookup(code))
}

/// Typed error carrying a numeric engine status code
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[error("{} ({code}): {}", self.name(), self.message())]
pub struct CrtError {
    code: i32,
}

impl CrtError {
    pub fn new(code: i32) -> Self {
        Self { code }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    /// The crate-level code, if this error belongs to the crate's range
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }

    /// Registered name of the code, or `UNKNOWN_ERROR_CODE`
    pub fn name(&self) -> &'static str {
        lookup(self.code).map_or("UNKNOWN_ERROR_CODE", |info| info.name)
    }

    /// Registered description of the code
    pub fn message(&self) -> &'static str {
        lookup(self.code).map_or("Unknown error code", |info| info.message)
    }
}

impl From<ErrorCode> for CrtError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code.code())
    }
}

/// Result type for client operations
pub type CrtResult<T> = Result<T, CrtError>;

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_TABLE: ErrorTable = ErrorTable {
        package: "error-tests",
        entries: &[ErrorInfo {
            code: 0x7F00,
            name: "TEST_ERROR",
            message: "Raised by the error module tests",
        }],
    };

    static COUNTED_TABLE: ErrorTable = ErrorTable {
        package: "error-tests-counted",
        entries: &[],
    };

    #[test]
    fn test_error_codes_are_contiguous() {
        for (offset, code) in ErrorCode::ALL.iter().enumerate() {
            assert_eq!(code.code(), MQTT_KIT_ERROR_BASE + offset as i32);
        }
    }

    #[test]
    fn test_table_covers_every_code() {
        for code in ErrorCode::ALL {
            assert!(
                MQTT_KIT_ERROR_TABLE.lookup(code.code()).is_some(),
                "missing table entry for {code:?}"
            );
        }
        assert_eq!(MQTT_KIT_ERROR_TABLE.entries.len(), ErrorCode::ALL.len());
    }

    #[test]
    fn test_from_code_round_trips_known_codes() {
        assert_eq!(
            ErrorCode::from_code(MQTT_KIT_ERROR_BASE),
            Some(ErrorCode::EventLoopUnavailable)
        );
        assert_eq!(ErrorCode::from_code(1), None);
    }

    #[test]
    fn test_registered_table_resolves_names() {
        register_error_table(&TEST_TABLE);
        let error = CrtError::new(0x7F00);
        assert_eq!(error.name(), "TEST_ERROR");
        assert!(error.to_string().contains("Raised by the error module tests"));
        unregister_error_table(&TEST_TABLE);

        assert_eq!(error.name(), "UNKNOWN_ERROR_CODE");
    }

    #[test]
    fn test_registrations_are_counted() {
        register_error_table(&COUNTED_TABLE);
        register_error_table(&COUNTED_TABLE);
        unregister_error_table(&COUNTED_TABLE);
        assert!(is_error_table_registered(&COUNTED_TABLE));
        unregister_error_table(&COUNTED_TABLE);
        assert!(!is_error_table_registered(&COUNTED_TABLE));
    }

    #[test]
    fn test_unknown_code_display() {
        let error = CrtError::new(-1);
        assert_eq!(error.code(), -1);
        assert_eq!(error.error_code(), None);
        assert!(error.to_string().contains("(-1)"));
    }

    #[test]
    fn test_error_trait_object() {
        let error: Box<dyn std::error::Error + Send + Sync> = Box::new(CrtError::new(-1));
        assert_eq!(
            error.to_string(),
            "UNKNOWN_ERROR_CODE (-1): Unknown error code"
        );
        assert!(error.source().is_none());
    }
}

//*****************
//External crates
//*****************
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate slog;

//*****************
//Modules declaration
//*****************
pub mod config;
pub mod dsr;
pub mod logging;
pub mod network;
pub mod simulation;

//*****************
//Constants
//*****************
/// IP protocol number assigned to DSR.
pub const DSR_PROTOCOL_NUMBER: u8 = 48;

//*****************
//Errors
//*****************
use std::error::Error;
use std::fmt;

/// Error struct for this crate
#[derive(Debug)]
pub struct DsrError {
    pub cause: Option<Box<dyn Error>>,
    pub kind: DsrErrorKind,
}

/// Types of errors produced in this crate
#[derive(Debug)]
pub enum DsrErrorKind {
    /// Failures related to [de]serializing data, including malformed packets
    Serialization(String),
    /// Failures in configuration of the system
    Configuration(String),
    /// A bounded buffer refused a new entry
    QueueFull(String),
    /// No route could be found for a destination
    RouteNotFound(String),
    /// Networking related failures
    Networking(String),
    /// Errors from the simulation harness
    Simulation(String),
}

impl Error for DsrError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.cause {
            Some(ref cause) => Some(&**cause),
            None => None,
        }
    }
}

impl fmt::Display for DsrError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl fmt::Display for DsrErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DsrErrorKind::Serialization(msg) => write!(f, "{}", msg),
            DsrErrorKind::Configuration(msg) => write!(f, "{}", msg),
            DsrErrorKind::QueueFull(msg) => write!(f, "{}", msg),
            DsrErrorKind::RouteNotFound(msg) => write!(f, "{}", msg),
            DsrErrorKind::Networking(msg) => write!(f, "{}", msg),
            DsrErrorKind::Simulation(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<DsrErrorKind> for DsrError {
    fn from(kind: DsrErrorKind) -> DsrError {
        DsrError { cause: None, kind }
    }
}

impl From<std::io::Error> for DsrError {
    fn from(err: std::io::Error) -> DsrError {
        DsrError {
            kind: DsrErrorKind::Networking(String::from("I/O failure")),
            cause: Some(Box::new(err)),
        }
    }
}

//! Module related to creating the loggers of the routing core and processing the logs they produce.

// Lint options for this module
#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

use crate::dsr::wire::DsrPacket;
use crate::{DsrError, DsrErrorKind};
use slog::{Drain, Key, Logger, Record, Serializer, Value};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::BufRead;
use std::net::Ipv4Addr;
use std::path::Path;

/// Directory name for where the logs will be placed.
pub const LOG_DIR_NAME: &str = "log";
/// Default log file name for a simulation run
pub const DEFAULT_LOG_FILE: &str = "dsr.log";
const LOG_CHANNEL_SIZE: usize = 512; //Default is 128
const LOG_THREAD_NAME: &str = "LoggerThread";

/// Enum that represents the possible status of a packet as it moves through the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// The packet has reached its destination.
    ACCEPTED,
    /// The packet has been dropped. The *reason* field should provide more data.
    DROPPED,
    /// The packet has reached an intermediate node and will be forwarded.
    FORWARDING,
    /// A new packet has been transmitted
    SENT,
    /// The packet has been queued. This usually indicates a pending route operation.
    QUEUED,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MessageStatus::ACCEPTED => write!(f, "ACCEPTED"),
            MessageStatus::DROPPED => write!(f, "DROPPED"),
            MessageStatus::FORWARDING => write!(f, "FORWARDING"),
            MessageStatus::SENT => write!(f, "SENT"),
            MessageStatus::QUEUED => write!(f, "QUEUED"),
        }
    }
}

impl Value for MessageStatus {
    fn serialize(&self, _rec: &Record, key: Key, serializer: &mut dyn Serializer) -> slog::Result {
        serializer.emit_str(key, &self.to_string())
    }
}

/// Struct that encapsulates a log entry
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogEntry {
    /// Main log message
    pub msg: String,
    /// Logging level
    pub level: String,
    /// Timestamp of the event
    pub ts: String,
    /// Node that produced the record
    pub node: Option<String>,
    /// Packet status
    pub status: Option<String>,
    /// Reason for status
    pub reason: Option<String>,
    /// Type of message
    pub msg_type: Option<String>,
    /// ID of message
    pub msg_id: Option<String>,
}

///Struct to hold a log record of received messages
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReceivedMsgLog {
    /// The timestamp of the message
    pub ts: String,
    /// The node that logged the record
    pub node: String,
    ///The type of message
    pub msg_type: String,
    ///The node that transmitted this message
    pub source: String,
    ///The destination (if any) that this message was meant for
    pub destination: String,
    ///The unique id of this message
    pub msg_id: String,
    ///The number of hops this message took to this node
    pub hops: u16,
    ///The status of this message. Refer to the *MessageStatus* struct
    pub status: String,
    ///The reason (if any) for the status.
    pub reason: String,
    ///Optional actions triggered by the reception of this message.
    pub action: String,
}

///Struct to hold a log record of an outgoing message
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutgoingMsgLog {
    /// The timestamp of the message
    pub ts: String,
    /// The node that logged the record
    pub node: String,
    ///The type of message
    pub msg_type: String,
    ///The node that transmitted this message
    pub source: String,
    ///The neighbour (or broadcast address) the frame was handed to
    pub destination: String,
    ///The unique id of this message
    pub msg_id: String,
    ///The status of this message. Refer to the *MessageStatus* struct
    pub status: String,
    ///Size of the frame in bytes
    pub size: usize,
}

/// Logs an incoming packet
pub fn log_handle_message(
    logger: &Logger,
    packet: &DsrPacket,
    source: Ipv4Addr,
    destination: Ipv4Addr,
    status: MessageStatus,
    reason: Option<&str>,
    action: Option<&str>,
) {
    info!(
        logger,
        "Received message";
        packet,
        "hops"=>packet.hops(),
        "destination"=>%destination,
        "source"=>%source,
        "action"=>action.unwrap_or(""),
        "reason"=>reason.unwrap_or(""),
        "status"=>status,
        "msg_id"=>packet.msg_id(),
    );
}

/// Logs a frame handed to the link layer
pub fn log_tx(
    logger: &Logger,
    packet: &DsrPacket,
    source: Ipv4Addr,
    next_hop: Ipv4Addr,
    status: MessageStatus,
) {
    info!(
        logger,
        "Message sent";
        packet,
        "size" => packet.serialized_size(),
        "destination" => %next_hop,
        "source" => %source,
        "status" => status,
        "msg_id" => packet.msg_id(),
    );
}

fn read_lines<P, T>(path: P, filter: Option<&str>) -> Result<Vec<T>, io::Error>
where
    P: AsRef<Path>,
    T: serde::de::DeserializeOwned,
{
    let file = File::open(path)?;
    let mut records = Vec::new();
    let reader = io::BufReader::new(file);

    for line in reader.lines() {
        let data = line?;
        if filter.map(|f| data.contains(f)).unwrap_or(true) {
            let u: T = serde_json::from_str(&data)?;
            records.push(u);
        }
    }

    Ok(records)
}

///Loads a log file and produces an array of log records for processing.
pub fn get_log_records_from_file<P: AsRef<Path>>(path: P) -> Result<Vec<LogEntry>, io::Error> {
    read_lines(path, None)
}

///Creates a Vector that holds all the logs of received messages
pub fn get_received_message_records<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<ReceivedMsgLog>, io::Error> {
    read_lines(path, Some("Received message"))
}

///Creates a Vector that holds all the outgoing message logs
pub fn get_outgoing_message_records<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<OutgoingMsgLog>, io::Error> {
    read_lines(path, Some("Message sent"))
}

///Returns the first log record whose message matches the one passed.
pub fn find_record_by_msg<'a>(msg: &str, records: &'a [LogEntry]) -> Option<&'a LogEntry> {
    records.iter().find(|rec| rec.msg == msg)
}

/// Create a duplicate logger for the terminal and the file passed as parameter.
pub fn create_logger<P: AsRef<Path>>(log_file_name: P, log_term: bool) -> Result<Logger, DsrError> {
    //Make sure the full path is valid
    if let Some(parent) = log_file_name.as_ref().parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            let err_msg = String::from("Could not create log directory structure");
            DsrError {
                kind: DsrErrorKind::Configuration(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_file_name)?;

    if log_term {
        Ok(create_term_and_file_logger(log_file))
    } else {
        Ok(create_file_logger(log_file))
    }
}

fn create_file_logger(log_file: File) -> Logger {
    let d2 = slog_json::Json::new(log_file)
        .add_default_keys()
        .build()
        .fuse();
    let d2 = slog_async::Async::new(d2)
        .chan_size(LOG_CHANNEL_SIZE)
        .overflow_strategy(slog_async::OverflowStrategy::Drop)
        .thread_name(format!("File{}", LOG_THREAD_NAME))
        .build()
        .fuse();

    Logger::root(d2, o!())
}

fn create_term_and_file_logger(log_file: File) -> Logger {
    //Create the terminal drain
    let decorator = slog_term::TermDecorator::new().build();
    let d1 = slog_term::CompactFormat::new(decorator).build().fuse();
    let d1 = slog_async::Async::new(d1)
        .chan_size(LOG_CHANNEL_SIZE)
        .overflow_strategy(slog_async::OverflowStrategy::Drop)
        .thread_name(format!("Term{}", LOG_THREAD_NAME))
        .build()
        .fuse();

    //Create the file drain
    let d2 = slog_json::Json::new(log_file)
        .add_default_keys()
        .build()
        .fuse();
    let d2 = slog_async::Async::new(d2)
        .chan_size(LOG_CHANNEL_SIZE)
        .overflow_strategy(slog_async::OverflowStrategy::Drop)
        .thread_name(format!("File{}", LOG_THREAD_NAME))
        .build()
        .fuse();

    //Fuse the drains and create the logger
    Logger::root(slog::Duplicate::new(d1, d2).fuse(), o!())
}

/// Creates a logger that discards all records. Used for tests that don't need logs.
pub fn create_discard_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;

    #[test]
    fn received_records_are_parsed() {
        let mut path = env::temp_dir();
        path.push("dsr_logging_records.log");
        {
            let mut file = File::create(&path).expect("Could not create log file");
            writeln!(
                file,
                "{}",
                r#"{"msg":"Received message","level":"INFO","ts":"t0","node":"10.0.0.3","msg_type":"DATA","source":"10.0.0.2","destination":"10.0.0.3","msg_id":"abc","hops":2,"status":"ACCEPTED","reason":"","action":""}"#
            )
            .expect("Could not write log file");
            writeln!(
                file,
                "{}",
                r#"{"msg":"Message sent","level":"INFO","ts":"t1","node":"10.0.0.1","msg_type":"RREQ","source":"10.0.0.1","destination":"255.255.255.255","msg_id":"def","status":"SENT","size":24}"#
            )
            .expect("Could not write log file");
        }

        let received = get_received_message_records(&path).expect("Could not read records");
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].hops, 2);
        assert_eq!(received[0].status, "ACCEPTED");

        let sent = get_outgoing_message_records(&path).expect("Could not read records");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].size, 24);

        let all = get_log_records_from_file(&path).expect("Could not read records");
        assert_eq!(all.len(), 2);
        assert!(find_record_by_msg("Message sent", &all).is_some());
    }
}

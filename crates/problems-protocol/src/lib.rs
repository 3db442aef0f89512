pub mod paths;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Object handle (session, task, or entry) as exposed to clients.
pub type ObjectPath = String;

/// Return values of the `authorize` command.
pub const AUTHORIZE_GRANTED: i32 = 0;
pub const AUTHORIZE_PENDING: i32 = 1;
pub const AUTHORIZE_ALREADY: i32 = 2;

/// Bit flags carried by requests.
pub mod flags {
    /// `new_problem`: start processing immediately.
    pub const NEW_PROBLEM_AUTO_START: u32 = 0x1;
    /// `new_problem`: stop once the temporary entry exists.
    pub const NEW_PROBLEM_STOP_AFTER_TEMP_ENTRY: u32 = 0x2;
    /// `new_problem`: run duplicate detection and notification synchronously.
    pub const NEW_PROBLEM_SYNC_PROCESSING: u32 = 0x4;

    /// `get_problems`: include other users' accessible problems.
    pub const GET_PROBLEMS_FOREIGN: u32 = 0x1;
    /// `get_problems`: include temporary entries of unfinished tasks.
    pub const GET_PROBLEMS_NEW: u32 = 0x2;

    pub const READ_ALL_FD: u32 = 0x01;
    pub const READ_ALL_TYPES: u32 = 0x02;
    pub const READ_ONLY_TEXT: u32 = 0x04;
    pub const READ_ONLY_BIG_TEXT: u32 = 0x08;
    pub const READ_ONLY_BINARY: u32 = 0x10;
    pub const READ_ALL_NO_FD: u32 = 0x20;

    pub const SAVE_IO_ERROR_FATAL: u32 = 0x1;
    pub const SAVE_UNSUPPORTED_ERROR_FATAL: u32 = 0x2;
    pub const SAVE_ELEMENTS_COUNT_LIMIT_FATAL: u32 = 0x4;
    pub const SAVE_DATA_SIZE_LIMIT_FATAL: u32 = 0x8;
    pub const SAVE_ALL_FATAL: u32 = 0xF;
}

/// Client-to-server requests sent as JSON-lines over the Unix socket.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    // Session management
    GetSession,
    Authorize {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        peer_bus: Option<String>,
        #[serde(default)]
        peer_token: Option<String>,
    },
    GenerateToken {
        #[serde(default)]
        lifetime_secs: u64,
    },
    RevokeToken {
        token: String,
    },
    RevokeAuthorization,
    CloseSession,
    SessionIsAuthorized,

    // Problem ingestion tasks
    NewProblem {
        elements: BTreeMap<String, ElementPayload>,
        #[serde(default)]
        flags: u32,
    },
    TaskStart {
        task: ObjectPath,
    },
    TaskCancel {
        task: ObjectPath,
    },
    TaskFinish {
        task: ObjectPath,
    },
    TaskStatus {
        task: ObjectPath,
    },
    TaskDetails {
        task: ObjectPath,
    },

    // Entries
    GetProblems {
        #[serde(default)]
        flags: u32,
    },
    GetProblemData {
        entry: ObjectPath,
    },
    DeleteProblems {
        entries: Vec<ObjectPath>,
    },
    ReadElements {
        entry: ObjectPath,
        names: Vec<String>,
        #[serde(default)]
        flags: u32,
    },
    SaveElements {
        entry: ObjectPath,
        elements: BTreeMap<String, ElementPayload>,
        #[serde(default)]
        flags: u32,
    },
    DeleteElements {
        entry: ObjectPath,
        names: Vec<String>,
    },
    EntryInfo {
        entry: ObjectPath,
    },
}

/// Server-to-client responses.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Error {
        message: String,
        code: ErrorCode,
    },
    Event(Event),
}

/// Events pushed to connected clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Crash {
        entry: ObjectPath,
        uid: u32,
    },
    AuthorizationChanged {
        session: ObjectPath,
        status: AuthStatus,
    },
    TaskStatusChanged {
        task: ObjectPath,
        status: TaskStatus,
    },
}

/// Error codes for structured error handling.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadAddress,
    AccessDeniedRead,
    AccessDeniedDelete,
    AccessDeniedWrite,
    AuthFailure,
    LimitsExceeded,
    InvalidElement,
    TaskFailed,
    ObjectGone,
    CapacityExceeded,
    InvalidRequest,
    ServerError,
}

/// Session authorization state as reported in change events.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Authorized,
    Pending,
    NotAuthorized,
    Failed,
}

impl AuthStatus {
    pub fn code(self) -> u32 {
        match self {
            AuthStatus::Authorized => 0,
            AuthStatus::Pending => 1,
            AuthStatus::NotAuthorized => 2,
            AuthStatus::Failed => 3,
        }
    }
}

/// Lifecycle state of an ingestion task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    New,
    Running,
    Stopped,
    Canceled,
    Failed,
    Done,
}

impl TaskStatus {
    pub fn code(self) -> u32 {
        match self {
            TaskStatus::New => 0,
            TaskStatus::Running => 1,
            TaskStatus::Stopped => 2,
            TaskStatus::Canceled => 3,
            TaskStatus::Failed => 4,
            TaskStatus::Done => 5,
        }
    }

    /// True once the task can be finished and its results collected.
    /// A stopped task is paused, not terminal; it can still be resumed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Canceled | TaskStatus::Failed | TaskStatus::Done
        )
    }
}

/// Result codes delivered by `task_finish` for new-problem tasks.
pub mod task_result {
    pub const ACCEPTED: u32 = 0;
    pub const FAILED: u32 = 1;
    pub const DUPLICATE: u32 = 2;
    pub const DROPPED: u32 = 3;
    pub const INVALID_DATA: u32 = 4;
}

/// One element value on the wire. Text stays readable JSON, binary data is
/// base64-encoded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementPayload {
    Text {
        value: String,
    },
    Binary {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

/// Properties of a problem entry returned by `entry_info`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EntryInfo {
    pub id: String,
    pub uuid: String,
    #[serde(default)]
    pub duphash: Option<String>,
    #[serde(rename = "type")]
    pub problem_type: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub command_line_arguments: Option<String>,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    pub uid: u32,
    pub count: u64,
    pub first_occurrence_epoch_secs: u64,
    pub last_occurrence_epoch_secs: u64,
    pub is_reported: bool,
    pub can_be_reported: bool,
    pub is_remote: bool,
    pub elements: Vec<String>,
    pub reports: Vec<ReportInfo>,
}

/// One parsed destination from the entry's `reported_to` element.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReportInfo {
    pub label: String,
    pub data: BTreeMap<String, String>,
}

/// Base64 encoding for byte arrays in JSON.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tag_format() {
        let req = Request::GetSession;
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"cmd":"get_session"}"#);
    }

    #[test]
    fn request_authorize_defaults() {
        let json = r#"{"cmd":"authorize"}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        match req {
            Request::Authorize {
                message,
                peer_bus,
                peer_token,
            } => {
                assert!(message.is_none());
                assert!(peer_bus.is_none());
                assert!(peer_token.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn request_new_problem_roundtrip() {
        let mut elements = BTreeMap::new();
        elements.insert(
            "type".to_string(),
            ElementPayload::Text {
                value: "CCpp".to_string(),
            },
        );
        elements.insert(
            "coredump".to_string(),
            ElementPayload::Binary {
                data: vec![0x7f, b'E', b'L', b'F'],
            },
        );
        let req = Request::NewProblem {
            elements,
            flags: flags::NEW_PROBLEM_AUTO_START,
        };

        let json = serde_json::to_string(&req).unwrap();
        // Binary data travels base64-encoded, never raw
        assert!(!json.contains("ELF"));
        let parsed: Request = serde_json::from_str(&json).unwrap();
        match parsed {
            Request::NewProblem { elements, flags } => {
                assert_eq!(flags, 0x1);
                assert_eq!(
                    elements.get("coredump"),
                    Some(&ElementPayload::Binary {
                        data: vec![0x7f, b'E', b'L', b'F'],
                    })
                );
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn request_flags_default_to_zero() {
        let json = r#"{"cmd":"get_problems"}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        match req {
            Request::GetProblems { flags } => assert_eq!(flags, 0),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn response_error_roundtrip() {
        let resp = Response::Error {
            message: "Requested Entry does not exist".to_string(),
            code: ErrorCode::BadAddress,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("bad_address"));
        let parsed: Response = serde_json::from_str(&json).unwrap();
        match parsed {
            Response::Error { code, .. } => assert_eq!(code, ErrorCode::BadAddress),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn event_crash_roundtrip() {
        let event = Event::Crash {
            entry: "/problems/entry/0123abcd".to_string(),
            uid: 1000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"crash\""));
        let parsed: Event = serde_json::from_str(&json).unwrap();
        match parsed {
            Event::Crash { entry, uid } => {
                assert_eq!(entry, "/problems/entry/0123abcd");
                assert_eq!(uid, 1000);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn task_status_codes() {
        assert_eq!(TaskStatus::New.code(), 0);
        assert_eq!(TaskStatus::Running.code(), 1);
        assert_eq!(TaskStatus::Stopped.code(), 2);
        assert_eq!(TaskStatus::Canceled.code(), 3);
        assert_eq!(TaskStatus::Failed.code(), 4);
        assert_eq!(TaskStatus::Done.code(), 5);
        assert!(!TaskStatus::New.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Stopped.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(TaskStatus::Done.is_terminal());
    }

    #[test]
    fn auth_status_codes() {
        assert_eq!(AuthStatus::Authorized.code(), 0);
        assert_eq!(AuthStatus::Pending.code(), 1);
        assert_eq!(AuthStatus::NotAuthorized.code(), 2);
        assert_eq!(AuthStatus::Failed.code(), 3);
    }

    #[test]
    fn all_error_codes_roundtrip() {
        let codes = vec![
            ErrorCode::BadAddress,
            ErrorCode::AccessDeniedRead,
            ErrorCode::AccessDeniedDelete,
            ErrorCode::AccessDeniedWrite,
            ErrorCode::AuthFailure,
            ErrorCode::LimitsExceeded,
            ErrorCode::InvalidElement,
            ErrorCode::TaskFailed,
            ErrorCode::ObjectGone,
            ErrorCode::CapacityExceeded,
            ErrorCode::InvalidRequest,
            ErrorCode::ServerError,
        ];
        for code in codes {
            let json = serde_json::to_string(&code).unwrap();
            let parsed: ErrorCode = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, code);
        }
    }

    #[test]
    fn entry_info_roundtrip() {
        let info = EntryInfo {
            id: "ccpp-2026-01-01-1000".to_string(),
            uuid: "d41d8cd9".to_string(),
            duphash: Some("a1b2c3".to_string()),
            problem_type: "CCpp".to_string(),
            reason: Some("segfault in foo()".to_string()),
            executable: Some("/usr/bin/foo".to_string()),
            component: None,
            command_line_arguments: None,
            package: Some("foo-1.0-1".to_string()),
            user: None,
            hostname: Some("localhost".to_string()),
            uid: 1000,
            count: 2,
            first_occurrence_epoch_secs: 1700000000,
            last_occurrence_epoch_secs: 1700000100,
            is_reported: false,
            can_be_reported: true,
            is_remote: false,
            elements: vec!["type".to_string(), "uuid".to_string()],
            reports: vec![ReportInfo {
                label: "Bugzilla".to_string(),
                data: BTreeMap::from([(
                    "URL".to_string(),
                    "https://bugzilla.example.com/1".to_string(),
                )]),
            }],
        };
        let json = serde_json::to_string(&info).unwrap();
        // Renamed on the wire
        assert!(json.contains("\"type\":\"CCpp\""));
        let parsed: EntryInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.count, 2);
        assert_eq!(parsed.reports[0].label, "Bugzilla");
    }
}

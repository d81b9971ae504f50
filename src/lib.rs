// src/lib.rs

pub mod api_client;
pub mod attendance;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod notifier;
pub mod payroll;
pub mod payroll_gate;
pub mod session;
pub mod storage;

mod api_client_tests;

pub use api_client::RrhhClient;
pub use attendance::{AttendanceApi, AttendanceDayState, AttendanceResolver, AttendanceStatus, DayView, MarkOutcome};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ClientConfig;
pub use error::{Result, RrhhError};
pub use notifier::{ConsoleNotifier, Notification, NotificationLevel, Notifier, RecordingNotifier};
pub use payroll::{BiweeklyPeriod, Quincena};
pub use payroll_gate::{GateReport, PayrollApi, PayrollGate};
pub use session::{LoginCredentials, SessionContext, UserData};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

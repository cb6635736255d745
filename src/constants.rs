pub(crate) const DEFAULT_SHELL: &str = "sh";
pub(crate) const DEFAULT_TOOL_BIN: &str = "cu";
pub(crate) const AVAILABILITY_MARKER: &str = "container-use";

pub(crate) const DEFAULT_RUN_TIMEOUT_MS: u64 = 30_000;
pub(crate) const DEFAULT_LIST_TIMEOUT_MS: u64 = 10_000;
pub(crate) const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
pub(crate) const SENTINEL_EXIT_CODE: i32 = -1;
pub(crate) const STREAM_DRAIN_GRACE_MS: u64 = 500;

pub(crate) const SHARED_SESSION_NAME: &str = "container-use";
pub(crate) const SESSION_COLS: u16 = 120;
pub(crate) const SESSION_ROWS: u16 = 30;

pub(crate) const INTERRUPT_SIGNAL: &str = "\x03";
pub(crate) const LINE_CLEAR: &str = "\x15";
pub(crate) const EXIT_COMMAND: &str = "exit";
pub(crate) const SCREEN_CLEAR_COMMAND: &str = "clear";
pub(crate) const SETTLE_SHORT_MS: u64 = 100;
pub(crate) const SETTLE_LONG_MS: u64 = 200;

pub(crate) const ATTACH_POLL_MS: u64 = 50;
pub(crate) const DETACH_SEQUENCE: &str = "~.";

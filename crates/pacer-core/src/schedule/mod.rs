//! Custom event schedule
//!
//! Text format, one entry per line:
//!
//! ```text
//! @generator-properties=...
//! PT10S|restart(rolling restart of the backend)|{"nodes": 2}
//! PT1M|scale-up
//! ```
//!
//! Offsets are ISO-8601 durations measured from session start. Entry order
//! is file order, not offset order.

mod duration;
mod entry;
mod parser;
mod timer;


pub use duration::{format_iso8601, parse_iso8601};
pub use entry::CustomEventEntry;
pub use parser::{parse_line, parse_schedule, META_PREFIX};
pub use timer::CustomEventScheduler;

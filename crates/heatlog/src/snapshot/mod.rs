//! Per-device snapshot rows and the sinks they are appended to.

mod sink;
mod writer;

#[cfg(test)]
pub use sink::MemorySink;
pub use sink::RowSink;
pub use sink::Worksheet;
pub use writer::LOCAL_TIME;
pub use writer::SnapshotRow;
pub use writer::SnapshotWriter;
pub use writer::local_time;
pub use writer::scale_value;

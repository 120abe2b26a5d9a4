//! Trace correlation across the broker: W3C `traceparent` values and a
//! pluggable transaction sink.

use rand::Rng;
use std::fmt;
use std::time::Instant;

/// A parsed W3C trace context (`00-<trace-id>-<parent-id>-<flags>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceParent {
    pub trace_id: String,
    pub parent_id: String,
    pub flags: u8,
}

impl TraceParent {
    /// Starts a new trace with random identifiers, sampled.
    pub fn new_root() -> Self {
        Self {
            trace_id: random_hex(16),
            parent_id: random_hex(8),
            flags: 0x01,
        }
    }

    /// Same trace, new span id.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            parent_id: random_hex(8),
            flags: self.flags,
        }
    }

    /// Parses a `traceparent` header. Returns `None` for anything malformed,
    /// including the all-zero ids the W3C format forbids.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let parent_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version != "00" {
            return None;
        }
        if !is_hex_id(trace_id, 32) || !is_hex_id(parent_id, 16) || flags.len() != 2 {
            return None;
        }
        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            parent_id: parent_id.to_ascii_lowercase(),
            flags: u8::from_str_radix(flags, 16).ok()?,
        })
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & 0x01 == 0x01
    }
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "00-{}-{}-{:02x}", self.trace_id, self.parent_id, self.flags)
    }
}

fn is_hex_id(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit()) && s.bytes().any(|b| b != b'0')
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    // A zero id is invalid, force the last nibble non-zero.
    let mut out: String = (0..bytes).map(|_| format!("{:02x}", rng.gen::<u8>())).collect();
    if out.bytes().all(|b| b == b'0') {
        out.pop();
        out.push('1');
    }
    out
}

/// How a traced operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// An open transaction returned by [`Tracer::begin_transaction`].
#[derive(Debug, Clone)]
pub struct Transaction {
    pub kind: String,
    /// Context of this transaction; propagate it with `to_string()`.
    pub context: TraceParent,
    pub started_at: Instant,
}

/// Receives transaction boundaries around handler runs and publishes.
///
/// Called concurrently from worker threads and the I/O thread.
pub trait Tracer: Send + Sync {
    /// Opens a transaction, continuing `parent` when the producer sent one.
    fn begin_transaction(&self, kind: &str, parent: Option<&TraceParent>) -> Transaction {
        let context = parent.map(TraceParent::child).unwrap_or_else(TraceParent::new_root);
        Transaction {
            kind: kind.to_string(),
            context,
            started_at: Instant::now(),
        }
    }

    fn end_transaction(&self, transaction: Transaction, name: &str, outcome: Outcome);
}

/// Writes transactions to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn end_transaction(&self, transaction: Transaction, name: &str, outcome: Outcome) {
        log::debug!(
            "{} transaction '{}' finished as {} in {:?} trace_id: {}",
            transaction.kind,
            name,
            outcome.as_str(),
            transaction.started_at.elapsed(),
            transaction.context.trace_id
        );
    }
}

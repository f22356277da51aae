// self
use crate::obs::{OpKind, OpOutcome};

/// Counter incremented once per recorded operation outcome.
pub const OP_COUNTER: &str = "bearer_session_op_total";

/// `op` and `outcome` label pairs attached to [`OP_COUNTER`].
pub fn op_labels(kind: OpKind, outcome: OpOutcome) -> [(&'static str, &'static str); 2] {
	[("op", kind.as_str()), ("outcome", outcome.as_str())]
}

/// Increments [`OP_COUNTER`] through the global metrics recorder when the `metrics` feature is on.
pub fn record_op_outcome(kind: OpKind, outcome: OpOutcome) {
	let [(op_key, op), (outcome_key, outcome)] = op_labels(kind, outcome);

	#[cfg(feature = "metrics")]
	{
		metrics::counter!(OP_COUNTER, op_key => op, outcome_key => outcome).increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (op_key, op, outcome_key, outcome);
	}
}

//! Coverage record model.
//!
//! One [`CoverageRecord`] per instrumented method, holding the method's
//! tracked source lines, per-line hit counts and its call count. The
//! [`CoverageRecords`] index owns every record of a session and is the unit
//! that gets locked when hits are counted or a snapshot is taken.

mod name;
mod record;
mod records;

pub use name::strip_generic_parameters;
pub use record::{CoverageRecord, MethodToken};
pub use records::{CoverageRecords, HitOutcome, RecordSlot};

//! Role-owned bookkeeping. Nothing here performs I/O.

pub mod approvals;
pub mod exchanges;
pub mod holders;
pub mod proofs;

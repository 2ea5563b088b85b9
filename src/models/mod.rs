pub mod approval;
pub mod envelope;
pub mod event;
pub mod holder;

//! Operations exposed to the review tool, plus their shared guards,
//! scoring, and ownership collection.

pub mod approval;
pub mod check;
pub mod guards;
pub mod listing;
pub mod owned_paths;
pub mod ownership;
pub mod rename;
pub mod scoring;
pub mod suggest;
pub mod validation;

//! Request extractors shared by the REST handlers.

pub mod bearer;

//! In-process development host for exercising hostlink bridges.

pub mod host;

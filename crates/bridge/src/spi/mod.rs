//! Service Provider Interfaces implemented by host applications.

pub mod dispatch;

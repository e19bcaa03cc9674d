//! Core engine: prompt → fan-out → ensemble, wired together by the
//! prediction service. The rankings board shares the service's resolver.

pub mod ensemble;
pub mod fanout;
pub mod prompt;
pub mod ranking;
pub mod service;

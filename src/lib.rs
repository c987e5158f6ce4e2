//! A load-testing stand-in for a DNS server.
//!
//! Receives query-shaped datagrams and immediately sends each one back
//! with its header bytes rewritten into a syntactically valid response,
//! spreading the work over a configurable farm of processes and threads
//! and one of several interchangeable receive strategies — the point
//! being to measure how the strategies and placements compare, not to
//! speak DNS.

pub mod echo;
pub mod errors;
pub mod farm;
pub mod io_impl;
pub mod results;
pub mod shutdown;

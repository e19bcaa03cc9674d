//! Integration tests against the public `augur` API.

mod fakes;
mod pipeline;

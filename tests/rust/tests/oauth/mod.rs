//! OAuth integration tests
//!
//! Authentication challenges from SSE servers and the remediation that follows.

mod discovery;

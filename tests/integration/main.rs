//! Integration tests for the session client
//! These run the real reqwest transport against a local mock backend

pub mod test_harness;

pub mod authorized_request_test;
pub mod session_lifecycle_test;

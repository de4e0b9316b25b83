//! Unit test suite

mod response_test;

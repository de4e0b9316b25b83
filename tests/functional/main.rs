//! Functional test suite

mod support;

mod dispatcher_test;

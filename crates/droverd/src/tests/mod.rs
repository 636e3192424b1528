//! Test suites for the drover daemon.

pub(crate) mod support;

//! Unit and behavioural tests for the client runtime.

mod support;

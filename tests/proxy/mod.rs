//! End-to-end proxy generation tests.

mod end_to_end;
mod load_errors;

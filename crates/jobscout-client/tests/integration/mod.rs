pub mod common;
mod search_flow_tests;

mod common;
mod handler_tests;

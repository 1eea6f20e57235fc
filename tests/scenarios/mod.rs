//! Test scenarios

mod success_chain;

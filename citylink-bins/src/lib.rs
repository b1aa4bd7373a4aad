//! Shared code for the CityLink command-line tools

pub mod common;

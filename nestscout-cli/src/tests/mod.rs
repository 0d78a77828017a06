//! Shared test harness modules for the NestScout CLI.

use super::*;

mod helpers;
mod unit;

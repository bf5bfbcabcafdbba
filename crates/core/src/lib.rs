#![deny(warnings)]

pub mod config;
pub mod decode;
pub mod emotion;
pub mod features;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod util;

#![allow(dead_code)]

pub mod description;
pub mod frame_capture;
pub mod generator;
pub mod transcriber;
pub mod transcript_source;

//! Vision Capture - camera snapshots with object and text detection
//!
//! A live camera feed can be frozen on a snapshot, which is analyzed by either
//! a cloud or an on-device backend. Detections are drawn onto the snapshot and
//! summarized as a spoken announcement.

pub mod app;
pub mod capture;
pub mod cloud;
pub mod config;
pub mod detect;
pub mod shared;
pub mod speech;
pub mod storage;
pub mod vision;

pub use app::VisionApp;

// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                Scanner Layer                │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │               Backend Layer                 │
//! │  ┌──────────────────┐  ┌────────────────┐   │
//! │  │      Camera      │  │   Permission   │   │
//! │  │ (PipeWire/V4L2)  │  │ (portal/host)  │   │
//! │  └──────────────────┘  └────────────────┘   │
//! │  ┌──────────────────┐                       │
//! │  │  Virtual Camera  │                       │
//! │  │  (image files)   │                       │
//! │  └──────────────────┘                       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! - [`camera`]: capture traits, GStreamer sessions and device enumeration
//! - [`permission`]: camera access through the portal or device nodes
//! - [`virtual_camera`]: image files as a camera

pub mod camera;
pub mod permission;
pub mod virtual_camera;

//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

//! The arbor daemon library: configuration loading and the northbound
//! reactor. Management front-ends (NETCONF, RESTCONF) link against this
//! and drive the backend through [`northbound::api::Request`] messages.

pub mod config;
pub mod northbound;

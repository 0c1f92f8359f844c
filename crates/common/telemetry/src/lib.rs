// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Telemetry
//!
//! Logging setup shared by the stash binaries and tests.
//!
//! - **[`logging`]**: stdout and rolling-file output in text or JSON, a
//!   reloadable level filter, and a once-only initializer for unit tests.
//! - **[`panic_hook`]**: routes panics through `tracing` with a backtrace.
//!
//! ```no_run
//! use stash_common_telemetry::logging::{LoggingOptions, init_global_logging};
//!
//! let opts = LoggingOptions::builder().level("debug".to_string()).build();
//! let _guards = init_global_logging("stash", &opts).expect("logging");
//! tracing::info!("ready");
//! ```

pub mod logging;
pub mod panic_hook;

pub use logging::{
    LogFormat, LoggingOptions, init_default_ut_logging, init_global_logging,
    init_tracing_subscriber, reload_level,
};
pub use panic_hook::set_panic_hook;

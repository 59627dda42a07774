//! # Tool Core Demo
//!
//! Runs a drill through a rock field and then grinds a wall, headless, logging
//! to stdout.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --release
//! ```

fn main() {
    tool_core::run();
}

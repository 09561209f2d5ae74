//! Emit a warning when FUSE-dependent tests are skipped.
//!
//! The filesystem adapter tests live in `filesystem.rs` and are gated behind
//! `#[cfg(feature = "fuse")]`. This companion file makes `cargo test
//! --no-default-features` say so instead of passing silently.

#[cfg(not(feature = "fuse"))]
#[test]
fn fuse_tests_skipped_warning() {
    eprintln!(
        "\n\x1b[33mwarning\x1b[0m: Skipping filesystem tests: built without `fuse` feature.\n\
         To run them, build with: cargo test --features fuse\n"
    );
}

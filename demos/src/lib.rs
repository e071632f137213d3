//! Runnable demos live in `examples/`.

//! Empty by design — this crate exists only to host the end-to-end
//! scenarios under `tests/`.

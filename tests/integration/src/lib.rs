//! End-to-end scenario tests and the fuzzing suite live in `tests/`.

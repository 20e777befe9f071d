//! End-to-end tests for the XVC bridge and the device protocol client live in `tests/`.

// Common test utilities

#[cfg(test)]
#[allow(dead_code)]
pub mod harness;
#[cfg(test)]
#[allow(dead_code)]
pub mod tracing;

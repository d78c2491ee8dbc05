//! Behavioural tests that span several `regolo-core` modules, run against a
//! mock HTTP server.

#[cfg(test)]
mod unit;

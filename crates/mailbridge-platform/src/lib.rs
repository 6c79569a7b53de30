//! Platform abstraction layer for mailbridge.
//!
//! Provides traits for the platform-dependent pieces (filesystem,
//! environment, key-value persistence) so the core can be exercised against
//! in-memory implementations in tests.
//!
//! # Architecture
//!
//! The [`Platform`] trait bundles the filesystem and environment via
//! accessor methods. The key-value store is deliberately separate
//! ([`kv::KvStore`]): it is shared by every request handler and chosen from
//! configuration at startup.

pub mod config_loader;
pub mod env;
pub mod fs;
pub mod kv;

/// Bundle of platform capabilities used during startup.
pub trait Platform: Send + Sync {
    /// Filesystem operations.
    fn fs(&self) -> &dyn fs::FileSystem;

    /// Environment variable access.
    fn env(&self) -> &dyn env::Environment;
}

/// Native platform implementation using tokio and std.
pub struct NativePlatform {
    fs: fs::NativeFileSystem,
    env: env::NativeEnvironment,
}

impl NativePlatform {
    pub fn new() -> Self {
        Self {
            fs: fs::NativeFileSystem,
            env: env::NativeEnvironment,
        }
    }
}

impl Default for NativePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for NativePlatform {
    fn fs(&self) -> &dyn fs::FileSystem {
        &self.fs
    }

    fn env(&self) -> &dyn env::Environment {
        &self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_platform_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NativePlatform>();
    }

    #[test]
    fn native_platform_exposes_home() {
        let platform = NativePlatform::default();
        let _ = platform.fs().home_dir();
        assert!(platform.env().get_var("MAILBRIDGE_DEFINITELY_NOT_SET_31337").is_none());
    }
}

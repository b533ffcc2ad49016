//! Embedder seam.
//!
//! The VM is generic over a [`Host`] that provides ambient services to native
//! callees; the stdout sink is the only one the core needs. Tests run against
//! [`CaptureHost`].

pub trait Host {
    /// Write program output. Builtin and test `print` natives funnel here.
    fn write_stdout(&mut self, s: &str);
}

#[derive(Debug, Default, Clone, Copy)]
/// Process stdout.
pub struct StdioHost;

impl Host for StdioHost {
    fn write_stdout(&mut self, s: &str) {
        use std::io::Write;
        let _ = std::io::stdout().write_all(s.as_bytes());
    }
}

#[cfg(feature = "test-helpers")]
#[derive(Debug, Default, Clone)]
/// Accumulates output in memory for assertions.
pub struct CaptureHost {
    pub out: String,
}

#[cfg(feature = "test-helpers")]
impl Host for CaptureHost {
    fn write_stdout(&mut self, s: &str) {
        self.out.push_str(s);
    }
}

pub mod checkpoint;
pub mod keys;
pub mod run;

pub use checkpoint::*;
pub use keys::*;
pub use run::*;

/// Every record succeeded or was skipped
pub const EXIT_OK: u8 = 0;
/// Run aborted or could not start
pub const EXIT_ABORTED: u8 = 1;
/// Run completed with at least one failed record
pub const EXIT_FAILURES: u8 = 2;

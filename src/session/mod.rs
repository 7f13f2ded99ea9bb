//! Test sessions: leased controllers plus their on-disk configuration.
//!
//! - [`SessionController`]: admission, lookup, teardown and drain.
//! - [`Session`]: setup → execute* → teardown against one controller.
//! - [`ConfigRewriter`]: the seam to the configuration rewriter.

mod controller;
mod live;
mod rewrite;

pub use controller::SessionController;
pub use live::{ConfigFile, Session};
pub use rewrite::{
    ConfigRewriter, PassthroughRewriter, RewriteError, RewrittenInputs, RewrittenOutputs,
    input_address, output_address,
};

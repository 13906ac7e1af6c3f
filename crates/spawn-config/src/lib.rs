//! Option-file and argv configuration, compressed host-list expansion, and
//! typed accessors for the launcher's recognized options (§6, §10.3).

mod hostlist;
mod options;

pub use hostlist::expand as expand_hostlist;
pub use options::Config;

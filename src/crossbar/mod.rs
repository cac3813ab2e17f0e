// Crossbar module tree.
// `net` and `sql` are independent cores coupled only through the shared
// process-wide services in `config`, `cloud` and `crypto`.

pub mod cloud;
pub mod config;
pub mod crypto;
pub mod net;
pub mod sql;

//! # rehost
//!
//! Inspects a running or mounted RHEL/CentOS-family host filesystem and
//! produces the artifacts needed to rebuild that host as an immutable,
//! image-based (bootc) system: a container build recipe, a staging tree of
//! files to copy into the image, a deploy-time provisioning snippet,
//! human-readable audit reports, and a reusable machine-readable snapshot.
//!
//! The pipeline is staged and single-threaded: [`inspect`] walks the host
//! filesystem through a pluggable [`executor::Executor`] to build a typed
//! [`schema::Snapshot`], [`redact`] scrubs credential-shaped text from it,
//! [`pipeline`] persists it to disk, and [`render`] turns it into the output
//! tree.

pub mod baseline;
pub mod cli;
pub mod cron;
pub mod executor;
pub mod inspect;
pub mod pipeline;
pub mod preflight;
pub mod redact;
pub mod render;
pub mod schema;

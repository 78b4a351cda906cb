//! Workspace detection, discovery and graph construction
//!
//! A repository is detected once ([`WorkspaceRoot`]), its members are
//! discovered from the layout's patterns ([`WorkspaceDiscovery`]) and the
//! internal dependencies between them form a graph ([`WorkspaceGraph`])
//! that the task layer schedules against.

pub mod detect;
pub mod discovery;
pub mod graph;

pub use detect::{WorkspaceLayout, WorkspaceRoot};
pub use discovery::{Workspace, WorkspaceDiscovery};
pub use graph::{WorkspaceGraph, WorkspaceNode};

//! Local storage: mountpaths, object store, filesystem walker, markers.

pub mod marker;
pub mod mountpath;
pub mod object;
pub mod walk;

pub use mountpath::{Mountpath, MountpathRegistry};
pub use object::{Lom, ObjectStore, ACK_SHARDS};
pub use walk::Walk;

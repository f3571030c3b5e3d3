pub mod datastore;
pub mod media;
pub mod object;

pub use datastore::DatastoreConfig;
pub use media::MediaRecord;
pub use object::{ObjectDescriptor, ObjectInfo};

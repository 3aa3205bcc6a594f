pub mod community;
pub mod kv;
pub mod projects;
pub mod sessions;
pub mod tasks;
pub mod types;

pub use community::{load_base_catalogue, CommunityBoard, ViewedSet};
pub use kv::{scoped_key, FileStore, KeyValueExt, KeyValueStore, MemoryStore};
pub use projects::ProjectStore;
pub use sessions::SessionStore;
pub use tasks::{parse_task_command, NewTask, TaskStore};

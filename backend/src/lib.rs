pub mod config;
pub mod fs_tree;
pub mod registry;
pub mod watcher;
pub mod ws_server;

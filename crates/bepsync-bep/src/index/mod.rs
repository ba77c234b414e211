//! Index reconciliation: merging peer index records into the local store
//! under last-modified-wins.

pub mod collector;
pub mod element;
pub mod handler;
pub mod message;

pub use collector::FolderStatsUpdateCollector;
pub use handler::{IndexEvent, IndexHandler};
pub use message::{handle_folder_stats_update, handle_index_message, IndexMessageResult};

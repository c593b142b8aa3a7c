// CloudNest - Google Drive browsing core
// Listing cache, paged folder browsing, featured files and session handling

pub mod browser;
pub mod cache;
pub mod config;
pub mod context;
pub mod featured;
pub mod notice;
pub mod providers;
pub mod session;
pub mod store;

pub use browser::{BrowserSnapshot, FileBrowser, ListOutcome};
pub use cache::ListingCache;
pub use config::CloudNestConfig;
pub use context::CloudNest;
pub use featured::FeaturedFiles;
pub use notice::{Notice, NoticeLevel, Notifier};
pub use providers::{
    Breadcrumb, FileEntry, ProviderError, RemoteEntry, StorageInfo, StorageProvider, ROOT_FOLDER_ID,
};
pub use session::SessionManager;
pub use store::{FileStore, KeyValueStore, MemoryStore};

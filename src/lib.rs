pub mod cli;
pub mod downloader;
pub mod fetcher;
pub mod file_manager;
pub mod frontier;
pub mod html_parser;
pub mod log_sink;
pub mod naming;
pub mod serializer;

// Re-export main types for convenience
pub use cli::MirrorCommand;
pub use downloader::{
    clone_website, CloneError, CloneHandle, CloneOptions, CloneReport, CloneState, WebsiteMirror,
};
pub use fetcher::{AssetFetcher, AssetOutcome, FetchPolicy, PageFetcher};
pub use file_manager::FileManager;
pub use frontier::Frontier;
pub use html_parser::{AssetReference, PageDocument};
pub use log_sink::{ConsoleSink, LogSink, ProgressSink};
pub use naming::NamingIndex;

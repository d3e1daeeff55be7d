pub mod app;
pub mod buffer;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod paths;
pub mod resilience;
pub mod shutdown;
pub mod stream;

// Re-export commonly used types
pub use app::App;
pub use buffer::RingBuffer;
pub use config::Config;
pub use stream::Interceptor;
